// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reading the Dynatrace tokens out of their Kubernetes secret.
//!
//! Values are returned exactly as stored. Whitespace is reported when the
//! tokens are probed, not here.

use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::fmt;
use tracing::instrument;

pub const API_TOKEN: &str = "apiToken";
pub const PAAS_TOKEN: &str = "paasToken";
pub const DATA_INGEST_TOKEN: &str = "dataIngestToken";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenSet {
    pub api_token: String,
    pub paas_token: Option<String>,
    pub data_ingest_token: Option<String>,
}

impl TokenSet {
    /// The PaaS token, falling back to the API token when none is stored
    pub fn paas_token(&self) -> &str {
        self.paas_token.as_deref().unwrap_or(&self.api_token)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("api_token", &"<redacted>")
            .field("paas_token", &self.paas_token.as_ref().map(|_| "<redacted>"))
            .field(
                "data_ingest_token",
                &self.data_ingest_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// `namespace:name` key used in messages about a secret
pub fn secret_key(namespace: &str, name: &str) -> String {
    format!("{}:{}", namespace, name)
}

fn read_field(secret: &Secret, key: &str, field: &str) -> Result<Option<String>> {
    let Some(value) = secret.data.as_ref().and_then(|d| d.get(field)) else {
        return Ok(None);
    };
    String::from_utf8(value.0.clone())
        .map(Some)
        .map_err(|_| OperatorError::TokenMalformed {
            secret: key.to_string(),
            token: field.to_string(),
        })
}

/// Extract the tokens from an already fetched secret
pub fn tokens_from_secret(secret: &Secret, key: &str) -> Result<TokenSet> {
    let api_token = read_field(secret, key, API_TOKEN)?.ok_or_else(|| OperatorError::TokenMissing {
        secret: key.to_string(),
        token: API_TOKEN.to_string(),
    })?;

    Ok(TokenSet {
        api_token,
        paas_token: read_field(secret, key, PAAS_TOKEN)?,
        data_ingest_token: read_field(secret, key, DATA_INGEST_TOKEN)?,
    })
}

/// Reads token secrets through the Kubernetes API
#[derive(Clone)]
pub struct TokenStore {
    client: Client,
}

impl TokenStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self))]
    pub async fn read(&self, namespace: &str, name: &str) -> Result<TokenSet> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let key = secret_key(namespace, name);

        match secrets.get_opt(name).await? {
            Some(secret) => tokens_from_secret(&secret, &key),
            None => Err(OperatorError::SecretNotFound(key)),
        }
    }
}
