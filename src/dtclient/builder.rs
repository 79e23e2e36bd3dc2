// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Building a Dynatrace client for a DynaKube.
//!
//! A fresh client is built on every reconcile; nothing is shared between
//! DynaKubes.

use super::{ClientOptions, DynatraceClient, DynatraceHttpClient, ProxyUrl, TokenSet};
use crate::constants::names;
use crate::error::{OperatorError, Result};
use crate::kubernetes::secrets::{get_config_map_field, get_secret_field};
use crate::types::DynaKube;
use async_trait::async_trait;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Seam between the reconcilers and the way clients are constructed
#[async_trait]
pub trait DynatraceClientBuilder: Send + Sync {
    async fn build(&self, dynakube: &DynaKube, tokens: &TokenSet) -> Result<Arc<dyn DynatraceClient>>;
}

/// Builds [`DynatraceHttpClient`]s, resolving CA bundles and proxies through the Kubernetes API
#[derive(Clone)]
pub struct DynatraceClientFactory {
    client: Client,
}

impl DynatraceClientFactory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Assemble the client options for a DynaKube
    pub async fn options(&self, dynakube: &DynaKube, tokens: &TokenSet) -> Result<ClientOptions> {
        let flags = dynakube.feature_flags();
        let mut options = ClientOptions::new(dynakube.api_url(), tokens.clone());
        options.network_zone = dynakube.network_zone().map(str::to_string);
        options.skip_cert_check = dynakube.spec.skip_cert_check;
        options.disable_host_requests = flags.disable_hosts_requests();
        options.trusted_certs = load_trusted_cas(&self.client, dynakube).await?;
        options.proxy = resolve_proxy(&self.client, dynakube).await?;
        if options.proxy.is_some() {
            options.no_proxy = flags.no_proxy().map(str::to_string);
        }
        Ok(options)
    }
}

#[async_trait]
impl DynatraceClientBuilder for DynatraceClientFactory {
    #[instrument(skip(self, dynakube, tokens), fields(dynakube = %dynakube.name_any()))]
    async fn build(&self, dynakube: &DynaKube, tokens: &TokenSet) -> Result<Arc<dyn DynatraceClient>> {
        let options = self.options(dynakube, tokens).await?;
        debug!(
            proxy = options.proxy.is_some(),
            trusted_certs = options.trusted_certs.is_some(),
            "Building Dynatrace client"
        );
        let client = DynatraceHttpClient::new(options)
            .map_err(|e| OperatorError::ClientBuild(e.to_string()))?;
        Ok(Arc::new(client))
    }
}

/// PEM bundle from the trusted-CA config map, `None` when none is configured
pub async fn load_trusted_cas(client: &Client, dynakube: &DynaKube) -> Result<Option<String>> {
    let Some(name) = dynakube.spec.trusted_cas.as_deref().filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let namespace = dynakube.namespace().unwrap_or_default();
    get_config_map_field(client, &namespace, name, names::TRUSTED_CAS_KEY)
        .await
        .map(Some)
}

/// The configured proxy, inline or from a secret. `None` when unset or ignored.
pub async fn resolve_proxy(client: &Client, dynakube: &DynaKube) -> Result<Option<ProxyUrl>> {
    if dynakube.feature_flags().ignore_proxy() {
        return Ok(None);
    }
    let Some(proxy) = dynakube.spec.proxy.as_ref() else {
        return Ok(None);
    };

    let raw = match (proxy.value.as_deref(), proxy.value_from.as_deref()) {
        (Some(value), _) if !value.is_empty() => value.to_string(),
        (_, Some(secret)) if !secret.is_empty() => {
            let namespace = dynakube.namespace().unwrap_or_default();
            get_secret_field(client, &namespace, secret, names::PROXY_KEY).await?
        }
        _ => return Ok(None),
    };

    raw.parse().map(Some)
}
