// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secret and config map read/write helpers shared by the reconcilers.

use crate::error::{OperatorError, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::{
    api::{DeleteParams, ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

pub type SecretData = BTreeMap<String, ByteString>;

/// Outcome of a create-or-update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretWrite {
    Created,
    Updated,
    Unchanged,
}

pub fn build_secret(
    name: &str,
    namespace: &str,
    data: SecretData,
    labels: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels).filter(|l| !l.is_empty()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Whether `existing` differs from `desired` in data, labels or owner references
pub fn needs_update(existing: &Secret, desired: &Secret) -> bool {
    let data = |s: &Secret| s.data.clone().unwrap_or_default();
    let labels = |s: &Secret| s.metadata.labels.clone().unwrap_or_default();
    let owners = |s: &Secret| s.metadata.owner_references.clone().unwrap_or_default();

    data(existing) != data(desired)
        || labels(existing) != labels(desired)
        || owners(existing) != owners(desired)
}

pub fn secret_field<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.as_slice())
}

/// Create `desired` or bring `existing` in line with it
#[instrument(skip(api, existing, desired), fields(secret = %desired.name_any()))]
pub async fn write_secret(
    api: &Api<Secret>,
    existing: Option<&Secret>,
    desired: &Secret,
) -> Result<SecretWrite> {
    match existing {
        None => {
            api.create(&PostParams::default(), desired).await?;
            debug!("Secret created");
            Ok(SecretWrite::Created)
        }
        Some(existing) if needs_update(existing, desired) => {
            let mut updated = desired.clone();
            updated.metadata.resource_version = existing.resource_version();
            api.replace(&desired.name_any(), &PostParams::default(), &updated)
                .await?;
            debug!("Secret updated");
            Ok(SecretWrite::Updated)
        }
        Some(_) => Ok(SecretWrite::Unchanged),
    }
}

pub async fn create_or_update_secret(client: &Client, desired: &Secret) -> Result<SecretWrite> {
    let namespace = desired.namespace().unwrap_or_default();
    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let existing = api.get_opt(&desired.name_any()).await?;
    write_secret(&api, existing.as_ref(), desired).await
}

pub async fn get_secret(client: &Client, namespace: &str, name: &str) -> Result<Option<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    Ok(api.get_opt(name).await?)
}

/// Delete a secret, returning whether it existed
pub async fn delete_secret(client: &Client, namespace: &str, name: &str) -> Result<bool> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read a required non-empty field from a secret
pub async fn get_secret_field(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    let secret = get_secret(client, namespace, name)
        .await?
        .ok_or_else(|| OperatorError::SecretNotFound(format!("{}:{}", namespace, name)))?;

    secret_field(&secret, key)
        .filter(|v| !v.is_empty())
        .map(|v| String::from_utf8_lossy(v).to_string())
        .ok_or_else(|| OperatorError::SecretFieldMissing {
            secret: format!("{}:{}", namespace, name),
            field: key.to_string(),
        })
}

/// Read a required non-empty field from a config map
pub async fn get_config_map_field(
    client: &Client,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = api.get(name).await?;

    config_map
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| OperatorError::ConfigMapFieldMissing {
            config_map: format!("{}:{}", namespace, name),
            field: key.to_string(),
        })
}
