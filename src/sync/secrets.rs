// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Replicating a payload secret into every namespace a DynaKube governs.

use crate::constants::labels;
use crate::error::{OperatorError, Result};
use crate::kubernetes::secrets::{
    build_secret, create_or_update_secret, delete_secret, get_secret, write_secret,
};
use crate::kubernetes::{is_terminating, list_namespaces, SecretData, SecretWrite};
use crate::reconcilers::tenant_secret_labels;
use crate::types::DynaKube;
use k8s_openapi::api::core::v1::Secret;
use kube::{api::ListParams, Api, Client, Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, error, info, instrument};

/// Labels carried by every replicated copy, used to find copies across namespaces
pub fn replica_labels(dynakube_name: &str, secret_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP_MANAGED_BY.to_string(), crate::constants::OPERATOR_NAME.to_string()),
        (labels::APP_CREATED_BY.to_string(), dynakube_name.to_string()),
        (labels::APP_COMPONENT.to_string(), secret_name.to_string()),
    ])
}

fn replica_selector(dynakube_name: &str, secret_name: &str) -> String {
    format!(
        "{}={},{}={}",
        labels::APP_COMPONENT,
        secret_name,
        labels::APP_CREATED_BY,
        dynakube_name
    )
}

/// Name of the operator-namespace copy holding the payload of `secret_name`
pub fn source_secret_name(dynakube_name: &str, secret_name: &str) -> String {
    format!("{}-{}", dynakube_name, secret_name)
}

fn governed_selector(dynakube_name: &str) -> String {
    format!("{}={}", labels::INJECT_INSTANCE, dynakube_name)
}

/// Replicates fixed-name secrets from the operator namespace into governed namespaces
#[derive(Clone)]
pub struct SecretFanOut {
    client: Client,
    operator_namespace: String,
}

impl SecretFanOut {
    pub fn new(client: Client, operator_namespace: impl Into<String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
        }
    }

    /// Store `data` as the source copy and replicate it as `secret_name` into every
    /// governed namespace. Copies in namespaces no longer governed are removed.
    ///
    /// Per-namespace failures do not stop the other namespaces; they are joined
    /// into the returned error. Returns the write outcome of the source copy.
    #[instrument(skip(self, dynakube, data), fields(dynakube = %dynakube.name_any()))]
    pub async fn replicate(
        &self,
        dynakube: &DynaKube,
        secret_name: &str,
        data: SecretData,
    ) -> Result<SecretWrite> {
        let dynakube_name = dynakube.name_any();

        let source = build_secret(
            &source_secret_name(&dynakube_name, secret_name),
            &self.operator_namespace,
            data.clone(),
            tenant_secret_labels(dynakube),
            dynakube.controller_owner_ref(&()),
        );
        let source_write = create_or_update_secret(&self.client, &source).await?;

        let governed = list_namespaces(&self.client, Some(&governed_selector(&dynakube_name))).await?;
        let governed_names: HashSet<String> = governed.iter().map(|ns| ns.name_any()).collect();
        let mut existing = self.list_copies(&dynakube_name, secret_name).await?;

        let mut errors = Vec::new();
        let mut written = 0;
        for namespace in governed.iter().filter(|ns| !is_terminating(ns)) {
            let namespace = namespace.name_any();
            let desired = build_secret(
                secret_name,
                &namespace,
                data.clone(),
                replica_labels(&dynakube_name, secret_name),
                None,
            );
            let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
            // A same-named secret without our labels is adopted and overwritten
            let result = match existing.remove(&namespace) {
                Some(copy) => write_secret(&api, Some(&copy), &desired).await,
                None => create_or_update_secret(&self.client, &desired).await,
            };
            match result {
                Ok(SecretWrite::Unchanged) => {}
                Ok(_) => written += 1,
                Err(e) => {
                    error!(namespace = %namespace, "Failed to replicate secret {}: {}", secret_name, e);
                    errors.push(e);
                }
            }
        }

        for namespace in existing.into_keys().filter(|ns| !governed_names.contains(ns)) {
            match delete_secret(&self.client, &namespace, secret_name).await {
                Ok(_) => debug!(namespace = %namespace, "Removed replicated secret {}", secret_name),
                Err(e) => {
                    error!(namespace = %namespace, "Failed to remove secret {}: {}", secret_name, e);
                    errors.push(e);
                }
            }
        }

        if written > 0 {
            info!("Replicated secret {} into {} namespaces", secret_name, written);
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(source_write),
        }
    }

    /// Existing copies of `secret_name` created for a DynaKube, keyed by namespace
    async fn list_copies(
        &self,
        dynakube_name: &str,
        secret_name: &str,
    ) -> Result<HashMap<String, Secret>> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&replica_selector(dynakube_name, secret_name));
        Ok(api
            .list(&params)
            .await?
            .items
            .into_iter()
            .filter_map(|s| s.namespace().map(|ns| (ns, s)))
            .collect())
    }

    /// Delete the copies of `secret_name` from `namespaces` and the source copy.
    /// Missing secrets are not an error.
    #[instrument(skip(self, namespaces))]
    pub async fn cleanup(
        &self,
        dynakube_name: &str,
        secret_name: &str,
        namespaces: &[String],
    ) -> Result<()> {
        let mut errors = Vec::new();
        for namespace in namespaces {
            if let Err(e) = delete_secret(&self.client, namespace, secret_name).await {
                error!(namespace = %namespace, "Failed to remove secret {}: {}", secret_name, e);
                errors.push(e);
            }
        }

        let source = source_secret_name(dynakube_name, secret_name);
        if let Err(e) = delete_secret(&self.client, &self.operator_namespace, &source).await {
            errors.push(e);
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove every copy of `secret_name`, used when its payload is no longer produced
    pub async fn remove(&self, dynakube_name: &str, secret_name: &str) -> Result<()> {
        let namespaces: Vec<String> = self
            .list_copies(dynakube_name, secret_name)
            .await?
            .into_keys()
            .collect();
        self.cleanup(dynakube_name, secret_name, &namespaces).await
    }

    /// Copy the stored source secrets of a DynaKube into one namespace.
    /// Source secrets that do not exist yet are skipped.
    #[instrument(skip(self, secret_names))]
    pub async fn replicate_from_source(
        &self,
        dynakube_name: &str,
        namespace: &str,
        secret_names: &[&str],
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let mut errors = Vec::new();

        for secret_name in secret_names {
            let source_name = source_secret_name(dynakube_name, secret_name);
            let source = match get_secret(&self.client, &self.operator_namespace, &source_name).await {
                Ok(Some(source)) => source,
                Ok(None) => continue,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };

            let desired = build_secret(
                secret_name,
                namespace,
                source.data.unwrap_or_default(),
                replica_labels(dynakube_name, secret_name),
                None,
            );
            let result = match api.get_opt(secret_name).await {
                Ok(existing) => write_secret(&api, existing.as_ref(), &desired).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                error!("Failed to replicate secret {}: {}", secret_name, e);
                errors.push(e);
            }
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
