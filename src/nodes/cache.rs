// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-node state persisted in the `dynatrace-node-cache` config map.

use crate::constants::names;
use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, ResourceExt,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// What the operator last knew about a node
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// DynaKube whose OneAgent runs on the node
    pub instance: String,
    #[serde(default)]
    pub ip: String,
    pub seen: DateTime<Utc>,
    /// Last mark-for-termination event sent for the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marked: Option<DateTime<Utc>>,
}

pub struct NodeCache {
    config_map: ConfigMap,
    exists: bool,
    changed: bool,
}

impl NodeCache {
    /// Load the cache, a missing config map is an empty cache
    #[instrument(skip(client))]
    pub async fn load(client: &Client, namespace: &str) -> Result<Self> {
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
        Ok(match api.get_opt(names::NODE_CACHE_CONFIG_MAP).await? {
            Some(config_map) => Self {
                config_map,
                exists: true,
                changed: false,
            },
            None => Self::empty(namespace),
        })
    }

    pub fn empty(namespace: &str) -> Self {
        Self {
            config_map: ConfigMap {
                metadata: ObjectMeta {
                    name: Some(names::NODE_CACHE_CONFIG_MAP.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            exists: false,
            changed: false,
        }
    }

    pub fn get(&self, node: &str) -> Result<Option<CacheEntry>> {
        self.config_map
            .data
            .as_ref()
            .and_then(|d| d.get(node))
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| {
                    OperatorError::NodeCache(format!("invalid entry for node {}: {}", node, e))
                })
            })
            .transpose()
    }

    pub fn set(&mut self, node: &str, entry: &CacheEntry) -> Result<()> {
        let raw = serde_json::to_string(entry)?;
        let data = self.config_map.data.get_or_insert_with(Default::default);
        if data.get(node) != Some(&raw) {
            data.insert(node.to_string(), raw);
            self.changed = true;
        }
        Ok(())
    }

    pub fn delete(&mut self, node: &str) {
        if let Some(data) = self.config_map.data.as_mut() {
            if data.remove(node).is_some() {
                self.changed = true;
            }
        }
    }

    pub fn nodes(&self) -> Vec<String> {
        self.config_map
            .data
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Write the cache back when it changed. `owner` is only applied on creation.
    #[instrument(skip(self, client, owner))]
    pub async fn store(&mut self, client: &Client, owner: Option<OwnerReference>) -> Result<()> {
        if !self.changed {
            return Ok(());
        }
        let namespace = self.config_map.namespace().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);

        self.config_map = if self.exists {
            api.replace(names::NODE_CACHE_CONFIG_MAP, &PostParams::default(), &self.config_map)
                .await?
        } else {
            self.config_map.metadata.owner_references = owner.map(|o| vec![o]);
            api.create(&PostParams::default(), &self.config_map).await?
        };
        self.exists = true;
        self.changed = false;
        debug!("Node cache stored");
        Ok(())
    }
}
