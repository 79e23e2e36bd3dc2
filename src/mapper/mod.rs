// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace mapping: labelling namespaces with the DynaKube that governs them.
//!
//! Two drive modes share the same decision logic in [`matching`]:
//! from a DynaKube (all namespaces) and from a single namespace.

pub mod dynakube;
pub mod matching;
pub mod namespace;

pub use matching::{Decision, MappingMode};

use crate::error::Result;
use crate::types::DynaKube;
use kube::{api::ListParams, Api, Client};

/// Maximum number of namespace names listed in a condition message
const MAX_LISTED_NAMESPACES: usize = 10;

#[derive(Clone)]
pub struct NamespaceMapper {
    client: Client,
    operator_namespace: String,
}

impl NamespaceMapper {
    pub fn new(client: Client, operator_namespace: impl Into<String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
        }
    }

    async fn list_dynakubes(&self) -> Result<Vec<DynaKube>> {
        let api: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Condition message listing matched namespaces, truncated after [`MAX_LISTED_NAMESPACES`]
pub fn namespaces_message(names: &[String]) -> String {
    let listed = names
        .iter()
        .take(MAX_LISTED_NAMESPACES)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    match names.len().saturating_sub(MAX_LISTED_NAMESPACES) {
        0 => listed,
        omitted => format!("{} ({} more omitted)", listed, omitted),
    }
}
