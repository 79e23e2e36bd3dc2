// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mapping driven by a single namespace, used when a namespace appears or changes.

use super::matching::{apply_decision, candidates, decide, Decision};
use super::NamespaceMapper;
use crate::error::{OperatorError, Result};
use crate::kubernetes::{is_terminating, update_namespace};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::{debug, instrument};

impl NamespaceMapper {
    /// Decide the governing DynaKube of one namespace and write the label change.
    /// Returns whether the namespace was updated.
    #[instrument(skip(self, namespace), fields(namespace = %namespace.name_any()))]
    pub async fn map_from_namespace(&self, namespace: &mut Namespace) -> Result<bool> {
        if is_terminating(namespace) {
            return Ok(false);
        }

        let dynakubes = self.list_dynakubes().await?;
        let candidates = candidates(&dynakubes, &self.operator_namespace);
        let decision = decide(&candidates, namespace);

        if let Decision::Conflict(dynakubes) = decision {
            return Err(OperatorError::ConflictingNamespace {
                namespace: namespace.name_any(),
                dynakubes,
            });
        }

        if !apply_decision(namespace, &decision) {
            return Ok(false);
        }
        *namespace = update_namespace(&self.client, namespace).await?;
        debug!(?decision, "Namespace mapping updated");
        Ok(true)
    }
}
