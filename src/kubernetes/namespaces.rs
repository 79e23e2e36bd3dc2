// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace helpers

use crate::error::Result;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};
use tracing::{debug, instrument};

const TERMINATING_PHASE: &str = "Terminating";

pub fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == TERMINATING_PHASE)
}

#[instrument(skip(client))]
pub async fn list_namespaces(client: &Client, label_selector: Option<&str>) -> Result<Vec<Namespace>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let mut lp = ListParams::default();
    if let Some(selector) = label_selector {
        lp = lp.labels(selector);
    }
    Ok(namespaces.list(&lp).await?.items)
}

/// Write back a namespace after its labels or annotations were changed
#[instrument(skip(client, namespace), fields(namespace = %namespace.name_any()))]
pub async fn update_namespace(client: &Client, namespace: &Namespace) -> Result<Namespace> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    debug!("Updating namespace");
    Ok(namespaces
        .replace(&namespace.name_any(), &PostParams::default(), namespace)
        .await?)
}
