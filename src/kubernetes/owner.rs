// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolving the operator's own Deployment for owner references.

use crate::error::{OperatorError, Result};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, Resource};
use tracing::instrument;

fn controller_of<'a>(owners: Option<&'a Vec<OwnerReference>>, kind: &str) -> Option<&'a OwnerReference> {
    owners?
        .iter()
        .find(|o| o.kind == kind && o.controller == Some(true))
}

/// Follow pod → replica set → deployment and return a controller reference to the deployment
#[instrument(skip(client))]
pub async fn operator_deployment_owner(
    client: &Client,
    namespace: &str,
    pod_name: &str,
) -> Result<OwnerReference> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = pods.get(pod_name).await?;

    let rs_ref = controller_of(pod.metadata.owner_references.as_ref(), "ReplicaSet")
        .ok_or_else(|| OperatorError::NodeCache(format!("pod {} has no owning ReplicaSet", pod_name)))?;
    let replica_sets: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
    let rs = replica_sets.get(&rs_ref.name).await?;

    let deploy_ref = controller_of(rs.metadata.owner_references.as_ref(), "Deployment")
        .ok_or_else(|| {
            OperatorError::NodeCache(format!("replica set {} has no owning Deployment", rs_ref.name))
        })?;
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = deployments.get(&deploy_ref.name).await?;

    deployment
        .controller_owner_ref(&())
        .ok_or_else(|| OperatorError::NodeCache("deployment has no name or uid".to_string()))
}
