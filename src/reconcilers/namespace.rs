// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace controller - maps new or changed namespaces and seeds their payload secrets.

use crate::config::Config;
use crate::constants::timing;
use crate::error::{OperatorError, Result};
use crate::kubernetes::is_terminating;
use crate::mapper::{matching::assigned_dynakube, NamespaceMapper};
use crate::sync::{Payload, SecretFanOut};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    runtime::{controller::Action, watcher, Controller},
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct NamespaceReconciler {
    client: Client,
    mapper: NamespaceMapper,
    fanout: SecretFanOut,
}

impl NamespaceReconciler {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            mapper: NamespaceMapper::new(client.clone(), config.operator_namespace.clone()),
            fanout: SecretFanOut::new(client.clone(), config.operator_namespace.clone()),
            client,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let context = Arc::new(self);

        Controller::new(namespaces, watcher::Config::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled namespace: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    pub async fn apply(&self, namespace: &Namespace) -> Result<Action> {
        let mut namespace = namespace.clone();
        if self.mapper.map_from_namespace(&mut namespace).await? {
            info!(namespace = %namespace.name_any(), "Namespace mapping updated");
        }

        if is_terminating(&namespace) {
            return Ok(Action::await_change());
        }
        if let Some(dynakube) = assigned_dynakube(&namespace) {
            self.fanout
                .replicate_from_source(dynakube, &namespace.name_any(), &Payload::secret_names())
                .await?;
        }

        Ok(Action::await_change())
    }
}

async fn reconcile(namespace: Arc<Namespace>, ctx: Arc<NamespaceReconciler>) -> Result<Action> {
    debug!("Reconciling namespace: {}", namespace.name_any());
    ctx.apply(&namespace).await
}

fn error_policy(namespace: Arc<Namespace>, error: &OperatorError, _ctx: Arc<NamespaceReconciler>) -> Action {
    error!(namespace = %namespace.name_any(), "Reconciliation error: {}", error);
    Action::requeue(timing::REQUEUE_ERROR)
}
