// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DynaKube controller: runs the per-DynaKube steps in order and commits the status.

use super::{
    set_secret_written, ConnectionInfoReconciler, ProcessModuleConfigReconciler, TokenReconciler,
};
use crate::config::Config;
use crate::constants::{timing, FINALIZER};
use crate::dtclient::{DynatraceClientBuilder, TokenSet, TokenStore};
use crate::error::{OperatorError, Result};
use crate::mapper::NamespaceMapper;
use crate::sync::{Payload, PayloadGenerator, SecretFanOut};
use crate::types::conditions::{remove_condition, set_kube_api_error, set_secret_generation_failed};
use crate::types::DynaKube;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        watcher, Controller,
    },
    Api, Client, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub struct DynaKubeReconciler {
    client: Client,
    operator_namespace: String,
    tokens: TokenReconciler,
    connection_info: ConnectionInfoReconciler,
    process_module_config: ProcessModuleConfigReconciler,
    mapper: NamespaceMapper,
    payloads: PayloadGenerator,
    fanout: SecretFanOut,
}

impl DynaKubeReconciler {
    pub fn new(client: Client, config: &Config, builder: Arc<dyn DynatraceClientBuilder>) -> Self {
        let namespace = config.operator_namespace.clone();
        Self {
            tokens: TokenReconciler::new(TokenStore::new(client.clone()), builder),
            connection_info: ConnectionInfoReconciler::new(client.clone()),
            process_module_config: ProcessModuleConfigReconciler::new(client.clone()),
            mapper: NamespaceMapper::new(client.clone(), namespace.clone()),
            payloads: PayloadGenerator::new(client.clone()),
            fanout: SecretFanOut::new(client.clone(), namespace.clone()),
            operator_namespace: namespace,
            client,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let dynakubes: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        let context = Arc::new(self);

        Controller::new(dynakubes, watcher::Config::default())
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled dynakube: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// One reconcile pass. The status is committed even when a step failed.
    #[instrument(skip(self, dynakube, now), fields(dynakube = %dynakube.name_any()))]
    pub async fn apply(&self, dynakube: &DynaKube, now: DateTime<Utc>) -> Result<Action> {
        let mut updated = dynakube.clone();
        let result = self.apply_steps(&mut updated, now).await;
        self.commit_status(dynakube, &updated).await?;

        match result {
            Ok(()) => Ok(Action::requeue(timing::REQUEUE_SUCCESS)),
            Err(e) if e.is_too_many_requests() => {
                info!("Dynatrace API rate limit reached, retrying later");
                Ok(Action::requeue(timing::REQUEUE_TOO_MANY_REQUESTS))
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_steps(&self, dynakube: &mut DynaKube, now: DateTime<Utc>) -> Result<()> {
        let outcome = self.tokens.reconcile(dynakube, now).await?;
        let dtc = outcome.client;
        let mut errors = Vec::new();

        if let Err(e) = self.connection_info.reconcile(dynakube, dtc.as_ref(), now).await {
            errors.push(e);
        }
        if let Err(e) = self.process_module_config.reconcile(dynakube, dtc.as_ref(), now).await {
            errors.push(e);
        }
        if let Err(e) = self.mapper.map_from_dynakube(dynakube, now).await {
            errors.push(e);
        }
        if let Err(e) = self.sync_payloads(dynakube, &outcome.tokens, now).await {
            errors.push(e);
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Generate every payload secret and replicate it, or remove it when no longer wanted
    async fn sync_payloads(&self, dynakube: &mut DynaKube, tokens: &TokenSet, now: DateTime<Utc>) -> Result<()> {
        let name = dynakube.name_any();
        let mut errors = Vec::new();

        for payload in Payload::ALL {
            let secret_name = payload.secret_name();
            let condition_type = payload.condition_type();

            match self.payloads.generate(payload, dynakube, tokens).await {
                Ok(Some(data)) => match self.fanout.replicate(dynakube, secret_name, data).await {
                    Ok(write) => {
                        let conditions = &mut dynakube.status_mut().conditions;
                        set_secret_written(conditions, condition_type, secret_name, write, now);
                    }
                    Err(e) => {
                        set_kube_api_error(&mut dynakube.status_mut().conditions, condition_type, &e, now);
                        errors.push(e);
                    }
                },
                Ok(None) => {
                    if let Err(e) = self.fanout.remove(&name, secret_name).await {
                        errors.push(e);
                    }
                    if let Some(status) = dynakube.status.as_mut() {
                        remove_condition(&mut status.conditions, condition_type);
                    }
                }
                Err(e) => {
                    error!("Failed to generate secret {}: {}", secret_name, e);
                    set_secret_generation_failed(&mut dynakube.status_mut().conditions, condition_type, &e, now);
                    errors.push(e);
                }
            }
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Patch the status subresource when it changed. A conflict means a newer
    /// version exists; its own event reconciles it.
    async fn commit_status(&self, original: &DynaKube, updated: &DynaKube) -> Result<()> {
        if original.status == updated.status {
            debug!("Status unchanged");
            return Ok(());
        }
        let api: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        let patch = json!({
            "metadata": { "resourceVersion": original.resource_version() },
            "status": updated.status,
        });

        match api
            .patch_status(&original.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                info!("DynaKube changed during reconcile, status not written");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Unlabel governed namespaces and delete the replicated secrets
    #[instrument(skip(self, dynakube), fields(dynakube = %dynakube.name_any()))]
    pub async fn cleanup(&self, dynakube: &DynaKube) -> Result<Action> {
        let name = dynakube.name_any();
        let namespaces = self.mapper.unmap_dynakube(&name).await?;
        info!(namespaces = namespaces.len(), "Cleaning up DynaKube");

        let mut errors = Vec::new();
        for payload in Payload::ALL {
            if let Err(e) = self
                .fanout
                .cleanup(&name, payload.secret_name(), &namespaces)
                .await
            {
                errors.push(e);
            }
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(Action::await_change()),
        }
    }
}

async fn reconcile(dynakube: Arc<DynaKube>, ctx: Arc<DynaKubeReconciler>) -> Result<Action> {
    let api: Api<DynaKube> = Api::namespaced(ctx.client.clone(), &ctx.operator_namespace);

    finalizer(&api, FINALIZER, dynakube, |event| async move {
        match event {
            Finalizer::Apply(dk) => ctx.apply(&dk, Utc::now()).await,
            Finalizer::Cleanup(dk) => ctx.cleanup(&dk).await,
        }
    })
    .await
    .map_err(|e| OperatorError::Finalizer(Box::new(e)))
}

fn error_policy(dynakube: Arc<DynaKube>, error: &OperatorError, _ctx: Arc<DynaKubeReconciler>) -> Action {
    error!(dynakube = %dynakube.name_any(), "Reconciliation error: {}", error);
    Action::requeue(timing::REQUEUE_ERROR)
}
