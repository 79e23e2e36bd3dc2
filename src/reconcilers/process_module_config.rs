// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeps the tenant's process-module config in `<dynakube>-pmc-secret`.

use super::{is_request_outdated, set_secret_written, tenant_secret_labels};
use crate::constants::names;
use crate::dtclient::{DynatraceClient, ProcessModuleConfig};
use crate::error::Result;
use crate::kubernetes::secrets::{
    build_secret, create_or_update_secret, delete_secret, get_secret, secret_field,
};
use crate::types::conditions::{self, remove_condition};
use crate::types::dynakube::ProcessModuleConfigStatus;
use crate::types::DynaKube;
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct ProcessModuleConfigReconciler {
    client: Client,
}

/// Read the stored process-module config of a DynaKube, `None` when not fetched yet
pub async fn load_process_module_config(
    client: &Client,
    dynakube: &DynaKube,
) -> Result<Option<ProcessModuleConfig>> {
    let namespace = dynakube.namespace().unwrap_or_default();
    let Some(secret) = get_secret(client, &namespace, &dynakube.pmc_secret_name()).await? else {
        return Ok(None);
    };
    match secret_field(&secret, names::PMC_KEY) {
        Some(raw) => Ok(Some(serde_json::from_slice(raw)?)),
        None => Ok(None),
    }
}

impl ProcessModuleConfigReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[instrument(skip(self, dynakube, dtc, now), fields(dynakube = %dynakube.name_any()))]
    pub async fn reconcile(
        &self,
        dynakube: &mut DynaKube,
        dtc: &dyn DynatraceClient,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let condition_type = conditions::types::PROCESS_MODULE_CONFIG;
        let namespace = dynakube.namespace().unwrap_or_default();
        let secret_name = dynakube.pmc_secret_name();

        if !dynakube.oneagent_injection_enabled() {
            delete_secret(&self.client, &namespace, &secret_name).await?;
            if let Some(status) = dynakube.status.as_mut() {
                status.process_module_config = ProcessModuleConfigStatus::default();
                remove_condition(&mut status.conditions, condition_type);
            }
            return Ok(());
        }

        let last_request = dynakube
            .status
            .as_ref()
            .and_then(|s| s.process_module_config.last_request);
        let threshold = dynakube.feature_flags().api_request_threshold();
        let outdated = is_request_outdated(last_request, threshold, now)
            || get_secret(&self.client, &namespace, &secret_name).await?.is_none();
        if !outdated {
            debug!("Process module config is still valid");
            return Ok(());
        }

        let config = match dtc.get_process_module_config(0).await {
            Ok(config) => config,
            Err(e) => {
                if !e.is_too_many_requests() {
                    conditions::set_dynatrace_api_error(
                        &mut dynakube.status_mut().conditions,
                        condition_type,
                        &e,
                        now,
                    );
                }
                return Err(e.into());
            }
        };

        let data = BTreeMap::from([(
            names::PMC_KEY.to_string(),
            ByteString(serde_json::to_vec(&config)?),
        )]);
        let secret = build_secret(
            &secret_name,
            &namespace,
            data,
            tenant_secret_labels(dynakube),
            dynakube.controller_owner_ref(&()),
        );

        match create_or_update_secret(&self.client, &secret).await {
            Ok(write) => {
                let status = dynakube.status_mut();
                set_secret_written(&mut status.conditions, condition_type, &secret_name, write, now);
                status.process_module_config = ProcessModuleConfigStatus {
                    revision: config.revision,
                    last_request: Some(now),
                };
                info!(revision = config.revision, "Process module config updated");
                Ok(())
            }
            Err(e) => {
                conditions::set_kube_api_error(&mut dynakube.status_mut().conditions, condition_type, &e, now);
                Err(e)
            }
        }
    }
}
