// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Connection info for OneAgent and ActiveGate.
//!
//! Each flavor keeps its own throttle clock in status and stores the tenant
//! token in a `<dynakube>-<flavor>-tenant-secret` in the operator namespace.

use super::{is_request_outdated, set_secret_written, tenant_secret_labels};
use crate::constants::names;
use crate::dtclient::DynatraceClient;
use crate::error::{OperatorError, Result};
use crate::kubernetes::secrets::{build_secret, create_or_update_secret, delete_secret, get_secret};
use crate::types::conditions::{self, remove_condition};
use crate::types::dynakube::{ActiveGateStatus, OneAgentConnectionInfoStatus};
use crate::types::DynaKube;
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct ConnectionInfoReconciler {
    client: Client,
}

fn tenant_secret_data(tenant_token: &str) -> BTreeMap<String, ByteString> {
    BTreeMap::from([(
        names::TENANT_TOKEN_KEY.to_string(),
        ByteString(tenant_token.as_bytes().to_vec()),
    )])
}

/// Record a Dynatrace API failure on the flavor's condition. Rate limits leave the condition alone.
fn record_dynatrace_error(
    dynakube: &mut DynaKube,
    condition_type: &str,
    err: crate::error::DynatraceApiError,
    now: DateTime<Utc>,
) -> OperatorError {
    if !err.is_too_many_requests() {
        conditions::set_dynatrace_api_error(&mut dynakube.status_mut().conditions, condition_type, &err, now);
    }
    err.into()
}

impl ConnectionInfoReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Refresh connection info of both flavors. ActiveGate still runs when OneAgent failed.
    #[instrument(skip(self, dynakube, dtc, now), fields(dynakube = %dynakube.name_any()))]
    pub async fn reconcile(
        &self,
        dynakube: &mut DynaKube,
        dtc: &dyn DynatraceClient,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let oneagent = self.reconcile_oneagent(dynakube, dtc, now).await;
        let activegate = self.reconcile_activegate(dynakube, dtc, now).await;

        let errors = [oneagent, activegate]
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn needs_update(
        &self,
        dynakube: &DynaKube,
        secret_name: &str,
        last_request: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let threshold = dynakube.feature_flags().api_request_threshold();
        if is_request_outdated(last_request, threshold, now) {
            return Ok(true);
        }
        let namespace = dynakube.namespace().unwrap_or_default();
        Ok(get_secret(&self.client, &namespace, secret_name).await?.is_none())
    }

    async fn write_tenant_secret(
        &self,
        dynakube: &mut DynaKube,
        condition_type: &str,
        secret_name: &str,
        tenant_token: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let namespace = dynakube.namespace().unwrap_or_default();
        let secret = build_secret(
            secret_name,
            &namespace,
            tenant_secret_data(tenant_token),
            tenant_secret_labels(dynakube),
            dynakube.controller_owner_ref(&()),
        );

        match create_or_update_secret(&self.client, &secret).await {
            Ok(write) => {
                set_secret_written(&mut dynakube.status_mut().conditions, condition_type, secret_name, write, now);
                Ok(())
            }
            Err(e) => {
                conditions::set_kube_api_error(&mut dynakube.status_mut().conditions, condition_type, &e, now);
                Err(e)
            }
        }
    }

    async fn reconcile_oneagent(
        &self,
        dynakube: &mut DynaKube,
        dtc: &dyn DynatraceClient,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let condition_type = conditions::types::ONEAGENT_CONNECTION_INFO;
        let secret_name = dynakube.oneagent_tenant_secret_name();

        if !dynakube.needs_namespace_mapping() {
            return self.cleanup_oneagent(dynakube, &secret_name).await;
        }

        let last_request = dynakube
            .status
            .as_ref()
            .and_then(|s| s.one_agent.connection_info_status.connection_info.last_request);
        if !self.needs_update(dynakube, &secret_name, last_request, now).await? {
            debug!("OneAgent connection info cache is still valid");
            return Ok(());
        }

        let info = match dtc.get_oneagent_connection_info().await {
            Ok(info) => info,
            Err(e) => return Err(record_dynatrace_error(dynakube, condition_type, e, now)),
        };

        let status = &mut dynakube.status_mut().one_agent.connection_info_status;
        status.connection_info.tenant_uuid = info.tenant_uuid.clone();
        status.connection_info.endpoints = info.endpoints.clone();
        status.communication_hosts = info.communication_hosts.iter().map(Into::into).collect();

        self.write_tenant_secret(dynakube, condition_type, &secret_name, &info.tenant_token, now)
            .await?;

        if info.communication_hosts.is_empty() {
            // lastRequest stays untouched so a tenant without communication
            // hosts is asked again on the next reconcile instead of being
            // hidden behind the api-request threshold.
            warn!(tenant = %info.tenant_uuid, "Tenant returned no OneAgent communication hosts");
            let err = OperatorError::NoOneAgentCommunicationHosts;
            conditions::set_dynatrace_api_error(&mut dynakube.status_mut().conditions, condition_type, &err, now);
            return Err(err);
        }

        dynakube
            .status_mut()
            .one_agent
            .connection_info_status
            .connection_info
            .last_request = Some(now);
        info!(tenant = %info.tenant_uuid, "OneAgent connection info updated");
        Ok(())
    }

    async fn reconcile_activegate(
        &self,
        dynakube: &mut DynaKube,
        dtc: &dyn DynatraceClient,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let condition_type = conditions::types::ACTIVEGATE_CONNECTION_INFO;
        let secret_name = dynakube.activegate_tenant_secret_name();

        if !dynakube.activegate_enabled() {
            return self.cleanup_activegate(dynakube, &secret_name).await;
        }

        let last_request = dynakube
            .status
            .as_ref()
            .and_then(|s| s.active_gate.connection_info_status.last_request);
        if !self.needs_update(dynakube, &secret_name, last_request, now).await? {
            debug!("ActiveGate connection info cache is still valid");
            return Ok(());
        }

        let info = match dtc.get_activegate_connection_info().await {
            Ok(info) => info,
            Err(e) => return Err(record_dynatrace_error(dynakube, condition_type, e, now)),
        };

        let status = &mut dynakube.status_mut().active_gate.connection_info_status;
        status.tenant_uuid = info.tenant_uuid.clone();
        status.endpoints = info.endpoints.clone();

        self.write_tenant_secret(dynakube, condition_type, &secret_name, &info.tenant_token, now)
            .await?;

        dynakube
            .status_mut()
            .active_gate
            .connection_info_status
            .last_request = Some(now);
        info!(tenant = %info.tenant_uuid, "ActiveGate connection info updated");
        Ok(())
    }

    async fn cleanup_oneagent(&self, dynakube: &mut DynaKube, secret_name: &str) -> Result<()> {
        let namespace = dynakube.namespace().unwrap_or_default();
        if delete_secret(&self.client, &namespace, secret_name).await? {
            debug!(secret = secret_name, "Removed OneAgent tenant secret");
        }
        if let Some(status) = dynakube.status.as_mut() {
            status.one_agent.connection_info_status = OneAgentConnectionInfoStatus::default();
            remove_condition(&mut status.conditions, conditions::types::ONEAGENT_CONNECTION_INFO);
        }
        Ok(())
    }

    async fn cleanup_activegate(&self, dynakube: &mut DynaKube, secret_name: &str) -> Result<()> {
        let namespace = dynakube.namespace().unwrap_or_default();
        if delete_secret(&self.client, &namespace, secret_name).await? {
            debug!(secret = secret_name, "Removed ActiveGate tenant secret");
        }
        if let Some(status) = dynakube.status.as_mut() {
            status.active_gate = ActiveGateStatus::default();
            remove_condition(&mut status.conditions, conditions::types::ACTIVEGATE_CONNECTION_INFO);
        }
        Ok(())
    }
}
