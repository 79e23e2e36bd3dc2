// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::names;
use crate::types::conditions::Condition;
use crate::types::feature_flags::FeatureFlags;
use crate::types::selector::LabelSelector;
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "dynatrace.com", version = "v1beta1", kind = "DynaKube")]
#[kube(namespaced)]
#[kube(status = "DynaKubeStatus")]
#[kube(shortname = "dk")]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeSpec {
    /// Dynatrace environment API endpoint, e.g. `https://<id>.live.dynatrace.com/api`
    pub api_url: String,
    /// Name of the secret holding the tokens, defaults to the DynaKube name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_zone: Option<String>,
    #[serde(default)]
    pub skip_cert_check: bool,
    /// Config map holding a CA bundle under `certs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_cas: Option<String>,
    /// Secret holding the ActiveGate TLS certificate under `server.crt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    #[serde(default)]
    pub one_agent: OneAgentSpec,
    #[serde(default)]
    pub metadata_enrichment: MetadataEnrichmentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_gate: Option<ActiveGateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_exporter_configuration: Option<OtlpExporterConfigurationSpec>,
}

/// Proxy given inline or by reference to a secret with a `proxy` field
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_native_full_stack: Option<InjectionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_monitoring: Option<InjectionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_group: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InjectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEnrichmentSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateSpec {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtlpExporterConfigurationSpec {
    #[serde(default)]
    pub signals: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DynaKubeStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_api_token_probe_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_paas_token_probe_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_data_ingest_token_probe_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub one_agent: OneAgentStatus,
    #[serde(default)]
    pub active_gate: ActiveGateStatus,
    #[serde(default)]
    pub process_module_config: ProcessModuleConfigStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentStatus {
    /// OneAgent instances keyed by node name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, OneAgentInstance>,
    #[serde(default)]
    pub connection_info_status: OneAgentConnectionInfoStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentInstance {
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfoStatus {
    #[serde(default, rename = "tenantUUID")]
    pub tenant_uuid: String,
    /// Communication endpoints joined by `;`
    #[serde(default)]
    pub endpoints: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentConnectionInfoStatus {
    #[serde(flatten)]
    pub connection_info: ConnectionInfoStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub communication_hosts: Vec<CommunicationHostStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct CommunicationHostStatus {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveGateStatus {
    #[serde(default)]
    pub connection_info_status: ConnectionInfoStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessModuleConfigStatus {
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_request: Option<DateTime<Utc>>,
}

impl DynaKube {
    pub fn feature_flags(&self) -> FeatureFlags<'_> {
        FeatureFlags::new(self.annotations())
    }

    pub fn api_url(&self) -> &str {
        self.spec.api_url.trim_end_matches('/')
    }

    /// Name of the secret holding the tokens
    pub fn tokens_secret_name(&self) -> String {
        self.spec
            .tokens
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.name_any())
    }

    pub fn oneagent_injection_enabled(&self) -> bool {
        self.spec.one_agent.cloud_native_full_stack.is_some()
            || self.spec.one_agent.application_monitoring.is_some()
    }

    pub fn oneagent_namespace_selector(&self) -> Option<&LabelSelector> {
        self.spec
            .one_agent
            .cloud_native_full_stack
            .as_ref()
            .or(self.spec.one_agent.application_monitoring.as_ref())
            .and_then(|i| i.namespace_selector.as_ref())
    }

    pub fn metadata_enrichment_enabled(&self) -> bool {
        self.spec.metadata_enrichment.enabled
    }

    pub fn metadata_enrichment_namespace_selector(&self) -> Option<&LabelSelector> {
        self.spec.metadata_enrichment.namespace_selector.as_ref()
    }

    /// Whether this DynaKube governs any namespaces at all
    pub fn needs_namespace_mapping(&self) -> bool {
        self.oneagent_injection_enabled() || self.metadata_enrichment_enabled()
    }

    pub fn cloud_native_enabled(&self) -> bool {
        self.spec.one_agent.cloud_native_full_stack.is_some()
    }

    pub fn activegate_enabled(&self) -> bool {
        self.spec
            .active_gate
            .as_ref()
            .is_some_and(|ag| !ag.capabilities.is_empty())
    }

    pub fn otlp_exporter_enabled(&self) -> bool {
        self.spec.otlp_exporter_configuration.is_some()
    }

    pub fn host_group(&self) -> Option<&str> {
        self.spec
            .one_agent
            .host_group
            .as_deref()
            .filter(|h| !h.is_empty())
    }

    pub fn network_zone(&self) -> Option<&str> {
        self.spec
            .network_zone
            .as_deref()
            .filter(|z| !z.is_empty())
    }

    pub fn oneagent_tenant_secret_name(&self) -> String {
        format!("{}{}", self.name_any(), names::ONEAGENT_TENANT_SECRET_SUFFIX)
    }

    pub fn activegate_tenant_secret_name(&self) -> String {
        format!("{}{}", self.name_any(), names::ACTIVEGATE_TENANT_SECRET_SUFFIX)
    }

    pub fn pmc_secret_name(&self) -> String {
        format!("{}{}", self.name_any(), names::PMC_SECRET_SUFFIX)
    }

    pub fn activegate_tls_secret_name(&self) -> Option<String> {
        match self.spec.tls_secret_name.as_deref().filter(|s| !s.is_empty()) {
            Some(name) => Some(name.to_string()),
            None if self.activegate_enabled()
                && self.feature_flags().automatic_tls_certificate() =>
            {
                Some(format!(
                    "{}{}",
                    self.name_any(),
                    names::ACTIVEGATE_TLS_SECRET_SUFFIX
                ))
            }
            None => None,
        }
    }

    /// Tenant UUID known from OneAgent connection info, falling back to ActiveGate
    pub fn tenant_uuid(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        [
            &status.one_agent.connection_info_status.connection_info.tenant_uuid,
            &status.active_gate.connection_info_status.tenant_uuid,
        ]
        .into_iter()
        .find(|uuid| !uuid.is_empty())
        .map(String::as_str)
    }

    pub fn status_mut(&mut self) -> &mut DynaKubeStatus {
        self.status.get_or_insert_with(DynaKubeStatus::default)
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
