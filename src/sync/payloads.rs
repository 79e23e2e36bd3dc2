// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Content of the secrets replicated into governed namespaces.

use crate::constants::names;
use crate::dtclient::builder::{load_trusted_cas, resolve_proxy};
use crate::dtclient::endpoints::parse_activegate_endpoints;
use crate::dtclient::{ProcessModuleConfig, TokenSet};
use crate::error::{OperatorError, Result};
use crate::kubernetes::secrets::{get_secret, get_secret_field, secret_field};
use crate::kubernetes::SecretData;
use crate::reconcilers::process_module_config::load_process_module_config;
use crate::types::conditions;
use crate::types::DynaKube;
use k8s_openapi::ByteString;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const RUXITAGENTPROC_CONF_KEY: &str = "ruxitagentproc.conf";
pub const CONFIG_JSON_KEY: &str = "config.json";
pub const NODES_JSON_KEY: &str = "nodes.json";
pub const CURL_OPTIONS_KEY: &str = "curl_options.conf";
pub const TRUSTED_CAS_KEY: &str = "trustedcas.pem";
pub const ACTIVEGATE_CA_KEY: &str = "activegate.pem";
pub const ENDPOINT_PROPERTIES_KEY: &str = "endpoint.properties";
pub const OTLP_ENDPOINT_KEY: &str = "DT_ENDPOINT";
pub const OTLP_API_TOKEN_KEY: &str = "DT_API_TOKEN";
pub const OTLP_CERTS_KEY: &str = "certs";

/// The secrets replicated into every governed namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    BootstrapperConfig,
    EnrichmentEndpoint,
    OtlpExporterConfig,
}

impl Payload {
    pub const ALL: [Payload; 3] = [
        Payload::BootstrapperConfig,
        Payload::EnrichmentEndpoint,
        Payload::OtlpExporterConfig,
    ];

    pub fn secret_name(self) -> &'static str {
        match self {
            Payload::BootstrapperConfig => names::BOOTSTRAPPER_CONFIG_SECRET,
            Payload::EnrichmentEndpoint => names::ENRICHMENT_ENDPOINT_SECRET,
            Payload::OtlpExporterConfig => names::OTLP_EXPORTER_SECRET,
        }
    }

    pub fn condition_type(self) -> &'static str {
        match self {
            Payload::BootstrapperConfig => conditions::types::BOOTSTRAPPER_CONFIG,
            Payload::EnrichmentEndpoint => conditions::types::ENRICHMENT_ENDPOINT,
            Payload::OtlpExporterConfig => conditions::types::OTLP_EXPORTER_CONFIG,
        }
    }

    pub fn secret_names() -> Vec<&'static str> {
        Self::ALL.iter().map(|p| p.secret_name()).collect()
    }
}

fn generation_error(payload: Payload, reason: impl Into<String>) -> OperatorError {
    OperatorError::SecretGeneration {
        secret: payload.secret_name().to_string(),
        reason: reason.into(),
    }
}

fn insert(data: &mut SecretData, key: &str, value: impl Into<Vec<u8>>) {
    data.insert(key.to_string(), ByteString(value.into()));
}

/// Render a process-module config in the agent's `ruxitagentproc.conf` format
pub fn render_process_module_config(config: &ProcessModuleConfig) -> String {
    let mut sections: Vec<&str> = Vec::new();
    for property in &config.properties {
        if !sections.contains(&property.section.as_str()) {
            sections.push(&property.section);
        }
    }

    let mut out = String::new();
    for section in sections {
        let _ = writeln!(out, "[{}]", section);
        for property in config.properties.iter().filter(|p| p.section == section) {
            let _ = writeln!(out, "{} {}", property.key, property.value);
        }
    }
    out
}

/// No-proxy list of the flag plus the hosts of the ActiveGate endpoints
fn no_proxy_hosts(dynakube: &DynaKube) -> String {
    let mut hosts: Vec<String> = dynakube
        .feature_flags()
        .no_proxy()
        .map(|v| v.split(',').map(|h| h.trim().to_string()).filter(|h| !h.is_empty()).collect())
        .unwrap_or_default();

    if let Some(status) = dynakube.status.as_ref() {
        for endpoint in parse_activegate_endpoints(&status.active_gate.connection_info_status.endpoints) {
            if !hosts.contains(&endpoint.host) {
                hosts.push(endpoint.host);
            }
        }
    }
    hosts.join(",")
}

/// Builds payload secret data from the state of a DynaKube
#[derive(Clone)]
pub struct PayloadGenerator {
    client: Client,
}

impl PayloadGenerator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Data of `payload` for `dynakube`, `None` when the payload is not wanted
    pub async fn generate(
        &self,
        payload: Payload,
        dynakube: &DynaKube,
        tokens: &TokenSet,
    ) -> Result<Option<SecretData>> {
        match payload {
            Payload::BootstrapperConfig => self.bootstrapper_config(dynakube).await,
            Payload::EnrichmentEndpoint => Ok(enrichment_endpoint(dynakube, tokens)),
            Payload::OtlpExporterConfig => self.otlp_exporter_config(dynakube, tokens).await,
        }
    }

    async fn bootstrapper_config(&self, dynakube: &DynaKube) -> Result<Option<SecretData>> {
        if !dynakube.needs_namespace_mapping() {
            return Ok(None);
        }
        let payload = Payload::BootstrapperConfig;
        let tenant_uuid = dynakube
            .tenant_uuid()
            .ok_or_else(|| generation_error(payload, "tenant UUID is not known yet"))?
            .to_string();
        let flags = dynakube.feature_flags();
        let mut data = SecretData::new();

        if dynakube.oneagent_injection_enabled() {
            let config = self.agent_process_module_config(dynakube, &tenant_uuid).await?;
            insert(&mut data, RUXITAGENTPROC_CONF_KEY, render_process_module_config(&config));
        }

        let config = json!({
            "tenantUUID": tenant_uuid,
            "enforcementMode": flags.enforcement_mode(),
        });
        insert(&mut data, CONFIG_JSON_KEY, serde_json::to_vec(&config)?);

        let nodes: BTreeMap<&str, &str> = dynakube
            .status
            .iter()
            .flat_map(|s| s.one_agent.instances.iter())
            .filter(|(_, instance)| !instance.ip_address.is_empty() || flags.ignore_unknown_state())
            .map(|(node, _)| (node.as_str(), tenant_uuid.as_str()))
            .collect();
        insert(&mut data, NODES_JSON_KEY, serde_json::to_vec(&nodes)?);

        if let Some(retry_ms) = flags.initial_connect_retry_ms() {
            insert(&mut data, CURL_OPTIONS_KEY, format!("initialConnectRetryMs {}\n", retry_ms));
        }

        if let Some(cas) = load_trusted_cas(&self.client, dynakube).await? {
            insert(&mut data, TRUSTED_CAS_KEY, cas);
        }

        if let Some(cert) = self.activegate_certificate(dynakube).await? {
            insert(&mut data, ACTIVEGATE_CA_KEY, cert);
        }

        Ok(Some(data))
    }

    /// Tenant process-module config completed with the connection settings of this cluster
    async fn agent_process_module_config(
        &self,
        dynakube: &DynaKube,
        tenant_uuid: &str,
    ) -> Result<ProcessModuleConfig> {
        let namespace = dynakube.namespace().unwrap_or_default();
        let tenant_token = get_secret_field(
            &self.client,
            &namespace,
            &dynakube.oneagent_tenant_secret_name(),
            names::TENANT_TOKEN_KEY,
        )
        .await?;
        let endpoints = dynakube
            .status
            .as_ref()
            .map(|s| s.one_agent.connection_info_status.connection_info.endpoints.clone())
            .unwrap_or_default();
        let proxy = resolve_proxy(&self.client, dynakube)
            .await?
            .map(|p| p.to_string())
            .unwrap_or_default();

        let config = load_process_module_config(&self.client, dynakube)
            .await?
            .unwrap_or_default()
            .add_host_group(dynakube.host_group().unwrap_or_default())
            .add_connection_info(tenant_uuid, &tenant_token, &endpoints)
            .add_proxy(&proxy)
            .add_no_proxy(&no_proxy_hosts(dynakube));
        Ok(config)
    }

    /// The ActiveGate certificate agents must trust. An automatic certificate that was
    /// not generated yet is skipped; a configured TLS secret must exist.
    async fn activegate_certificate(&self, dynakube: &DynaKube) -> Result<Option<Vec<u8>>> {
        let Some(name) = dynakube.activegate_tls_secret_name() else {
            return Ok(None);
        };
        let namespace = dynakube.namespace().unwrap_or_default();
        let Some(secret) = get_secret(&self.client, &namespace, &name).await? else {
            if dynakube.spec.tls_secret_name.is_some() {
                return Err(OperatorError::SecretNotFound(format!("{}:{}", namespace, name)));
            }
            return Ok(None);
        };
        secret_field(&secret, names::TLS_CERT_KEY)
            .map(|cert| Some(cert.to_vec()))
            .ok_or_else(|| OperatorError::SecretFieldMissing {
                secret: format!("{}:{}", namespace, name),
                field: names::TLS_CERT_KEY.to_string(),
            })
    }

    async fn otlp_exporter_config(
        &self,
        dynakube: &DynaKube,
        tokens: &TokenSet,
    ) -> Result<Option<SecretData>> {
        let Some(token) = data_ingest_token(dynakube.otlp_exporter_enabled(), tokens) else {
            return Ok(None);
        };
        let mut data = SecretData::new();
        insert(&mut data, OTLP_ENDPOINT_KEY, format!("{}/v2/otlp", dynakube.api_url()));
        insert(&mut data, OTLP_API_TOKEN_KEY, token);
        if let Some(cas) = load_trusted_cas(&self.client, dynakube).await? {
            insert(&mut data, OTLP_CERTS_KEY, cas);
        }
        Ok(Some(data))
    }
}

fn data_ingest_token(enabled: bool, tokens: &TokenSet) -> Option<&str> {
    if !enabled {
        return None;
    }
    tokens.data_ingest_token.as_deref().filter(|t| !t.is_empty())
}

fn enrichment_endpoint(dynakube: &DynaKube, tokens: &TokenSet) -> Option<SecretData> {
    let token = data_ingest_token(dynakube.metadata_enrichment_enabled(), tokens)?;
    let properties = format!(
        "DT_METRICS_INGEST_URL={}/v2/metrics/ingest\nDT_METRICS_INGEST_API_TOKEN={}\n",
        dynakube.api_url(),
        token
    );
    let mut data = SecretData::new();
    insert(&mut data, ENDPOINT_PROPERTIES_KEY, properties);
    Some(data)
}
