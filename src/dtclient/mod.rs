// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Dynatrace API client: the trait the reconcilers talk to, its request and
//! response types, the HTTP implementation and the factory building it from
//! a DynaKube.

pub mod builder;
pub mod endpoints;
pub mod http;
pub mod proxy;
pub mod tokens;

use crate::error::DynatraceApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use builder::{DynatraceClientBuilder, DynatraceClientFactory};
pub use endpoints::CommunicationHost;
pub use self::http::{ClientOptions, DynatraceHttpClient};
pub use proxy::ProxyUrl;
pub use tokens::{TokenSet, TokenStore};

pub type DtResult<T> = std::result::Result<T, DynatraceApiError>;

pub const SCOPE_INSTALLER_DOWNLOAD: &str = "InstallerDownload";
pub const SCOPE_DATA_EXPORT: &str = "DataExport";
pub const SCOPE_METRICS_INGEST: &str = "metrics.ingest";

pub const MARKED_FOR_TERMINATION_EVENT: &str = "MARKED_FOR_TERMINATION";
pub const EVENT_SOURCE: &str = "Dynatrace Operator";
pub const MARKED_FOR_TERMINATION_DESCRIPTION: &str =
    "Kubernetes node cordoned. Node might be drained or terminated.";

/// Operations the operator performs against a Dynatrace environment
#[async_trait]
pub trait DynatraceClient: Send + Sync {
    async fn get_token_scopes(&self, token: &str) -> DtResult<TokenScopes>;

    async fn get_oneagent_connection_info(&self) -> DtResult<OneAgentConnectionInfo>;

    async fn get_activegate_connection_info(&self) -> DtResult<ActiveGateConnectionInfo>;

    async fn get_process_module_config(&self, prev_revision: u64) -> DtResult<ProcessModuleConfig>;

    async fn get_entity_id_for_ip(&self, ip: &str) -> DtResult<String>;

    async fn send_event(&self, event: &EventData) -> DtResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenScopes(pub Vec<String>);

impl TokenScopes {
    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    /// Required scopes not granted, in the order given
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|scope| !self.contains(scope))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<S> for TokenScopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TokenScopes(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OneAgentConnectionInfo {
    pub tenant_uuid: String,
    pub tenant_token: String,
    /// Communication endpoints joined by `;`
    pub endpoints: String,
    pub communication_hosts: Vec<CommunicationHost>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveGateConnectionInfo {
    pub tenant_uuid: String,
    pub tenant_token: String,
    /// Comma separated endpoint URLs
    pub endpoints: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProcessModuleConfig {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub properties: Vec<ProcessModuleProperty>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessModuleProperty {
    pub section: String,
    pub key: String,
    pub value: String,
}

const GENERAL_SECTION: &str = "general";

impl ProcessModuleConfig {
    fn set(&mut self, section: &str, key: &str, value: &str) {
        if value.is_empty() {
            self.properties
                .retain(|p| !(p.section == section && p.key == key));
            return;
        }
        match self
            .properties
            .iter_mut()
            .find(|p| p.section == section && p.key == key)
        {
            Some(prop) => prop.value = value.to_string(),
            None => self.properties.push(ProcessModuleProperty {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.section == section && p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn add_host_group(mut self, host_group: &str) -> Self {
        self.set(GENERAL_SECTION, "hostGroup", host_group);
        self
    }

    pub fn add_connection_info(mut self, tenant_uuid: &str, tenant_token: &str, endpoints: &str) -> Self {
        self.set(GENERAL_SECTION, "tenant", tenant_uuid);
        self.set(GENERAL_SECTION, "tenantToken", tenant_token);
        let server_address = if endpoints.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", endpoints)
        };
        self.set(GENERAL_SECTION, "serverAddress", &server_address);
        self
    }

    pub fn add_proxy(mut self, proxy: &str) -> Self {
        self.set(GENERAL_SECTION, "proxy", proxy);
        self
    }

    pub fn add_no_proxy(mut self, no_proxy: &str) -> Self {
        self.set(GENERAL_SECTION, "noProxy", no_proxy);
        self
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub event_type: String,
    pub source: String,
    pub description: String,
    pub start_in_millis: u64,
    pub end_in_millis: u64,
    pub attach_rules: EventAttachRules,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventAttachRules {
    pub entity_ids: Vec<String>,
}

impl EventData {
    /// Event telling the tenant a host is about to disappear
    pub fn marked_for_termination(entity_id: &str, timestamp_millis: u64) -> Self {
        Self {
            event_type: MARKED_FOR_TERMINATION_EVENT.to_string(),
            source: EVENT_SOURCE.to_string(),
            description: MARKED_FOR_TERMINATION_DESCRIPTION.to_string(),
            start_in_millis: timestamp_millis,
            end_in_millis: timestamp_millis,
            attach_rules: EventAttachRules {
                entity_ids: vec![entity_id.to_string()],
            },
        }
    }
}
