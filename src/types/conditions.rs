// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status conditions and the reason codes the operator reports.
//!
//! Conditions are kept as an ordered list keyed by `type`. Setting a
//! condition only moves `lastTransitionTime` when its status flips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types written by the operator
pub mod types {
    pub const API_TOKEN: &str = "APIToken";
    pub const PAAS_TOKEN: &str = "PaaSToken";
    pub const DATA_INGEST_TOKEN: &str = "DataIngestToken";
    pub const ONEAGENT_CONNECTION_INFO: &str = "OneAgentConnectionInfo";
    pub const ACTIVEGATE_CONNECTION_INFO: &str = "ActiveGateConnectionInfo";
    pub const PROCESS_MODULE_CONFIG: &str = "ProcessModuleConfig";
    pub const ONEAGENT_NAMESPACES: &str = "OneAgentNamespacesMonitored";
    pub const METADATA_ENRICHMENT_NAMESPACES: &str = "MetadataEnrichmentNamespacesMonitored";
    pub const BOOTSTRAPPER_CONFIG: &str = "BootstrapperConfig";
    pub const ENRICHMENT_ENDPOINT: &str = "MetadataEnrichmentEndpoint";
    pub const OTLP_EXPORTER_CONFIG: &str = "OTLPExporterConfiguration";
}

/// Stable reason codes
pub mod reasons {
    pub const SECRET_CREATED: &str = "SecretCreated";
    pub const SECRET_UPDATED: &str = "SecretUpdated";
    pub const SECRET_OUTDATED: &str = "SecretOutdated";
    pub const CONFIG_MAP_CREATED_OR_UPDATED: &str = "ConfigMapCreatedOrUpdated";
    pub const KUBE_API_ERROR: &str = "KubeApiError";
    pub const DYNATRACE_API_ERROR: &str = "DynatraceApiError";
    pub const SECRET_GENERATION_FAILED: &str = "SecretGenerationFailed";
    pub const STATEFUL_SET_CREATED: &str = "StatefulSetCreated";
    pub const STATEFUL_SET_OUTDATED: &str = "StatefulSetOutdated";
    pub const DAEMON_SET_CREATED: &str = "DaemonSetCreated";
    pub const DAEMON_SET_OUTDATED: &str = "DaemonSetOutdated";
    pub const TOKEN_READY: &str = "TokenReady";
    pub const TOKEN_MISSING: &str = "TokenMissing";
    pub const TOKEN_UNAUTHORIZED: &str = "TokenUnauthorized";
    pub const TOKEN_SCOPE_MISSING: &str = "TokenScopeMissing";
    pub const TOKEN_ERROR: &str = "TokenError";
    pub const TOKEN_SECRET_NOT_FOUND: &str = "TokenSecretNotFound";
    pub const NO_MATCHES: &str = "NoMatches";
    pub const MATCHES_FOUND: &str = "MatchesFound";
    pub const SETTINGS_EXIST: &str = "SettingsExist";
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// `None` for conditions written before transition times were tracked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Set a condition, returning whether anything observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition, now: DateTime<Utc>) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message
            {
                return false;
            }
            new.last_transition_time = if existing.status == new.status {
                existing.last_transition_time.or(Some(now))
            } else {
                Some(now)
            };
            *existing = new;
            true
        }
        None => {
            new.last_transition_time = Some(now);
            conditions.push(new);
            true
        }
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Remove a condition by type. Returns whether one was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.condition_type != condition_type);
    before != conditions.len()
}

/// Stamp conditions that lack a transition time, returning whether any were stamped.
pub fn stamp_missing_transition_times(conditions: &mut [Condition], now: DateTime<Utc>) -> bool {
    let mut changed = false;
    for condition in conditions.iter_mut().filter(|c| c.last_transition_time.is_none()) {
        condition.last_transition_time = Some(now);
        changed = true;
    }
    changed
}

pub fn set_kube_api_error(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    err: &dyn std::error::Error,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(
            condition_type,
            ConditionStatus::False,
            reasons::KUBE_API_ERROR,
            format!("A problem occurred when using the Kubernetes API: {}", err),
        ),
        now,
    )
}

pub fn set_dynatrace_api_error(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    err: &dyn std::error::Error,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(
            condition_type,
            ConditionStatus::False,
            reasons::DYNATRACE_API_ERROR,
            format!("A problem occurred when using the Dynatrace API: {}", err),
        ),
        now,
    )
}

pub fn set_secret_created(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    name: &str,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(
            condition_type,
            ConditionStatus::True,
            reasons::SECRET_CREATED,
            format!("{} created", name),
        ),
        now,
    )
}

pub fn set_secret_updated(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    name: &str,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(
            condition_type,
            ConditionStatus::True,
            reasons::SECRET_UPDATED,
            format!("{} updated", name),
        ),
        now,
    )
}

pub fn set_secret_generation_failed(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    err: &dyn std::error::Error,
    now: DateTime<Utc>,
) -> bool {
    set_condition(
        conditions,
        Condition::new(
            condition_type,
            ConditionStatus::False,
            reasons::SECRET_GENERATION_FAILED,
            format!("Failed to generate secret: {}", err),
        ),
        now,
    )
}
