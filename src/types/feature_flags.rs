// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Typed access to the `feature.dynatrace.com/*` annotations of a DynaKube.

use crate::constants::{features, timing};
use chrono::Duration;
use std::collections::BTreeMap;
use tracing::warn;

/// Default regexps for namespaces never governed by a DynaKube.
/// `{namespace}` is replaced with the DynaKube's own namespace.
const DEFAULT_IGNORED_NAMESPACES: &[&str] = &[
    "^{namespace}$",
    "^kube-.*",
    "^openshift(-.*)?",
    "^gke-.*",
    "^gmp-.*",
];

pub struct FeatureFlags<'a> {
    annotations: &'a BTreeMap<String, String>,
}

impl<'a> FeatureFlags<'a> {
    pub fn new(annotations: &'a BTreeMap<String, String>) -> Self {
        Self { annotations }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.annotations.get(key).map(String::as_str)
    }

    fn is_true(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    fn is_not_false(&self, key: &str) -> bool {
        self.get(key) != Some("false")
    }

    /// Ignore list for namespace mapping, the annotation overrides the defaults entirely
    pub fn ignored_namespaces(&self, own_namespace: &str) -> Vec<String> {
        if let Some(raw) = self.get(features::IGNORED_NAMESPACES) {
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(patterns) => return patterns,
                Err(e) => warn!(
                    "Invalid {} annotation, using defaults: {}",
                    features::IGNORED_NAMESPACES,
                    e
                ),
            }
        }

        DEFAULT_IGNORED_NAMESPACES
            .iter()
            .map(|p| p.replace("{namespace}", own_namespace))
            .collect()
    }

    pub fn no_proxy(&self) -> Option<&'a str> {
        self.get(features::NO_PROXY).filter(|v| !v.is_empty())
    }

    pub fn ignore_proxy(&self) -> bool {
        self.is_true(features::IGNORE_PROXY)
    }

    /// Initial connect retry for code modules in milliseconds, `None` when unset
    pub fn initial_connect_retry_ms(&self) -> Option<i64> {
        let raw = self.get(features::INITIAL_CONNECT_RETRY_MS)?;
        match raw.parse::<i64>() {
            Ok(ms) if ms >= 0 => Some(ms),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Invalid {} annotation '{}': {}",
                    features::INITIAL_CONNECT_RETRY_MS,
                    raw,
                    e
                );
                None
            }
        }
    }

    /// Minimum time between two throttled Dynatrace API requests
    pub fn api_request_threshold(&self) -> Duration {
        let minutes = match self.get(features::API_REQUEST_THRESHOLD) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(m) if m >= 0 => m,
                _ => {
                    warn!(
                        "Invalid {} annotation '{}', using default",
                        features::API_REQUEST_THRESHOLD,
                        raw
                    );
                    timing::DEFAULT_API_REQUEST_THRESHOLD_MINUTES
                }
            },
            None => timing::DEFAULT_API_REQUEST_THRESHOLD_MINUTES,
        };
        Duration::minutes(minutes)
    }

    pub fn automatic_tls_certificate(&self) -> bool {
        self.is_not_false(features::AUTOMATIC_TLS_CERTIFICATE)
    }

    pub fn ignore_unknown_state(&self) -> bool {
        self.is_true(features::IGNORE_UNKNOWN_STATE)
    }

    pub fn enforcement_mode(&self) -> bool {
        self.is_not_false(features::ENFORCEMENT_MODE)
    }

    pub fn disable_hosts_requests(&self) -> bool {
        self.is_true(features::DISABLE_HOSTS_REQUESTS)
    }
}
