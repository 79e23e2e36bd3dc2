// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconcilers for DynaKubes and namespaces, and the per-DynaKube steps they run.

pub mod connection_info;
pub mod dynakube;
pub mod namespace;
pub mod process_module_config;
pub mod tokens;

pub use connection_info::ConnectionInfoReconciler;
pub use dynakube::DynaKubeReconciler;
pub use namespace::NamespaceReconciler;
pub use process_module_config::ProcessModuleConfigReconciler;
pub use tokens::{TokenOutcome, TokenReconciler};

use crate::constants::{labels, OPERATOR_NAME};
use crate::kubernetes::SecretWrite;
use crate::types::conditions::{self, find_condition, Condition};
use crate::types::DynaKube;
use chrono::{DateTime, Duration, Utc};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Whether a throttled Dynatrace request is due again
pub fn is_request_outdated(last_request: Option<DateTime<Utc>>, threshold: Duration, now: DateTime<Utc>) -> bool {
    match last_request {
        Some(last) => now - last > threshold,
        None => true,
    }
}

/// Labels on secrets the operator keeps in its own namespace for a DynaKube
pub fn tenant_secret_labels(dynakube: &DynaKube) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        (labels::APP_CREATED_BY.to_string(), dynakube.name_any()),
    ])
}

/// Report a secret write on a condition. An unchanged secret keeps a condition that is already true.
pub fn set_secret_written(
    list: &mut Vec<Condition>,
    condition_type: &str,
    name: &str,
    write: SecretWrite,
    now: DateTime<Utc>,
) -> bool {
    match write {
        SecretWrite::Created => conditions::set_secret_created(list, condition_type, name, now),
        SecretWrite::Unchanged
            if find_condition(list, condition_type).is_some_and(Condition::is_true) =>
        {
            false
        }
        SecretWrite::Updated | SecretWrite::Unchanged => {
            conditions::set_secret_updated(list, condition_type, name, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minute: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-03-01T10:{:02}:00Z", minute))
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_is_request_outdated() {
        let threshold = Duration::minutes(15);
        assert!(is_request_outdated(None, threshold, ts(0)));
        assert!(!is_request_outdated(Some(ts(0)), threshold, ts(15)));
        assert!(is_request_outdated(Some(ts(0)), threshold, ts(16)));
    }

    #[test]
    fn test_unchanged_secret_keeps_true_condition() {
        let mut list = Vec::new();
        assert!(set_secret_written(&mut list, "X", "s", SecretWrite::Created, ts(0)));
        assert!(!set_secret_written(&mut list, "X", "s", SecretWrite::Unchanged, ts(1)));
        assert_eq!(list[0].message, "s created");
    }
}
