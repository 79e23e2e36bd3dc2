// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mapping driven by a DynaKube: walk every namespace once.

use super::matching::{apply_decision, assigned_dynakube, candidates, decide, Decision, MappingMode};
use super::{namespaces_message, NamespaceMapper};
use crate::constants::labels;
use crate::error::{OperatorError, Result};
use crate::kubernetes::{is_terminating, list_namespaces, update_namespace};
use crate::types::conditions::{reasons, remove_condition, set_condition, Condition, ConditionStatus};
use crate::types::DynaKube;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

impl NamespaceMapper {
    /// Label every namespace the DynaKube governs and unlabel the ones it no longer does.
    ///
    /// Conflicting namespaces are left as they are and reported as errors after
    /// all other namespaces were handled.
    #[instrument(skip(self, dynakube, now), fields(dynakube = %dynakube.name_any()))]
    pub async fn map_from_dynakube(&self, dynakube: &mut DynaKube, now: DateTime<Utc>) -> Result<()> {
        let name = dynakube.name_any();

        let mut dynakubes: Vec<DynaKube> = self
            .list_dynakubes()
            .await?
            .into_iter()
            .filter(|dk| dk.name_any() != name)
            .collect();
        dynakubes.push(dynakube.clone());
        let candidates = candidates(&dynakubes, &self.operator_namespace);
        let own = candidates.iter().find(|c| c.name() == name);

        let mut matched: Vec<(MappingMode, String)> = Vec::new();
        let mut errors = Vec::new();

        for mut namespace in list_namespaces(&self.client, None).await? {
            if is_terminating(&namespace) {
                continue;
            }
            let ns_name = namespace.name_any();
            let decision = decide(&candidates, &namespace);

            let involved = match &decision {
                Decision::Assign(assigned) => assigned == &name,
                Decision::Conflict(dynakubes) => dynakubes.contains(&name),
                Decision::Unassign => false,
            } || assigned_dynakube(&namespace) == Some(name.as_str());
            if !involved {
                continue;
            }

            match &decision {
                Decision::Conflict(dynakubes) => {
                    warn!(namespace = %ns_name, "Namespace is selected by multiple DynaKubes: {:?}", dynakubes);
                    errors.push(OperatorError::ConflictingNamespace {
                        namespace: ns_name,
                        dynakubes: dynakubes.clone(),
                    });
                    continue;
                }
                Decision::Assign(assigned) if assigned == &name => {
                    if let Some(own) = own {
                        for mode in MappingMode::ALL {
                            if own.matches(mode, &namespace) {
                                matched.push((mode, ns_name.clone()));
                            }
                        }
                    }
                }
                _ => {}
            }

            if apply_decision(&mut namespace, &decision) {
                match update_namespace(&self.client, &namespace).await {
                    Ok(_) => debug!(namespace = %ns_name, ?decision, "Namespace mapping updated"),
                    Err(e) => {
                        error!(namespace = %ns_name, "Failed to update namespace: {}", e);
                        errors.push(e);
                    }
                }
            }
        }

        let enabled: Vec<MappingMode> = MappingMode::ALL
            .into_iter()
            .filter(|mode| mode.enabled(dynakube))
            .collect();
        let status = dynakube.status_mut();
        for mode in MappingMode::ALL {
            if !enabled.contains(&mode) {
                remove_condition(&mut status.conditions, mode.condition_type());
                continue;
            }
            let names: Vec<String> = matched
                .iter()
                .filter(|(m, _)| *m == mode)
                .map(|(_, ns)| ns.clone())
                .collect();
            let condition = if names.is_empty() {
                Condition::new(
                    mode.condition_type(),
                    ConditionStatus::False,
                    reasons::NO_MATCHES,
                    "No namespaces match the selector",
                )
            } else {
                Condition::new(
                    mode.condition_type(),
                    ConditionStatus::True,
                    reasons::MATCHES_FOUND,
                    namespaces_message(&names),
                )
            };
            set_condition(&mut status.conditions, condition, now);
        }

        info!(
            namespaces = matched.iter().map(|(_, ns)| ns).collect::<std::collections::BTreeSet<_>>().len(),
            conflicts = errors.iter().filter(|e| matches!(e, OperatorError::ConflictingNamespace { .. })).count(),
            "Namespace mapping done"
        );

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove the inject label of `dynakube` from every namespace. Returns the namespaces touched.
    #[instrument(skip(self))]
    pub async fn unmap_dynakube(&self, dynakube: &str) -> Result<Vec<String>> {
        let selector = format!("{}={}", labels::INJECT_INSTANCE, dynakube);
        let mut unmapped = Vec::new();
        let mut errors = Vec::new();

        for mut namespace in list_namespaces(&self.client, Some(&selector)).await? {
            if !apply_decision(&mut namespace, &Decision::Unassign) {
                continue;
            }
            let ns_name = namespace.name_any();
            match update_namespace(&self.client, &namespace).await {
                Ok(_) => unmapped.push(ns_name),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(namespace = %ns_name, "Failed to unmap namespace: {}", e);
                    errors.push(e);
                }
            }
        }

        match OperatorError::join(errors) {
            Some(err) => Err(err),
            None => Ok(unmapped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::annotations;
    use crate::test_utils::{dynakube_json, namespace_json, MockService};
    use crate::types::conditions::{find_condition, types};
    use crate::types::dynakube::{InjectionSpec, OneAgentSpec};
    use crate::types::selector::LabelSelector;
    use crate::types::DynaKubeSpec;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const DYNAKUBES: &str = "/apis/dynatrace.com/v1beta1/namespaces/dynatrace/dynakubes";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_dynakube(name: &str, selector: Option<LabelSelector>) -> DynaKube {
        DynaKube {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("dynatrace".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: DynaKubeSpec {
                api_url: "https://tenant.live.dynatrace.com/api".to_string(),
                one_agent: OneAgentSpec {
                    application_monitoring: Some(InjectionSpec {
                        namespace_selector: selector,
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
            status: None,
        }
    }

    fn with_namespaces(mut mock: MockService, namespaces: &[(&str, &[(&str, &str)])]) -> MockService {
        for (name, labels) in namespaces {
            mock = mock.on_get(&format!("/api/v1/namespaces/{}", name), 200, &namespace_json(name, labels));
        }
        mock
    }

    fn label_of(mock: &MockService, namespace: &str) -> Option<String> {
        mock.stored(&format!("/api/v1/namespaces/{}", namespace))
            .and_then(|ns| ns["metadata"]["labels"][labels::INJECT_INSTANCE].as_str().map(str::to_string))
    }

    #[tokio::test]
    async fn test_labels_all_non_ignored_namespaces() {
        let dk = make_dynakube("dynakube", None);
        let mock = with_namespaces(
            MockService::new().on_get(&format!("{}/dynakube", DYNAKUBES), 200, &dynakube_json(&dk)),
            &[("app", &[]), ("web", &[]), ("kube-system", &[]), ("dynatrace", &[])],
        );
        let mapper = NamespaceMapper::new(mock.clone().into_client(), "dynatrace");
        let mut dk = dk;

        mapper.map_from_dynakube(&mut dk, now()).await.unwrap();

        assert_eq!(label_of(&mock, "app").as_deref(), Some("dynakube"));
        assert_eq!(label_of(&mock, "web").as_deref(), Some("dynakube"));
        assert!(label_of(&mock, "kube-system").is_none());
        assert!(label_of(&mock, "dynatrace").is_none());
        let app = mock.stored("/api/v1/namespaces/app").unwrap();
        assert_eq!(app["metadata"]["annotations"][annotations::UPDATED_VIA_OPERATOR], "true");

        let condition = find_condition(dk.conditions(), types::ONEAGENT_NAMESPACES).unwrap();
        assert!(condition.is_true());
        assert_eq!(condition.message, "app, web");
        assert!(find_condition(dk.conditions(), types::METADATA_ENRICHMENT_NAMESPACES).is_none());
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let dk = make_dynakube("dynakube", None);
        let mock = with_namespaces(
            MockService::new().on_get(&format!("{}/dynakube", DYNAKUBES), 200, &dynakube_json(&dk)),
            &[("app", &[])],
        );
        let mapper = NamespaceMapper::new(mock.clone().into_client(), "dynatrace");
        let mut dk = dk;
        mapper.map_from_dynakube(&mut dk, now()).await.unwrap();
        mock.clear_requests();

        mapper.map_from_dynakube(&mut dk, now()).await.unwrap();

        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_namespace_is_untouched() {
        let a = make_dynakube("a", None);
        let b = make_dynakube(
            "b",
            Some(LabelSelector {
                match_labels: BTreeMap::from([("team".to_string(), "x".to_string())]),
                ..Default::default()
            }),
        );
        let mock = with_namespaces(
            MockService::new()
                .on_get(&format!("{}/a", DYNAKUBES), 200, &dynakube_json(&a))
                .on_get(&format!("{}/b", DYNAKUBES), 200, &dynakube_json(&b)),
            &[("shared", &[("team", "x")]), ("other", &[])],
        );
        let mapper = NamespaceMapper::new(mock.clone().into_client(), "dynatrace");
        let mut a = a;

        let err = mapper.map_from_dynakube(&mut a, now()).await.unwrap_err();

        assert!(matches!(err, OperatorError::ConflictingNamespace { ref namespace, .. } if namespace == "shared"));
        assert!(label_of(&mock, "shared").is_none());
        assert_eq!(label_of(&mock, "other").as_deref(), Some("a"));
        assert!(mock.writes().iter().all(|w| !w.path.ends_with("/shared")));
    }

    #[tokio::test]
    async fn test_unlabels_namespaces_no_longer_selected() {
        let dk = make_dynakube(
            "dynakube",
            Some(LabelSelector {
                match_labels: BTreeMap::from([("monitor".to_string(), "true".to_string())]),
                ..Default::default()
            }),
        );
        let mock = with_namespaces(
            MockService::new().on_get(&format!("{}/dynakube", DYNAKUBES), 200, &dynakube_json(&dk)),
            &[("old", &[(labels::INJECT_INSTANCE, "dynakube")])],
        );
        let mapper = NamespaceMapper::new(mock.clone().into_client(), "dynatrace");
        let mut dk = dk;

        mapper.map_from_dynakube(&mut dk, now()).await.unwrap();

        assert!(label_of(&mock, "old").is_none());
        let condition = find_condition(dk.conditions(), types::ONEAGENT_NAMESPACES).unwrap();
        assert_eq!(condition.reason, reasons::NO_MATCHES);
    }

    #[tokio::test]
    async fn test_unmap_dynakube() {
        let mock = with_namespaces(
            MockService::new(),
            &[
                ("app", &[(labels::INJECT_INSTANCE, "dynakube")]),
                ("web", &[(labels::INJECT_INSTANCE, "other")]),
            ],
        );
        let mapper = NamespaceMapper::new(mock.clone().into_client(), "dynatrace");

        let unmapped = mapper.unmap_dynakube("dynakube").await.unwrap();

        assert_eq!(unmapped, vec!["app".to_string()]);
        assert!(label_of(&mock, "app").is_none());
        assert_eq!(label_of(&mock, "web").as_deref(), Some("other"));
    }
}
