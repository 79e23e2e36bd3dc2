// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Deciding which DynaKube governs a namespace.

use crate::constants::{annotations, labels};
use crate::types::conditions;
use crate::types::selector::LabelSelector;
use crate::types::DynaKube;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use regex::Regex;
use tracing::warn;

/// The two independent ways a DynaKube can select namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    OneAgent,
    MetadataEnrichment,
}

impl MappingMode {
    pub const ALL: [MappingMode; 2] = [MappingMode::OneAgent, MappingMode::MetadataEnrichment];

    pub fn condition_type(self) -> &'static str {
        match self {
            MappingMode::OneAgent => conditions::types::ONEAGENT_NAMESPACES,
            MappingMode::MetadataEnrichment => conditions::types::METADATA_ENRICHMENT_NAMESPACES,
        }
    }

    pub fn enabled(self, dynakube: &DynaKube) -> bool {
        match self {
            MappingMode::OneAgent => dynakube.oneagent_injection_enabled(),
            MappingMode::MetadataEnrichment => dynakube.metadata_enrichment_enabled(),
        }
    }

    fn selector(self, dynakube: &DynaKube) -> Option<&LabelSelector> {
        match self {
            MappingMode::OneAgent => dynakube.oneagent_namespace_selector(),
            MappingMode::MetadataEnrichment => dynakube.metadata_enrichment_namespace_selector(),
        }
    }
}

/// Outcome of evaluating all DynaKubes against one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Assign(String),
    Unassign,
    Conflict(Vec<String>),
}

/// Compiled ignore list of one DynaKube
pub struct IgnoreList(Vec<Regex>);

impl IgnoreList {
    pub fn for_dynakube(dynakube: &DynaKube, operator_namespace: &str) -> Self {
        let patterns = dynakube
            .feature_flags()
            .ignored_namespaces(operator_namespace)
            .into_iter()
            .filter_map(|pattern| match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(
                        dynakube = %dynakube.name_any(),
                        "Skipping invalid ignored-namespace pattern '{}': {}",
                        pattern,
                        e
                    );
                    None
                }
            })
            .collect();
        IgnoreList(patterns)
    }

    pub fn is_ignored(&self, namespace: &str) -> bool {
        self.0.iter().any(|re| re.is_match(namespace))
    }
}

/// A DynaKube with its ignore list compiled once per mapping pass
pub struct Candidate<'a> {
    pub dynakube: &'a DynaKube,
    ignore: IgnoreList,
}

impl<'a> Candidate<'a> {
    pub fn new(dynakube: &'a DynaKube, operator_namespace: &str) -> Self {
        Self {
            dynakube,
            ignore: IgnoreList::for_dynakube(dynakube, operator_namespace),
        }
    }

    pub fn name(&self) -> String {
        self.dynakube.name_any()
    }

    /// Whether the DynaKube selects `namespace` under `mode`. An unset selector matches everything.
    pub fn matches(&self, mode: MappingMode, namespace: &Namespace) -> bool {
        if !mode.enabled(self.dynakube) || self.ignore.is_ignored(&namespace.name_any()) {
            return false;
        }
        mode.selector(self.dynakube)
            .map_or(true, |selector| selector.matches(namespace.labels()))
    }

    pub fn matches_any(&self, namespace: &Namespace) -> bool {
        MappingMode::ALL.iter().any(|mode| self.matches(*mode, namespace))
    }
}

pub fn candidates<'a>(dynakubes: &'a [DynaKube], operator_namespace: &str) -> Vec<Candidate<'a>> {
    dynakubes
        .iter()
        .filter(|dk| dk.metadata.deletion_timestamp.is_none() && dk.needs_namespace_mapping())
        .map(|dk| Candidate::new(dk, operator_namespace))
        .collect()
}

pub fn decide(candidates: &[Candidate<'_>], namespace: &Namespace) -> Decision {
    let mut matching: Vec<String> = candidates
        .iter()
        .filter(|c| c.matches_any(namespace))
        .map(Candidate::name)
        .collect();

    match matching.len() {
        0 => Decision::Unassign,
        1 => Decision::Assign(matching.remove(0)),
        _ => {
            matching.sort();
            Decision::Conflict(matching)
        }
    }
}

/// The DynaKube currently recorded on a namespace
pub fn assigned_dynakube(namespace: &Namespace) -> Option<&str> {
    namespace
        .labels()
        .get(labels::INJECT_INSTANCE)
        .map(String::as_str)
}

/// Apply a decision to the namespace labels. Returns whether the namespace changed.
/// Conflicting namespaces are left untouched.
pub fn apply_decision(namespace: &mut Namespace, decision: &Decision) -> bool {
    let changed = match decision {
        Decision::Assign(name) => {
            if assigned_dynakube(namespace) == Some(name.as_str()) {
                false
            } else {
                namespace
                    .labels_mut()
                    .insert(labels::INJECT_INSTANCE.to_string(), name.clone());
                true
            }
        }
        Decision::Unassign => namespace.labels_mut().remove(labels::INJECT_INSTANCE).is_some(),
        Decision::Conflict(_) => false,
    };

    if changed {
        namespace
            .annotations_mut()
            .insert(annotations::UPDATED_VIA_OPERATOR.to_string(), "true".to_string());
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::features;
    use crate::types::dynakube::{InjectionSpec, MetadataEnrichmentSpec, OneAgentSpec};
    use crate::types::DynaKubeSpec;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_dynakube(name: &str, selector: Option<LabelSelector>) -> DynaKube {
        DynaKube {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("dynatrace".to_string()),
                ..Default::default()
            },
            spec: DynaKubeSpec {
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

    fn selector(key: &str, value: &str) -> Option<LabelSelector> {
        Some(LabelSelector {
            match_labels: BTreeMap::from([(key.to_string(), value.to_string())]),
            ..Default::default()
        })
    }

    #[test]
    fn test_unset_selector_matches_all_but_ignored() {
        let dks = vec![make_dynakube("dk", None)];
        let candidates = candidates(&dks, "dynatrace");

        assert_eq!(
            decide(&candidates, &make_namespace("app", &[])),
            Decision::Assign("dk".to_string())
        );
        for ignored in ["dynatrace", "kube-system", "openshift", "openshift-monitoring", "gke-managed", "gmp-system"] {
            assert_eq!(decide(&candidates, &make_namespace(ignored, &[])), Decision::Unassign);
        }
    }

    #[test]
    fn test_custom_ignore_list_replaces_defaults() {
        let mut dk = make_dynakube("dk", None);
        dk.metadata.annotations = Some(BTreeMap::from([(
            features::IGNORED_NAMESPACES.to_string(),
            r#"["^legacy-.*"]"#.to_string(),
        )]));
        let dks = vec![dk];
        let candidates = candidates(&dks, "dynatrace");

        assert_eq!(decide(&candidates, &make_namespace("legacy-app", &[])), Decision::Unassign);
        assert_eq!(
            decide(&candidates, &make_namespace("kube-system", &[])),
            Decision::Assign("dk".to_string())
        );
    }

    #[test]
    fn test_conflict_between_dynakubes() {
        let dks = vec![make_dynakube("b", None), make_dynakube("a", selector("team", "x"))];
        let candidates = candidates(&dks, "dynatrace");

        assert_eq!(
            decide(&candidates, &make_namespace("shared", &[("team", "x")])),
            Decision::Conflict(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            decide(&candidates, &make_namespace("other", &[])),
            Decision::Assign("b".to_string())
        );
    }

    #[test]
    fn test_dynakube_without_features_is_not_a_candidate() {
        let mut dk = make_dynakube("idle", None);
        dk.spec.one_agent = OneAgentSpec::default();
        let dks = vec![dk];

        assert!(candidates(&dks, "dynatrace").is_empty());
    }

    #[test]
    fn test_enrichment_selector_is_independent() {
        let mut dk = make_dynakube("dk", selector("inject", "yes"));
        dk.spec.metadata_enrichment = MetadataEnrichmentSpec {
            enabled: true,
            namespace_selector: selector("enrich", "yes"),
        };
        let dks = vec![dk];
        let candidates = candidates(&dks, "dynatrace");
        let enriched = make_namespace("enriched", &[("enrich", "yes")]);

        assert!(!candidates[0].matches(MappingMode::OneAgent, &enriched));
        assert!(candidates[0].matches(MappingMode::MetadataEnrichment, &enriched));
        assert_eq!(decide(&candidates, &enriched), Decision::Assign("dk".to_string()));
    }

    #[test]
    fn test_apply_decision_labels_and_annotates() {
        let mut ns = make_namespace("app", &[]);

        assert!(apply_decision(&mut ns, &Decision::Assign("dk".to_string())));
        assert_eq!(assigned_dynakube(&ns), Some("dk"));
        assert_eq!(ns.annotations().get(annotations::UPDATED_VIA_OPERATOR).map(String::as_str), Some("true"));

        assert!(!apply_decision(&mut ns, &Decision::Assign("dk".to_string())));
        assert!(!apply_decision(&mut ns, &Decision::Conflict(vec!["a".into(), "b".into()])));
        assert!(apply_decision(&mut ns, &Decision::Unassign));
        assert!(assigned_dynakube(&ns).is_none());
    }
}
