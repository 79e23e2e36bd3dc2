// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Token validation.
//!
//! Reads the token secret, builds the Dynatrace client and probes each token
//! for its scopes at most once per [`timing::TOKEN_PROBE_INTERVAL`]. Every
//! token kind ends up with exactly one condition.

use crate::constants::timing;
use crate::dtclient::{
    tokens::{secret_key, API_TOKEN, DATA_INGEST_TOKEN, PAAS_TOKEN},
    DynatraceClient, DynatraceClientBuilder, TokenSet, TokenStore, SCOPE_DATA_EXPORT,
    SCOPE_INSTALLER_DOWNLOAD, SCOPE_METRICS_INGEST,
};
use crate::error::{OperatorError, Result};
use crate::types::conditions::{
    self, reasons, remove_condition, set_condition, stamp_missing_transition_times, Condition,
    ConditionStatus,
};
use crate::types::{DynaKube, DynaKubeStatus};
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Api,
    Paas,
    DataIngest,
}

impl TokenKind {
    fn condition_type(self) -> &'static str {
        match self {
            TokenKind::Api => conditions::types::API_TOKEN,
            TokenKind::Paas => conditions::types::PAAS_TOKEN,
            TokenKind::DataIngest => conditions::types::DATA_INGEST_TOKEN,
        }
    }

    fn field(self) -> &'static str {
        match self {
            TokenKind::Api => API_TOKEN,
            TokenKind::Paas => PAAS_TOKEN,
            TokenKind::DataIngest => DATA_INGEST_TOKEN,
        }
    }

    fn from_field(field: &str) -> Self {
        match field {
            PAAS_TOKEN => TokenKind::Paas,
            DATA_INGEST_TOKEN => TokenKind::DataIngest,
            _ => TokenKind::Api,
        }
    }

    fn last_probe(self, status: &mut DynaKubeStatus) -> &mut Option<DateTime<Utc>> {
        match self {
            TokenKind::Api => &mut status.last_api_token_probe_timestamp,
            TokenKind::Paas => &mut status.last_paas_token_probe_timestamp,
            TokenKind::DataIngest => &mut status.last_data_ingest_token_probe_timestamp,
        }
    }
}

/// Result of a token reconcile that produced a usable client
pub struct TokenOutcome {
    pub client: Arc<dyn DynatraceClient>,
    pub tokens: TokenSet,
    pub status_changed: bool,
}

pub struct TokenReconciler {
    store: TokenStore,
    builder: Arc<dyn DynatraceClientBuilder>,
}

fn has_surrounding_whitespace(token: &str) -> bool {
    token.trim() != token
}

fn set(
    dynakube: &mut DynaKube,
    kind: TokenKind,
    status: ConditionStatus,
    reason: &str,
    message: String,
    now: DateTime<Utc>,
) {
    set_condition(
        &mut dynakube.status_mut().conditions,
        Condition::new(kind.condition_type(), status, reason, message),
        now,
    );
}

impl TokenReconciler {
    pub fn new(store: TokenStore, builder: Arc<dyn DynatraceClientBuilder>) -> Self {
        Self { store, builder }
    }

    /// Validate the tokens of a DynaKube and return a client for it.
    ///
    /// Status is updated in place, also when an error is returned.
    #[instrument(skip(self, dynakube, now), fields(dynakube = %dynakube.name_any()))]
    pub async fn reconcile(&self, dynakube: &mut DynaKube, now: DateTime<Utc>) -> Result<TokenOutcome> {
        let before = dynakube.status.clone();
        let result = self.reconcile_inner(dynakube, now).await;
        let status_changed = dynakube.status != before;

        result.map(|(client, tokens)| TokenOutcome {
            client,
            tokens,
            status_changed,
        })
    }

    async fn reconcile_inner(
        &self,
        dynakube: &mut DynaKube,
        now: DateTime<Utc>,
    ) -> Result<(Arc<dyn DynatraceClient>, TokenSet)> {
        stamp_missing_transition_times(&mut dynakube.status_mut().conditions, now);

        let namespace = dynakube.namespace().unwrap_or_default();
        let secret_name = dynakube.tokens_secret_name();
        let key = secret_key(&namespace, &secret_name);

        let tokens = match self.store.read(&namespace, &secret_name).await {
            Ok(tokens) => tokens,
            Err(e @ OperatorError::SecretNotFound(_)) => {
                let message = e.to_string();
                for kind in [TokenKind::Api, TokenKind::Paas] {
                    set(dynakube, kind, ConditionStatus::False, reasons::TOKEN_SECRET_NOT_FOUND, message.clone(), now);
                }
                return Err(OperatorError::TokenIssues(message));
            }
            Err(
                e @ (OperatorError::TokenMissing { .. } | OperatorError::TokenMalformed { .. }),
            ) => {
                let failed = match &e {
                    OperatorError::TokenMissing { token, .. }
                    | OperatorError::TokenMalformed { token, .. } => TokenKind::from_field(token),
                    _ => TokenKind::Api,
                };
                let message = e.to_string();
                // The secret is unusable, so the other kind cannot be checked either
                let mut kinds = vec![TokenKind::Api, TokenKind::Paas];
                if !kinds.contains(&failed) {
                    kinds.push(failed);
                }
                for kind in kinds {
                    let reason = if kind == failed { reasons::TOKEN_MISSING } else { reasons::TOKEN_ERROR };
                    set(dynakube, kind, ConditionStatus::False, reason, message.clone(), now);
                }
                return Err(OperatorError::TokenIssues(message));
            }
            Err(e) => {
                for kind in [TokenKind::Api, TokenKind::Paas] {
                    conditions::set_kube_api_error(
                        &mut dynakube.status_mut().conditions,
                        kind.condition_type(),
                        &e,
                        now,
                    );
                }
                return Err(e);
            }
        };

        let mut issues = Vec::new();
        let mut healthy = Vec::new();
        for (kind, value) in [
            (TokenKind::Api, tokens.api_token.as_str()),
            (TokenKind::Paas, tokens.paas_token()),
        ] {
            if value.is_empty() {
                let message = OperatorError::TokenMissing {
                    secret: key.clone(),
                    token: kind.field().to_string(),
                }
                .to_string();
                set(dynakube, kind, ConditionStatus::False, reasons::TOKEN_MISSING, message.clone(), now);
                issues.push(message);
            } else {
                healthy.push(kind);
            }
        }
        if !issues.is_empty() {
            let message = issues.join(", ");
            for kind in healthy {
                set(dynakube, kind, ConditionStatus::False, reasons::TOKEN_ERROR, message.clone(), now);
            }
            return Err(OperatorError::TokenIssues(message));
        }

        let client = match self.builder.build(dynakube, &tokens).await {
            Ok(client) => client,
            Err(e) => {
                let list = &mut dynakube.status_mut().conditions;
                for kind in [TokenKind::Api, TokenKind::Paas] {
                    match &e {
                        OperatorError::KubeError(_) => {
                            conditions::set_kube_api_error(list, kind.condition_type(), &e, now)
                        }
                        _ => conditions::set_dynatrace_api_error(list, kind.condition_type(), &e, now),
                    };
                }
                return Err(e);
            }
        };

        let api_scopes: &[&str] = if dynakube.feature_flags().disable_hosts_requests() {
            &[]
        } else {
            &[SCOPE_DATA_EXPORT]
        };
        self.probe(client.as_ref(), dynakube, TokenKind::Api, &tokens.api_token, api_scopes, &key, now)
            .await?;
        self.probe(
            client.as_ref(),
            dynakube,
            TokenKind::Paas,
            tokens.paas_token(),
            &[SCOPE_INSTALLER_DOWNLOAD],
            &key,
            now,
        )
        .await?;

        match tokens.data_ingest_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => {
                self.probe(
                    client.as_ref(),
                    dynakube,
                    TokenKind::DataIngest,
                    token,
                    &[SCOPE_METRICS_INGEST],
                    &key,
                    now,
                )
                .await?
            }
            None => {
                let status = dynakube.status_mut();
                remove_condition(&mut status.conditions, conditions::types::DATA_INGEST_TOKEN);
                status.last_data_ingest_token_probe_timestamp = None;
            }
        }

        Ok((client, tokens))
    }

    /// Probe one token. Only a rate-limit response is returned as an error.
    #[allow(clippy::too_many_arguments)]
    async fn probe(
        &self,
        client: &dyn DynatraceClient,
        dynakube: &mut DynaKube,
        kind: TokenKind,
        token: &str,
        required_scopes: &[&str],
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if has_surrounding_whitespace(token) {
            set(
                dynakube,
                kind,
                ConditionStatus::False,
                reasons::TOKEN_UNAUTHORIZED,
                format!("Token on secret {} has leading and/or trailing spaces", key),
                now,
            );
            return Ok(());
        }

        let has_condition = conditions::find_condition(dynakube.conditions(), kind.condition_type()).is_some();
        let last_probe = *kind.last_probe(dynakube.status_mut());
        let probe_interval = chrono::Duration::from_std(timing::TOKEN_PROBE_INTERVAL)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        if has_condition && last_probe.is_some_and(|t| t + probe_interval > now) {
            debug!(token = kind.field(), "Token probed recently, keeping previous condition");
            return Ok(());
        }

        let scopes = match client.get_token_scopes(token).await {
            Err(e) if e.is_too_many_requests() => {
                warn!(token = kind.field(), "Dynatrace API rate limit hit while probing token");
                return Err(e.into());
            }
            other => other,
        };
        *kind.last_probe(dynakube.status_mut()) = Some(now);

        let (status, reason, message) = match scopes {
            Err(e) if e.is_unauthorized() => (
                ConditionStatus::False,
                reasons::TOKEN_UNAUTHORIZED,
                format!("Token on secret {} unauthorized", key),
            ),
            Err(e) => (
                ConditionStatus::False,
                reasons::TOKEN_ERROR,
                format!("error when querying token on secret {}: {}", key, e),
            ),
            Ok(scopes) => {
                let missing = scopes.missing(required_scopes);
                if missing.is_empty() {
                    (ConditionStatus::True, reasons::TOKEN_READY, "Ready".to_string())
                } else {
                    (
                        ConditionStatus::False,
                        reasons::TOKEN_SCOPE_MISSING,
                        format!("Token on secret {} missing scope {}", key, missing.join(", ")),
                    )
                }
            }
        };

        if status != ConditionStatus::True {
            info!(token = kind.field(), reason, "Token is not usable");
        }
        set(dynakube, kind, status, reason, message, now);
        Ok(())
    }
}
