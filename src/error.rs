// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors returned by the Dynatrace API client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DynatraceApiError {
    #[error("dynatrace server error {code}: {message}")]
    Server { code: u16, message: String },

    #[error("request to dynatrace failed: {0}")]
    Transport(String),

    #[error("failed to decode dynatrace response: {0}")]
    Decode(String),

    #[error("host not found for ip {0}")]
    HostNotFound(String),

    #[error("{0}")]
    Other(String),
}

impl DynatraceApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            DynatraceApiError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(401)
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.status_code() == Some(429)
    }
}

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error(transparent)]
    DynatraceApi(#[from] DynatraceApiError),

    #[error("Secret '{0}' not found")]
    SecretNotFound(String),

    #[error("Token {token} on secret {secret} missing")]
    TokenMissing { secret: String, token: String },

    #[error("Token {token} on secret {secret} is not valid UTF-8")]
    TokenMalformed { secret: String, token: String },

    #[error("field '{field}' missing in config map {config_map}")]
    ConfigMapFieldMissing { config_map: String, field: String },

    #[error("field '{field}' missing in secret {secret}")]
    SecretFieldMissing { secret: String, field: String },

    #[error("invalid proxy url: {0}")]
    InvalidProxy(String),

    #[error("issues found with tokens: {0}")]
    TokenIssues(String),

    #[error("failed to build dynatrace client: {0}")]
    ClientBuild(String),

    #[error("no communication hosts for OneAgent are available")]
    NoOneAgentCommunicationHosts,

    #[error("namespace '{namespace}' is matched by more than one DynaKube: {}", .dynakubes.join(", "))]
    ConflictingNamespace {
        namespace: String,
        dynakubes: Vec<String>,
    },

    #[error("failed to generate secret {secret}: {reason}")]
    SecretGeneration { secret: String, reason: String },

    #[error("node cache error: {0}")]
    NodeCache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<OperatorError>>),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Joined(Vec<OperatorError>),
}

impl OperatorError {
    /// Collapse a list of errors into one, `None` when the list is empty
    pub fn join(mut errors: Vec<OperatorError>) -> Option<OperatorError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(OperatorError::Joined(errors)),
        }
    }

    fn kube_status_code(&self) -> Option<u16> {
        match self {
            OperatorError::KubeError(kube::Error::Api(err)) => Some(err.code),
            _ => None,
        }
    }

    /// Optimistic-concurrency failure from the Kubernetes API
    pub fn is_conflict(&self) -> bool {
        self.kube_status_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.kube_status_code() == Some(404)
    }

    /// Rate limited by the Dynatrace API, possibly nested in a joined error
    pub fn is_too_many_requests(&self) -> bool {
        match self {
            OperatorError::DynatraceApi(err) => err.is_too_many_requests(),
            OperatorError::Joined(errors) => errors.iter().any(|e| e.is_too_many_requests()),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
