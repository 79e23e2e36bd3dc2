// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Labels written by the operator
pub mod labels {
    /// Namespace label naming the DynaKube that governs the namespace
    pub const INJECT_INSTANCE: &str = "dynatrace.com/inject-instance";
    pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
    /// Name of the DynaKube that created a replicated object
    pub const APP_CREATED_BY: &str = "app.kubernetes.io/created-by";
    pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
}

/// Annotations written by the operator
pub mod annotations {
    /// Set on every namespace the mapper modified
    pub const UPDATED_VIA_OPERATOR: &str = "dynatrace.com/updated-via-operator";
}

/// DynaKube feature-flag annotation keys
pub mod features {
    pub const IGNORED_NAMESPACES: &str = "feature.dynatrace.com/ignored-namespaces";
    pub const NO_PROXY: &str = "feature.dynatrace.com/no-proxy";
    pub const IGNORE_PROXY: &str = "feature.dynatrace.com/ignore-proxy";
    pub const INITIAL_CONNECT_RETRY_MS: &str = "feature.dynatrace.com/initial-connect-retry-ms";
    pub const API_REQUEST_THRESHOLD: &str = "feature.dynatrace.com/api-request-threshold";
    pub const AUTOMATIC_TLS_CERTIFICATE: &str = "feature.dynatrace.com/automatic-tls-certificate";
    pub const IGNORE_UNKNOWN_STATE: &str = "feature.dynatrace.com/ignore-unknown-state";
    pub const ENFORCEMENT_MODE: &str = "feature.dynatrace.com/enforcement-mode";
    pub const DISABLE_HOSTS_REQUESTS: &str = "feature.dynatrace.com/disable-hosts-requests";
}

/// Well-known secret, config map and key names
pub mod names {
    pub const TENANT_TOKEN_KEY: &str = "tenant-token";
    pub const ONEAGENT_TENANT_SECRET_SUFFIX: &str = "-oneagent-tenant-secret";
    pub const ACTIVEGATE_TENANT_SECRET_SUFFIX: &str = "-activegate-tenant-secret";
    pub const PMC_SECRET_SUFFIX: &str = "-pmc-secret";
    pub const PMC_KEY: &str = "ruxitagentproc.json";
    pub const ACTIVEGATE_TLS_SECRET_SUFFIX: &str = "-activegate-tls-certificate";
    pub const TLS_CERT_KEY: &str = "server.crt";
    pub const TRUSTED_CAS_KEY: &str = "certs";
    pub const PROXY_KEY: &str = "proxy";

    pub const BOOTSTRAPPER_CONFIG_SECRET: &str = "dynatrace-bootstrapper-config";
    pub const ENRICHMENT_ENDPOINT_SECRET: &str = "dynatrace-metadata-enrichment-endpoint";
    pub const OTLP_EXPORTER_SECRET: &str = "dynatrace-otlp-exporter-config";

    pub const NODE_CACHE_CONFIG_MAP: &str = "dynatrace-node-cache";
}

/// The operator name used as field manager and label value
pub const OPERATOR_NAME: &str = "dynatrace-operator";

/// Finalizer guarding cleanup of replicated secrets and namespace labels
pub const FINALIZER: &str = "dynatrace.com/cleanup";

/// Intervals and thresholds
pub mod timing {
    use std::time::Duration;

    /// Minimum time between two token probes
    pub const TOKEN_PROBE_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default api-request threshold in minutes
    pub const DEFAULT_API_REQUEST_THRESHOLD_MINUTES: i64 = 15;
    pub const NODE_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const NODE_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
    pub const NODE_MARK_INTERVAL: Duration = Duration::from_secs(60 * 60);
    /// Offset subtracted from lastSeen when timestamping termination events
    pub const NODE_EVENT_OFFSET: Duration = Duration::from_secs(10 * 60);
    pub const NODE_EVENT_CHANNEL_CAPACITY: usize = 20;
    pub const REQUEUE_SUCCESS: Duration = Duration::from_secs(5 * 60);
    pub const REQUEUE_ERROR: Duration = Duration::from_secs(60);
    pub const REQUEUE_TOO_MANY_REQUESTS: Duration = Duration::from_secs(60);
    pub const DYNATRACE_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    /// Hosts not seen for longer than this are ignored by the entity lookup
    pub const HOST_SEEN_WINDOW: Duration = Duration::from_secs(30 * 60);
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}
