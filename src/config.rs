// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the operator runs in; DynaKubes and token secrets live here
    pub operator_namespace: String,
    /// Name of the operator pod, used to resolve the owning Deployment
    pub pod_name: Option<String>,
    /// Running outside the cluster, no Deployment to own the node cache
    pub run_local: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let operator_namespace =
            lookup("POD_NAMESPACE").context("POD_NAMESPACE environment variable not set")?;
        let run_local = lookup("RUN_LOCAL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);
        let pod_name = lookup("POD_NAME");

        if pod_name.is_none() && !run_local {
            anyhow::bail!("POD_NAME environment variable not set");
        }

        Ok(Config {
            operator_namespace,
            pod_name,
            run_local,
        })
    }
}
