// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use crate::types::DynaKube;
use kube::{discovery::Discovery, Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait for the DynaKube CRD to become available in the cluster.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_dynakube_crd(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;
    let group = DynaKube::group(&());
    let version = DynaKube::version(&());

    loop {
        match check_dynakube_crd_exists(client).await {
            Ok(true) => {
                info!("DynaKube CRD ({}/{}) is available", group, version);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "DynaKube CRD ({}/{}) not yet available, waiting {} seconds...",
                    group, version, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for DynaKube CRD: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Check if the DynaKube CRD exists by attempting to discover it.
async fn check_dynakube_crd_exists(client: &Client) -> Result<bool> {
    let group_name = DynaKube::group(&());
    let discovery = Discovery::new(client.clone())
        .filter(&[group_name.as_ref()])
        .run()
        .await?;

    let found = discovery
        .groups()
        .filter(|g| g.name() == group_name)
        .flat_map(|g| g.recommended_resources())
        .any(|(ar, _)| ar.kind == DynaKube::kind(&()) && ar.version == DynaKube::version(&()));
    Ok(found)
}
