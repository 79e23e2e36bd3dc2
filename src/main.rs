// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dynatrace_operator::config::Config;
use dynatrace_operator::dtclient::{DynatraceClientBuilder, DynatraceClientFactory};
use dynatrace_operator::kubernetes::wait_for_dynakube_crd;
use dynatrace_operator::nodes::{self, NodeTracker};
use dynatrace_operator::reconcilers::{DynaKubeReconciler, NamespaceReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Dynatrace operator");

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: operator_namespace={}, run_local={}",
        config.operator_namespace, config.run_local
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for DynaKube CRD to become available...");
    wait_for_dynakube_crd(&client).await?;

    let builder: Arc<dyn DynatraceClientBuilder> = Arc::new(DynatraceClientFactory::new(client.clone()));

    // The node cache is only owned by the operator deployment when running in-cluster
    let pod_name = if config.run_local { None } else { config.pod_name.clone() };
    let (node_handle, node_events) = nodes::channel();
    let tracker = NodeTracker::new(client.clone(), config.operator_namespace.clone(), pod_name, builder.clone());

    let dynakube_reconciler = DynaKubeReconciler::new(client.clone(), &config, builder);
    let namespace_reconciler = NamespaceReconciler::new(client.clone(), &config);

    info!("Starting reconcilers...");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let tracker = tokio::spawn(tracker.run(node_events, async move {
        let _ = stop_rx.await;
    }));

    tokio::select! {
        res = async {
            tokio::try_join!(
                dynakube_reconciler.run(),
                namespace_reconciler.run(),
                nodes::watch_nodes(client, node_handle)
            )
        } => {
            res?;
            warn!("All reconcilers stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    // Let the node tracker finish the event in flight
    let _ = stop_tx.send(());
    tracker.await??;
    Ok(())
}
