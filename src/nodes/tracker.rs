// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Event loop turning node churn into mark-for-termination events on the tenant.

use super::cache::{CacheEntry, NodeCache};
use crate::constants::timing;
use crate::dtclient::{DynatraceClient, DynatraceClientBuilder, EventData, TokenStore};
use crate::error::{DynatraceApiError, Result};
use crate::kubernetes::operator_deployment_owner;
use crate::types::DynaKube;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::ListParams,
    runtime::{watcher, WatchStreamExt},
    Api, Client, ResourceExt,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Taint set by the cluster autoscaler on nodes it is about to remove
const AUTOSCALER_TAINT: &str = "ToBeDeletedByClusterAutoscaler";

pub fn is_unschedulable(node: &Node) -> bool {
    let spec = node.spec.as_ref();
    spec.and_then(|s| s.unschedulable).unwrap_or(false)
        || spec
            .and_then(|s| s.taints.as_ref())
            .is_some_and(|taints| taints.iter().any(|t| t.key == AUTOSCALER_TAINT))
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

/// A mark is due when none was sent yet or the last one is older than the mark interval
fn is_marking_due(marked: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    marked.map_or(true, |last| now - last > to_chrono(timing::NODE_MARK_INTERVAL))
}

fn find_dynakube<'a>(dynakubes: &'a [DynaKube], name: &str) -> Option<&'a DynaKube> {
    dynakubes.iter().find(|dk| dk.name_any() == name)
}

/// First DynaKube whose OneAgent instances include `node`, with the instance ip
fn owner_of_node<'a>(dynakubes: &'a [DynaKube], node: &str) -> Option<(&'a DynaKube, &'a str)> {
    dynakubes.iter().find_map(|dk| {
        let instance = dk.status.as_ref()?.one_agent.instances.get(node)?;
        Some((dk, instance.ip_address.as_str()))
    })
}

/// Sender side of the tracker's bounded event channels
#[derive(Clone)]
pub struct NodeTrackerHandle {
    deletions: mpsc::Sender<String>,
    updates: mpsc::Sender<Node>,
}

impl NodeTrackerHandle {
    /// Queue a node deletion. Dropped when the queue is full, the periodic tick catches up.
    pub fn node_deleted(&self, name: String) {
        if let Err(e) = self.deletions.try_send(name) {
            debug!("Dropping node deletion event: {}", e);
        }
    }

    pub fn node_updated(&self, node: Node) {
        if let Err(e) = self.updates.try_send(node) {
            debug!("Dropping node update event: {}", e);
        }
    }
}

/// Receiver side, consumed by [`NodeTracker::run`]
pub struct NodeEvents {
    deletions: mpsc::Receiver<String>,
    updates: mpsc::Receiver<Node>,
}

pub fn channel() -> (NodeTrackerHandle, NodeEvents) {
    let (deletions_tx, deletions) = mpsc::channel(timing::NODE_EVENT_CHANNEL_CAPACITY);
    let (updates_tx, updates) = mpsc::channel(timing::NODE_EVENT_CHANNEL_CAPACITY);
    (
        NodeTrackerHandle {
            deletions: deletions_tx,
            updates: updates_tx,
        },
        NodeEvents { deletions, updates },
    )
}

pub struct NodeTracker {
    client: Client,
    operator_namespace: String,
    /// Operator pod used to find the Deployment owning the cache, `None` when running locally
    pod_name: Option<String>,
    tokens: TokenStore,
    builder: Arc<dyn DynatraceClientBuilder>,
}

impl NodeTracker {
    pub fn new(
        client: Client,
        operator_namespace: impl Into<String>,
        pod_name: Option<String>,
        builder: Arc<dyn DynatraceClientBuilder>,
    ) -> Self {
        Self {
            tokens: TokenStore::new(client.clone()),
            client,
            operator_namespace: operator_namespace.into(),
            pod_name,
            builder,
        }
    }

    /// Handle events one at a time until `shutdown` resolves.
    /// Ticks once immediately and then every reconcile interval.
    pub async fn run(self, mut events: NodeEvents, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        info!("Node tracker started");
        let mut ticker = tokio::time::interval(timing::NODE_RECONCILE_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Node tracker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_all(Utc::now()).await {
                        error!("Failed to reconcile nodes: {}", e);
                    }
                }
                Some(name) = events.deletions.recv() => {
                    if let Err(e) = self.on_deletion(&name, Utc::now()).await {
                        error!(node = %name, "Failed to handle node deletion: {}", e);
                    }
                }
                Some(node) = events.updates.recv() => {
                    if let Err(e) = self.on_update(&node, Utc::now()).await {
                        error!(node = %node.name_any(), "Failed to handle node update: {}", e);
                    }
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, now))]
    pub async fn on_deletion(&self, node: &str, now: DateTime<Utc>) -> Result<()> {
        let dynakubes = self.list_dynakubes().await?;
        let mut cache = NodeCache::load(&self.client, &self.operator_namespace).await?;
        self.handle_deletion(&mut cache, &dynakubes, node, now).await?;
        self.store(&mut cache).await
    }

    #[instrument(skip(self, node, now), fields(node = %node.name_any()))]
    pub async fn on_update(&self, node: &Node, now: DateTime<Utc>) -> Result<()> {
        if !is_unschedulable(node) {
            return Ok(());
        }
        let dynakubes = self.list_dynakubes().await?;
        let mut cache = NodeCache::load(&self.client, &self.operator_namespace).await?;
        self.handle_unschedulable(&mut cache, &dynakubes, &node.name_any(), now)
            .await?;
        self.store(&mut cache).await
    }

    /// Full pass over DynaKubes and nodes, catching up on dropped or missed events
    #[instrument(skip(self, now))]
    pub async fn reconcile_all(&self, now: DateTime<Utc>) -> Result<()> {
        let dynakubes = self.list_dynakubes().await?;
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes.list(&ListParams::default()).await?.items;
        let existing: HashSet<String> = nodes.iter().map(|n| n.name_any()).collect();
        let mut cache = NodeCache::load(&self.client, &self.operator_namespace).await?;

        for node in nodes.iter().filter(|n| is_unschedulable(n)) {
            let name = node.name_any();
            if let Err(e) = self.handle_unschedulable(&mut cache, &dynakubes, &name, now).await {
                warn!(node = %name, "Failed to mark node for termination: {}", e);
            }
        }

        let mut claimed = HashSet::new();
        for dynakube in &dynakubes {
            let Some(status) = dynakube.status.as_ref() else {
                continue;
            };
            for (node, instance) in &status.one_agent.instances {
                if !existing.contains(node) {
                    continue;
                }
                // The first DynaKube listing a node owns it
                if !claimed.insert(node.clone()) {
                    debug!(node = %node, dynakube = %dynakube.name_any(), "Node already claimed by another DynaKube");
                    continue;
                }
                let marked = match cache.get(node) {
                    Ok(previous) => previous.and_then(|p| p.marked),
                    Err(e) => {
                        warn!(node = %node, "Replacing unreadable cache entry: {}", e);
                        None
                    }
                };
                let entry = CacheEntry {
                    instance: dynakube.name_any(),
                    ip: instance.ip_address.clone(),
                    seen: now,
                    marked,
                };
                cache.set(node, &entry)?;
            }
        }

        for node in cache.nodes().into_iter().filter(|n| !existing.contains(n)) {
            if let Err(e) = self.handle_deletion(&mut cache, &dynakubes, &node, now).await {
                warn!(node = %node, "Failed to handle removed node: {}", e);
            }
        }

        self.store(&mut cache).await
    }

    /// Drop the entry of a deleted node, marking it first unless it is already stale
    async fn handle_deletion(
        &self,
        cache: &mut NodeCache,
        dynakubes: &[DynaKube],
        node: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = match cache.get(node) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(e) => {
                cache.delete(node);
                return Err(e);
            }
        };

        let result = if now - entry.seen > to_chrono(timing::NODE_STALE_AFTER) {
            debug!(node, "Removing stale node without event");
            Ok(())
        } else if entry.ip.is_empty() {
            debug!(node, "Removing node without ip address");
            Ok(())
        } else {
            match find_dynakube(dynakubes, &entry.instance) {
                Some(dynakube) => self.mark_for_termination(cache, dynakube, node, now).await,
                None => {
                    debug!(node, dynakube = %entry.instance, "Owning DynaKube is gone");
                    Ok(())
                }
            }
        };

        cache.delete(node);
        result
    }

    /// Mark an unschedulable node. A node missing from the cache is added first,
    /// owned by the DynaKube whose OneAgent instances list it.
    async fn handle_unschedulable(
        &self,
        cache: &mut NodeCache,
        dynakubes: &[DynaKube],
        node: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let instance = match cache.get(node)? {
            Some(entry) => entry.instance,
            None => {
                let Some((dynakube, ip)) = owner_of_node(dynakubes, node) else {
                    debug!(node, "No DynaKube runs a OneAgent on the node");
                    return Ok(());
                };
                let entry = CacheEntry {
                    instance: dynakube.name_any(),
                    ip: ip.to_string(),
                    seen: now,
                    marked: None,
                };
                cache.set(node, &entry)?;
                entry.instance
            }
        };

        match find_dynakube(dynakubes, &instance) {
            Some(dynakube) => self.mark_for_termination(cache, dynakube, node, now).await,
            None => {
                debug!(node, dynakube = %instance, "Owning DynaKube is gone");
                Ok(())
            }
        }
    }

    /// Send a mark-for-termination event for a cached node, at most once per mark interval.
    /// The mark time only advances when the event was accepted.
    async fn mark_for_termination(
        &self,
        cache: &mut NodeCache,
        dynakube: &DynaKube,
        node: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut entry) = cache.get(node)? else {
            return Ok(());
        };
        if !is_marking_due(entry.marked, now) {
            debug!(node, "Node was marked for termination recently");
            return Ok(());
        }

        let dtc = self.dynatrace_client(dynakube).await?;
        let entity_id = match dtc.get_entity_id_for_ip(&entry.ip).await {
            Ok(id) => id,
            Err(DynatraceApiError::HostNotFound(ip)) => {
                info!(node, ip = %ip, "No host entity for node, skipping mark for termination");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let timestamp = (entry.seen - to_chrono(timing::NODE_EVENT_OFFSET))
            .timestamp_millis()
            .max(0) as u64;
        dtc.send_event(&EventData::marked_for_termination(&entity_id, timestamp))
            .await?;
        info!(node, entity = %entity_id, "Node marked for termination");

        entry.marked = Some(now);
        cache.set(node, &entry)
    }

    async fn list_dynakubes(&self) -> Result<Vec<DynaKube>> {
        let api: Api<DynaKube> = Api::namespaced(self.client.clone(), &self.operator_namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn dynatrace_client(&self, dynakube: &DynaKube) -> Result<Arc<dyn DynatraceClient>> {
        let namespace = dynakube.namespace().unwrap_or_default();
        let tokens = self
            .tokens
            .read(&namespace, &dynakube.tokens_secret_name())
            .await?;
        self.builder.build(dynakube, &tokens).await
    }

    async fn store(&self, cache: &mut NodeCache) -> Result<()> {
        if !cache.changed() {
            return Ok(());
        }
        let owner = if cache.exists() {
            None
        } else {
            self.cache_owner().await?
        };
        cache.store(&self.client, owner).await
    }

    async fn cache_owner(&self) -> Result<Option<OwnerReference>> {
        match self.pod_name.as_deref() {
            Some(pod) => operator_deployment_owner(&self.client, &self.operator_namespace, pod)
                .await
                .map(Some),
            None => Ok(None),
        }
    }
}

/// Forward node watch events into the tracker until the watch stream ends
pub async fn watch_nodes(client: Client, handle: NodeTrackerHandle) -> anyhow::Result<()> {
    let nodes: Api<Node> = Api::all(client);
    let mut stream = watcher(nodes, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = stream.try_next().await? {
        match event {
            watcher::Event::Apply(node) => handle.node_updated(node),
            watcher::Event::Delete(node) => handle.node_deleted(node.name_any()),
            watcher::Event::Init | watcher::Event::InitApply(_) | watcher::Event::InitDone => {}
        }
    }
    Ok(())
}
