// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Node tracking: a persisted per-node cache and the loop feeding it.

pub mod cache;
pub mod tracker;

pub use cache::{CacheEntry, NodeCache};
pub use tracker::{channel, watch_nodes, NodeEvents, NodeTracker, NodeTrackerHandle};
