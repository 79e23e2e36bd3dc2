// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource and status types.

pub mod conditions;
pub mod dynakube;
pub mod feature_flags;
pub mod selector;

pub use dynakube::{DynaKube, DynaKubeSpec, DynaKubeStatus};
