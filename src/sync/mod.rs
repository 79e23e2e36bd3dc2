// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Payload secrets and their replication into governed namespaces.

pub mod payloads;
pub mod secrets;

pub use payloads::{Payload, PayloadGenerator};
pub use secrets::SecretFanOut;
