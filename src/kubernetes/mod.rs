// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, namespaces, secrets and ownership.

pub mod crd;
pub mod namespaces;
pub mod owner;
pub mod secrets;

pub use crd::wait_for_dynakube_crd;
pub use namespaces::{is_terminating, list_namespaces, update_namespace};
pub use owner::operator_deployment_owner;
pub use secrets::{create_or_update_secret, delete_secret, SecretData, SecretWrite};
