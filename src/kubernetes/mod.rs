// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, cluster clients, health probing and namespace management.

pub mod crd;
pub mod credentials;
pub mod health;
pub mod namespaces;
pub mod ops;

pub use crd::wait_for_crds;
pub use credentials::{ClusterConnector, ClusterTarget, CredentialFanout, SecretCredentialSource};
pub use health::{HealthProbe, LivezProbe};
pub use namespaces::ensure_namespace_exists;
pub use ops::{ClusterOps, KubeClusterOps};
