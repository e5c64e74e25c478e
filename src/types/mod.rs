// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Custom resource definitions owned by the operator.

pub mod cluster_detector;
pub mod replicator;

pub use cluster_detector::{ClusterDetector, ClusterDetectorStatus, HealthState, Role};
pub use replicator::{Replicator, ReplicatorSpec, ReplicatorStatus};
