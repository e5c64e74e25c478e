// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes reconcilers that react to watch events.

pub mod cluster_detector;
pub mod replicator;

pub use cluster_detector::ClusterDetectorReconciler;
pub use replicator::ReplicatorReconciler;
