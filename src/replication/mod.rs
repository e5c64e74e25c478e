// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The replication engine: desired configurations, diffing against what a cluster
//! carries, fan-out over clusters and teardown of secondaries.

pub mod desired;
pub mod fanout;
pub mod finalize;
pub mod ingress;
pub mod managed;
pub mod manifest;

pub use fanout::{replicate, Replication, ReplicationRun, StatusAccumulator};
pub use finalize::teardown_secondaries;
pub use manifest::{Manifest, ResourceKind};
