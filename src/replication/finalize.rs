// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Removal of replicated resources from secondary clusters.
//!
//! The primary cluster needs no explicit cleanup: its resources carry an owner
//! reference to the Replicator and are garbage collected with it.

use futures::future::join_all;
use tracing::{error, info, instrument};

use super::manifest::ResourceKind;
use crate::constants::secrets;
use crate::error::{ReplicantError, Result};
use crate::kubernetes::credentials::ClusterTarget;
use crate::types::Replicator;

/// Resources to delete on a secondary, dependents before what they depend on.
fn teardown_order(replicator: &Replicator) -> Vec<(ResourceKind, &str)> {
    let spec = &replicator.spec;
    let mut order = Vec::new();
    if spec.ingress_spec.is_some() {
        if spec.ingress_secure_enabled {
            order.push((ResourceKind::Secret, secrets::CLIENT_SECRET_NAME));
            order.push((ResourceKind::Secret, secrets::INGRESS_SECRET_NAME));
        }
        order.push((ResourceKind::Ingress, spec.ingress_name.as_str()));
    }
    if spec.service_spec.is_some() {
        order.push((ResourceKind::Service, spec.service_name.as_str()));
    }
    order.push((ResourceKind::Deployment, spec.deployment_name.as_str()));
    order.push((ResourceKind::ConfigMap, spec.config_map_name.as_str()));
    order
}

/// Delete everything a Replicator put on one secondary, then its namespace.
///
/// Every deletion is attempted; failures are aggregated. Already absent resources count as deleted.
#[instrument(skip(replicator, target), fields(cluster = %target.identity))]
pub async fn teardown_secondary(replicator: &Replicator, target: &ClusterTarget) -> Result<()> {
    let namespace = replicator.spec.replication_namespace.as_str();
    let mut errors = Vec::new();

    for (kind, name) in teardown_order(replicator) {
        match target.ops.delete(kind, namespace, name).await {
            Ok(()) => info!("Deleted {} {}/{} on {}", kind, namespace, name, target.identity),
            Err(e) => {
                error!(
                    "Failed to delete {} {}/{} on {}: {}",
                    kind, namespace, name, target.identity, e
                );
                errors.push(e);
            }
        }
    }

    match target.ops.delete(ResourceKind::Namespace, "", namespace).await {
        Ok(()) => info!("Deleted namespace {} on {}", namespace, target.identity),
        Err(e) => {
            error!(
                "Failed to delete namespace {} on {}: {}",
                namespace, target.identity, e
            );
            errors.push(e);
        }
    }

    ReplicantError::aggregate(errors)
}

/// Tear down all secondaries concurrently; one unreachable cluster does not block the others.
pub async fn teardown_secondaries(
    replicator: &Replicator,
    targets: &[ClusterTarget],
) -> Result<()> {
    let results = join_all(
        targets
            .iter()
            .map(|target| teardown_secondary(replicator, target)),
    )
    .await;

    ReplicantError::aggregate(results.into_iter().filter_map(|r| r.err()).collect())
}
