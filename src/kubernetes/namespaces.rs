// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace management utilities

use crate::error::{ReplicantError, Result};
use crate::kubernetes::ops::{ClusterOps, CreateOutcome};
use crate::replication::manifest::{Manifest, ResourceKind};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use tracing::{debug, info, instrument};

/// Ensure a namespace exists in the cluster, create if it doesn't
#[instrument(skip(ops))]
pub async fn ensure_namespace_exists(ops: &dyn ClusterOps, namespace: &str) -> Result<()> {
    let existing = ops
        .get(ResourceKind::Namespace, "", namespace)
        .await
        .map_err(|e| {
            ReplicantError::NamespaceError(format!(
                "Failed to check namespace {}: {}",
                namespace, e
            ))
        })?;
    if existing.is_some() {
        debug!("Namespace {} already exists", namespace);
        return Ok(());
    }

    info!("Creating namespace {}", namespace);
    let ns = Manifest::Namespace(Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    match ops.create(&ns).await {
        Ok(CreateOutcome::Created) => {
            info!("Namespace {} created successfully", namespace);
            Ok(())
        }
        Ok(CreateOutcome::AlreadyExists) => {
            debug!("Namespace {} was created concurrently", namespace);
            Ok(())
        }
        Err(e) => Err(ReplicantError::NamespaceError(format!(
            "Failed to create namespace {}: {}",
            namespace, e
        ))),
    }
}
