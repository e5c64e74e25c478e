// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Fan-out of a Replicator's resources to the primary and every secondary cluster.
//!
//! All state of one reconciliation pass lives in a [`ReplicationRun`] per cluster
//! and the [`StatusAccumulator`] it fills; nothing is shared between passes.

use futures::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

use super::manifest::{Manifest, ResourceKind};
use super::{desired, ingress};
use crate::constants::FIELD_MANAGER;
use crate::error::{ReplicantError, Result};
use crate::kubernetes::credentials::ClusterTarget;
use crate::kubernetes::ops::ClusterOps;
use crate::pki::CertificateIssuer;
use crate::types::replicator::{ApplyOutcome, PerResourceApplyStatus, SyncState};
use crate::types::{Replicator, ReplicatorStatus};

/// Per-resource outcomes of one pass, keyed by (cluster, kind, name)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusAccumulator {
    entries: BTreeMap<(String, ResourceKind, String), ApplyOutcome>,
}

impl StatusAccumulator {
    pub fn record(&mut self, cluster: &str, kind: ResourceKind, name: &str, outcome: ApplyOutcome) {
        self.entries
            .insert((cluster.to_string(), kind, name.to_string()), outcome);
    }

    pub fn outcome(&self, cluster: &str, kind: ResourceKind, name: &str) -> Option<ApplyOutcome> {
        self.entries
            .get(&(cluster.to_string(), kind, name.to_string()))
            .copied()
    }

    pub fn merge(&mut self, other: StatusAccumulator) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_status(self, synced: SyncState) -> ReplicatorStatus {
        ReplicatorStatus {
            applied: self
                .entries
                .into_iter()
                .map(|((cluster, kind, name), apply_status)| PerResourceApplyStatus {
                    cluster,
                    kind: kind.to_string(),
                    name,
                    apply_status,
                })
                .collect(),
            synced: Some(synced),
        }
    }
}

/// Everything one pass needs to replicate to one cluster
pub struct ReplicationRun<'a> {
    pub replicator: &'a Replicator,
    pub target: &'a ClusterTarget,
    /// Set only on the primary cluster; secondaries cannot point back to the Replicator
    pub owner: Option<OwnerReference>,
    pub issuer: &'a CertificateIssuer,
}

impl<'a> ReplicationRun<'a> {
    pub fn primary(
        replicator: &'a Replicator,
        target: &'a ClusterTarget,
        issuer: &'a CertificateIssuer,
    ) -> Self {
        Self {
            replicator,
            target,
            owner: replicator.controller_owner_ref(&()),
            issuer,
        }
    }

    pub fn secondary(
        replicator: &'a Replicator,
        target: &'a ClusterTarget,
        issuer: &'a CertificateIssuer,
    ) -> Self {
        Self {
            replicator,
            target,
            owner: None,
            issuer,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.target.identity
    }

    pub fn ops(&self) -> &dyn ClusterOps {
        self.target.ops.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.replicator.spec.replication_namespace
    }
}

/// Apply `desired` unless the cluster already carries it. Returns whether a write happened.
async fn converge(run: &ReplicationRun<'_>, desired: &Manifest) -> Result<bool> {
    let observed = run
        .ops()
        .get(desired.kind(), desired.namespace(), desired.name())
        .await?;
    if desired.is_converged(observed.as_ref(), FIELD_MANAGER)? {
        debug!(
            "{} {} on {} is up to date",
            desired.kind(),
            desired.name(),
            run.cluster()
        );
        return Ok(false);
    }

    run.ops().apply(desired, FIELD_MANAGER).await?;
    info!(
        "Applied {} {} on {}",
        desired.kind(),
        desired.name(),
        run.cluster()
    );
    Ok(true)
}

fn apply_failed(
    run: &ReplicationRun<'_>,
    kind: ResourceKind,
    name: &str,
    e: ReplicantError,
) -> ReplicantError {
    ReplicantError::ApplyFailed {
        cluster: run.cluster().to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        source: Box::new(e),
    }
}

/// Converge one resource and record its outcome; failures are collected, not returned.
async fn apply_one(
    run: &ReplicationRun<'_>,
    desired: &Manifest,
    status: &mut StatusAccumulator,
    errors: &mut Vec<ReplicantError>,
) {
    let outcome = match converge(run, desired).await {
        Ok(_) => ApplyOutcome::Applied,
        Err(e) => {
            error!(
                "Failed to apply {} {} on {}: {}",
                desired.kind(),
                desired.name(),
                run.cluster(),
                e
            );
            errors.push(apply_failed(run, desired.kind(), desired.name(), e));
            ApplyOutcome::NotApplied
        }
    };
    status.record(run.cluster(), desired.kind(), desired.name(), outcome);
}

/// Apply every declared resource to one cluster.
///
/// Each resource is attempted regardless of earlier failures; all errors are aggregated.
#[instrument(skip(run, status), fields(cluster = %run.cluster()))]
pub async fn apply_resources(
    run: &ReplicationRun<'_>,
    status: &mut StatusAccumulator,
) -> Result<()> {
    let spec = &run.replicator.spec;
    let owner = run.owner.as_ref();
    let mut errors = Vec::new();

    apply_one(run, &desired::config_map(spec, owner), status, &mut errors).await;
    apply_one(run, &desired::deployment(spec, owner), status, &mut errors).await;

    if let Some(service) = desired::service(spec, owner) {
        apply_one(run, &service, status, &mut errors).await;
    }

    if spec.ingress_spec.is_some() {
        match ingress::prepare(run, status).await {
            Ok(Some(ingress)) => apply_one(run, &ingress, status, &mut errors).await,
            Ok(None) => {}
            Err(e) => {
                error!(
                    "Failed to prepare ingress {} on {}: {}",
                    spec.ingress_name,
                    run.cluster(),
                    e
                );
                status.record(
                    run.cluster(),
                    ResourceKind::Ingress,
                    &spec.ingress_name,
                    ApplyOutcome::NotApplied,
                );
                errors.push(apply_failed(run, ResourceKind::Ingress, &spec.ingress_name, e));
            }
        }
    }

    ReplicantError::aggregate(errors)
}

/// Outcome of fanning a Replicator out over its clusters
pub struct Replication {
    pub status: StatusAccumulator,
    pub result: Result<()>,
}

impl Replication {
    pub fn sync_state(&self) -> SyncState {
        if self.result.is_ok() {
            SyncState::Synced
        } else {
            SyncState::NotSynced
        }
    }
}

/// Replicate to the primary first, then to every secondary concurrently.
///
/// A primary failure ends the pass before any secondary is touched. Secondary
/// failures never stop the other secondaries; any of them makes the pass `not synced`.
pub async fn replicate(
    replicator: &Replicator,
    primary: &ClusterTarget,
    secondaries: &[ClusterTarget],
    issuer: &CertificateIssuer,
) -> Replication {
    let mut status = StatusAccumulator::default();

    let run = ReplicationRun::primary(replicator, primary, issuer);
    if let Err(e) = apply_resources(&run, &mut status).await {
        error!("Replication to primary cluster {} failed: {}", primary.identity, e);
        return Replication {
            status,
            result: Err(e),
        };
    }

    let passes = secondaries.iter().map(|target| async move {
        let run = ReplicationRun::secondary(replicator, target, issuer);
        let mut status = StatusAccumulator::default();
        let result = apply_resources(&run, &mut status).await;
        (target.identity.as_str(), status, result)
    });
    let mut outcomes = join_all(passes).await;
    outcomes.sort_by(|a, b| a.0.cmp(b.0));

    let mut failed = Vec::new();
    for (identity, cluster_status, result) in outcomes {
        status.merge(cluster_status);
        if let Err(e) = result {
            warn!("Could not replicate to secondary cluster {}: {}", identity, e);
            failed.push(identity.to_string());
        }
    }

    let result = if failed.is_empty() {
        Ok(())
    } else {
        Err(ReplicantError::NotSynced(failed))
    };
    Replication { status, result }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::{mutating_calls, new_call_log, CallLog, FakeCluster};
    use crate::types::replicator::DeploymentTemplate;
    use crate::types::ReplicatorSpec;
    use k8s_openapi::api::core::v1::{
        Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, ServicePort, ServiceSpec,
        Volume,
    };
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    pub(crate) const PRIMARY: &str = "kubernetes.kubernetes-admin";

    pub(crate) fn replicator() -> Replicator {
        Replicator {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("uid-web".to_string()),
                ..Default::default()
            },
            spec: ReplicatorSpec {
                replication_namespace: "demo".to_string(),
                target_cluster: vec!["a.a".to_string(), "b.b".to_string(), "c.c".to_string()],
                config_map_name: "web-config".to_string(),
                config_map_data: Some(BTreeMap::from([(
                    "index.html".to_string(),
                    "hello".to_string(),
                )])),
                deployment_name: "web".to_string(),
                deployment_spec: DeploymentTemplate {
                    replicas: Some(1),
                    strategy: None,
                    template: PodTemplateSpec {
                        metadata: None,
                        spec: Some(PodSpec {
                            containers: vec![Container {
                                name: "nginx".to_string(),
                                image: Some("nginx:1.25".to_string()),
                                ..Default::default()
                            }],
                            volumes: Some(vec![Volume {
                                name: "cache".to_string(),
                                empty_dir: Some(EmptyDirVolumeSource::default()),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }),
                    },
                },
                service_name: "web".to_string(),
                service_spec: Some(ServiceSpec {
                    ports: Some(vec![ServicePort {
                        port: 80,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ingress_name: "web".to_string(),
                ingress_spec: Some(IngressSpec {
                    rules: Some(vec![IngressRule {
                        host: Some("a.example.com".to_string()),
                        http: None,
                    }]),
                    ..Default::default()
                }),
                ingress_secure_enabled: false,
            },
            status: None,
        }
    }

    pub(crate) fn target(identity: &str, log: &CallLog) -> (Arc<FakeCluster>, ClusterTarget) {
        let cluster = FakeCluster::new(identity, log.clone());
        let target = ClusterTarget {
            identity: identity.to_string(),
            ops: cluster.clone(),
        };
        (cluster, target)
    }

    #[tokio::test]
    async fn test_converged_pass_makes_no_writes() {
        let log = new_call_log();
        let (_, primary) = target(PRIMARY, &log);
        let (_, east) = target("a.a", &log);
        let issuer = CertificateIssuer::new();
        let replicator = replicator();

        let first = replicate(&replicator, &primary, &[east.clone()], &issuer).await;
        assert!(first.result.is_ok());
        let writes = mutating_calls(&log).len();
        assert_eq!(writes, 8);

        let second = replicate(&replicator, &primary, &[east], &issuer).await;

        assert!(second.result.is_ok());
        assert_eq!(mutating_calls(&log).len(), writes);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn test_spec_change_is_reapplied() {
        let log = new_call_log();
        let (cluster, primary) = target(PRIMARY, &log);
        let issuer = CertificateIssuer::new();
        let mut replicator = replicator();
        replicate(&replicator, &primary, &[], &issuer).await.result.unwrap();
        let before = mutating_calls(&log).len();

        replicator.spec.deployment_spec.replicas = Some(3);
        replicate(&replicator, &primary, &[], &issuer).await.result.unwrap();

        let writes = mutating_calls(&log);
        assert_eq!(writes.len(), before + 1);
        assert_eq!(writes[before], format!("{}: apply Deployment demo/web", PRIMARY));
        let Some(Manifest::Deployment(d)) = cluster.object(ResourceKind::Deployment, "demo", "web")
        else {
            panic!("deployment missing");
        };
        assert_eq!(d.spec.unwrap().replicas, Some(3));
    }

    #[tokio::test]
    async fn test_owner_link_only_on_primary() {
        let log = new_call_log();
        let (primary_cluster, primary) = target(PRIMARY, &log);
        let (east_cluster, east) = target("a.a", &log);
        let issuer = CertificateIssuer::new();

        replicate(&replicator(), &primary, &[east], &issuer).await.result.unwrap();

        let owned = primary_cluster
            .object(ResourceKind::ConfigMap, "demo", "web-config")
            .unwrap();
        let owner = &owned.meta().owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Replicator");
        assert_eq!(owner.uid, "uid-web");
        assert_eq!(owner.controller, Some(true));

        let replica = east_cluster
            .object(ResourceKind::ConfigMap, "demo", "web-config")
            .unwrap();
        assert!(replica.meta().owner_references.is_none());
    }

    #[tokio::test]
    async fn test_secondary_failure_is_isolated() {
        let log = new_call_log();
        let (_, primary) = target(PRIMARY, &log);
        let (a, ta) = target("a.a", &log);
        let (b, tb) = target("b.b", &log);
        let (c, tc) = target("c.c", &log);
        b.fail_applies_of(ResourceKind::Service);
        let issuer = CertificateIssuer::new();

        let replication = replicate(&replicator(), &primary, &[ta, tb, tc], &issuer).await;

        assert_eq!(replication.sync_state(), SyncState::NotSynced);
        assert!(matches!(&replication.result, Err(ReplicantError::NotSynced(ids)) if ids == &vec!["b.b".to_string()]));
        for cluster in [&a, &c] {
            assert_eq!(cluster.names(ResourceKind::Service), vec!["web"]);
            assert_eq!(cluster.names(ResourceKind::Ingress), vec!["web"]);
        }
        // siblings of the failed resource still land on b
        assert_eq!(b.names(ResourceKind::Ingress), vec!["web"]);
        let status = &replication.status;
        assert_eq!(
            status.outcome("b.b", ResourceKind::Service, "web"),
            Some(ApplyOutcome::NotApplied)
        );
        assert_eq!(
            status.outcome("a.a", ResourceKind::Service, "web"),
            Some(ApplyOutcome::Applied)
        );
        assert_eq!(
            status.outcome("c.c", ResourceKind::Service, "web"),
            Some(ApplyOutcome::Applied)
        );
    }

    #[tokio::test]
    async fn test_primary_failure_skips_secondaries() {
        let log = new_call_log();
        let (primary_cluster, primary) = target(PRIMARY, &log);
        let (east_cluster, east) = target("a.a", &log);
        primary_cluster.fail_applies_of(ResourceKind::Deployment);
        let issuer = CertificateIssuer::new();

        let replication = replicate(&replicator(), &primary, &[east], &issuer).await;

        assert!(matches!(replication.result, Err(ReplicantError::ApplyFailed { .. })));
        assert!(east_cluster.names(ResourceKind::ConfigMap).is_empty());
        assert!(!log.lock().unwrap().iter().any(|c| c.starts_with("a.a:")));
    }

    #[tokio::test]
    async fn test_optional_resources_are_skipped() {
        let log = new_call_log();
        let (cluster, primary) = target(PRIMARY, &log);
        let issuer = CertificateIssuer::new();
        let mut replicator = replicator();
        replicator.spec.service_spec = None;
        replicator.spec.ingress_spec = None;

        let replication = replicate(&replicator, &primary, &[], &issuer).await;

        assert!(replication.result.is_ok());
        assert_eq!(replication.status.len(), 2);
        assert!(cluster.names(ResourceKind::Service).is_empty());
        assert!(cluster.names(ResourceKind::Ingress).is_empty());
    }

    #[test]
    fn test_status_rows_are_ordered_and_complete() {
        let mut status = StatusAccumulator::default();
        status.record("b.b", ResourceKind::Deployment, "web", ApplyOutcome::NotApplied);
        status.record("a.a", ResourceKind::ConfigMap, "web", ApplyOutcome::Applied);
        status.record("a.a", ResourceKind::ConfigMap, "web", ApplyOutcome::Applied);

        let published = status.into_status(SyncState::NotSynced);

        assert_eq!(published.synced, Some(SyncState::NotSynced));
        assert_eq!(published.applied.len(), 2);
        assert_eq!(published.applied[0].cluster, "a.a");
        assert_eq!(published.applied[1].kind, "Deployment");
    }
}
