// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Replicator reconciler - replicates declared resources to every target cluster and
//! cleans secondaries up before a Replicator goes away.

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Patch, PatchParams},
    runtime::{controller::Action, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{ERROR_REQUEUE_SECS, FINALIZER};
use crate::error::{ReplicantError, Result};
use crate::kubernetes::{ensure_namespace_exists, ClusterConnector, ClusterTarget};
use crate::pki::CertificateIssuer;
use crate::replication::fanout::replicate;
use crate::replication::finalize::teardown_secondaries;
use crate::replication::manifest::ResourceKind;
use crate::types::replicator::Lifecycle;
use crate::types::{Replicator, ReplicatorStatus};

/// Writes the engine makes to the Replicator object itself
#[async_trait]
pub trait ReplicatorStore: Send + Sync {
    async fn add_finalizer(&self, replicator: &Replicator) -> Result<()>;
    async fn remove_finalizer(&self, replicator: &Replicator) -> Result<()>;
    async fn publish_status(&self, replicator: &Replicator, status: ReplicatorStatus)
        -> Result<()>;
}

/// `ReplicatorStore` on the API server of the primary cluster
pub struct KubeReplicatorStore {
    client: Client,
}

impl KubeReplicatorStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, replicator: &Replicator) -> Api<Replicator> {
        Api::namespaced(self.client.clone(), &replicator.namespace().unwrap_or_default())
    }

    async fn patch_finalizers(
        &self,
        replicator: &Replicator,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(replicator)
            .patch(
                &replicator.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ReplicatorStore for KubeReplicatorStore {
    async fn add_finalizer(&self, replicator: &Replicator) -> Result<()> {
        let mut finalizers = replicator.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(replicator, finalizers).await
    }

    async fn remove_finalizer(&self, replicator: &Replicator) -> Result<()> {
        let finalizers = replicator
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(replicator, finalizers).await
    }

    async fn publish_status(
        &self,
        replicator: &Replicator,
        status: ReplicatorStatus,
    ) -> Result<()> {
        let patch = json!({ "status": status });
        self.api(replicator)
            .patch_status(
                &replicator.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Shared by every reconciliation of every Replicator
pub struct ReplicatorContext {
    pub store: Arc<dyn ReplicatorStore>,
    pub connector: Arc<dyn ClusterConnector>,
    pub issuer: CertificateIssuer,
    pub resync_interval: Duration,
}

pub struct ReplicatorReconciler {
    client: Client,
    context: ReplicatorContext,
}

impl ReplicatorReconciler {
    pub fn new(
        client: Client,
        connector: Arc<dyn ClusterConnector>,
        resync_interval: Duration,
    ) -> Self {
        let context = ReplicatorContext {
            store: Arc::new(KubeReplicatorStore::new(client.clone())),
            connector,
            issuer: CertificateIssuer::new(),
            resync_interval,
        };
        Self { client, context }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let replicators: Api<Replicator> = Api::all(self.client.clone());
        let context = Arc::new(self.context);

        Controller::new(replicators, WatcherConfig::default())
            .owns(Api::<ConfigMap>::all(self.client.clone()), WatcherConfig::default())
            .owns(Api::<Deployment>::all(self.client.clone()), WatcherConfig::default())
            .owns(Api::<Service>::all(self.client.clone()), WatcherConfig::default())
            .owns(Api::<Ingress>::all(self.client.clone()), WatcherConfig::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled replicator: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

#[instrument(skip(replicator, ctx), fields(replicator = %replicator.name_any()))]
async fn reconcile(replicator: Arc<Replicator>, ctx: Arc<ReplicatorContext>) -> Result<Action> {
    match replicator.lifecycle() {
        Lifecycle::Active {
            finalizer_held: false,
        } => {
            // The patch triggers the next pass
            ctx.store.add_finalizer(&replicator).await?;
            info!("Added finalizer to replicator {}", replicator.name_any());
            Ok(Action::await_change())
        }
        Lifecycle::Active {
            finalizer_held: true,
        } => replicate_pass(&replicator, &ctx).await,
        Lifecycle::Finalizing {
            cleanup_done: false,
        } => finalize(&replicator, &ctx).await,
        Lifecycle::Finalizing { cleanup_done: true } => Ok(Action::await_change()),
    }
}

/// Handles for every target except the primary, which is replicated to separately
async fn secondaries(
    replicator: &Replicator,
    ctx: &ReplicatorContext,
) -> Result<Vec<ClusterTarget>> {
    let primary = ctx.connector.primary();
    let targets: Vec<String> = replicator
        .spec
        .target_cluster
        .iter()
        .filter(|t| **t != primary.identity)
        .cloned()
        .collect();
    ctx.connector.clients_for(&targets).await
}

/// Create the replication namespace wherever it is missing. Failures are logged only.
async fn prepare_namespaces(
    namespace: &str,
    primary: &ClusterTarget,
    secondaries: &[ClusterTarget],
) {
    let results = join_all(
        std::iter::once(primary)
            .chain(secondaries)
            .map(|target| async move {
                (target, ensure_namespace_exists(target.ops.as_ref(), namespace).await)
            }),
    )
    .await;

    for (target, result) in results {
        if let Err(e) = result {
            warn!("Could not prepare namespace on {}: {}", target.identity, e);
        }
    }
}

async fn replicate_pass(replicator: &Replicator, ctx: &ReplicatorContext) -> Result<Action> {
    let primary = ctx.connector.primary();
    let secondaries = secondaries(replicator, ctx).await?;

    prepare_namespaces(&replicator.spec.replication_namespace, &primary, &secondaries).await;

    let replication = replicate(replicator, &primary, &secondaries, &ctx.issuer).await;
    let synced = replication.sync_state();
    ctx.store
        .publish_status(replicator, replication.status.into_status(synced))
        .await?;
    info!("Replicator {} is {}", replicator.name_any(), synced);

    replication.result?;
    Ok(Action::requeue(ctx.resync_interval))
}

/// Best-effort cleanup of secondaries, then release the finalizer and drop the primary
/// namespace. The Replicator is being erased, so no status is written.
///
/// The finalizer is held while the secondaries cannot be resolved at all.
async fn finalize(replicator: &Replicator, ctx: &ReplicatorContext) -> Result<Action> {
    let name = replicator.name_any();
    let namespace = &replicator.spec.replication_namespace;

    let targets = secondaries(replicator, ctx).await.map_err(|e| {
        error!("Could not resolve secondaries of {}, keeping finalizer: {}", name, e);
        e
    })?;
    if let Err(e) = teardown_secondaries(replicator, &targets).await {
        warn!("Cleanup of secondaries for {} was incomplete: {}", name, e);
    }

    ctx.store.remove_finalizer(replicator).await?;
    info!("Removed finalizer from replicator {}", name);

    let primary = ctx.connector.primary();
    match primary.ops.delete(ResourceKind::Namespace, "", namespace).await {
        Ok(()) => info!("Deleted namespace {} on {}", namespace, primary.identity),
        Err(e) => error!(
            "Failed to delete namespace {} on {}: {}",
            namespace, primary.identity, e
        ),
    }

    Ok(Action::await_change())
}

fn error_policy(
    _replicator: Arc<Replicator>,
    error: &ReplicantError,
    _ctx: Arc<ReplicatorContext>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}
