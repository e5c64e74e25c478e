// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster catalog reconciler - keeps one ClusterDetector per context of the
//! credential document, with its role and live health.

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    runtime::{controller::Action, reflector::ObjectRef, Controller},
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::constants::{ERROR_REQUEUE_SECS, FIELD_MANAGER};
use crate::error::{ReplicantError, Result};
use crate::kubernetes::credentials::{CredentialContext, CredentialSource};
use crate::kubernetes::health::Health;
use crate::kubernetes::HealthProbe;
use crate::types::{ClusterDetector, ClusterDetectorStatus, HealthState};

/// What an upsert did to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Storage of the ClusterDetector catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ClusterDetector>>;
    async fn delete(&self, name: &str) -> Result<()>;
    /// Create or update labels and spec; `Unchanged` when nothing differs
    async fn upsert(&self, desired: &ClusterDetector) -> Result<UpsertOutcome>;
    async fn update_status(&self, name: &str, status: &ClusterDetectorStatus) -> Result<()>;
}

/// `CatalogStore` on the API server of the local cluster
pub struct KubeCatalogStore {
    api: Api<ClusterDetector>,
}

impl KubeCatalogStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl CatalogStore for KubeCatalogStore {
    async fn list(&self) -> Result<Vec<ClusterDetector>> {
        Ok(self.api.list(&ListParams::default()).await?.items)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn upsert(&self, desired: &ClusterDetector) -> Result<UpsertOutcome> {
        let name = desired.name_any();
        match self.api.get_opt(&name).await? {
            None => {
                self.api.create(&PostParams::default(), desired).await?;
                Ok(UpsertOutcome::Created)
            }
            Some(existing) if existing.same_declaration(desired) => Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                self.api
                    .patch(
                        &name,
                        &PatchParams::apply(FIELD_MANAGER).force(),
                        &Patch::Apply(desired),
                    )
                    .await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn update_status(&self, name: &str, status: &ClusterDetectorStatus) -> Result<()> {
        let patch = json!({ "status": status });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Shared by every catalog pass
pub struct CatalogContext {
    pub store: Arc<dyn CatalogStore>,
    pub source: Arc<dyn CredentialSource>,
    pub probe: Arc<dyn HealthProbe>,
    pub namespace: String,
    pub local_identity: String,
    pub resync_interval: Duration,
}

pub struct ClusterDetectorReconciler {
    client: Client,
    secret_namespace: String,
    secret_name: String,
    context: CatalogContext,
}

impl ClusterDetectorReconciler {
    pub fn new(
        client: Client,
        source: Arc<dyn CredentialSource>,
        probe: Arc<dyn HealthProbe>,
        config: &Config,
    ) -> Self {
        let context = CatalogContext {
            store: Arc::new(KubeCatalogStore::new(client.clone(), &config.catalog_namespace)),
            source,
            probe,
            namespace: config.catalog_namespace.clone(),
            local_identity: config.local_identity(),
            resync_interval: config.resync_interval,
        };
        Self {
            client,
            secret_namespace: config.credential_secret_namespace.clone(),
            secret_name: config.credential_secret_name.clone(),
            context,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.secret_namespace);
        let detectors: Api<ClusterDetector> =
            Api::namespaced(self.client.clone(), &self.context.namespace);
        let credential_secret =
            ObjectRef::<Secret>::new(&self.secret_name).within(&self.secret_namespace);
        let context = Arc::new(self.context);

        // Every catalog change maps back to the one credential secret
        Controller::new(
            secrets,
            WatcherConfig::default().fields(&format!("metadata.name={}", self.secret_name)),
        )
        .watches(detectors, WatcherConfig::default(), move |_| {
            Some(credential_secret.clone())
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok(o) => debug!("Reconciled cluster catalog: {:?}", o),
                Err(e) => warn!("Reconciliation error: {:?}", e),
            }
        })
        .await;

        Ok(())
    }
}

/// Whether moving from `previous` to `next` is worth a log line
pub fn health_transition(previous: Option<HealthState>, next: HealthState) -> bool {
    previous != Some(next)
}

fn is_current(entry: &ClusterDetector, contexts: &[CredentialContext]) -> bool {
    contexts
        .iter()
        .any(|c| c.name == entry.spec.context && c.identity() == entry.name_any())
}

async fn probe(ctx: &CatalogContext, context: &CredentialContext) -> Health {
    match context.server.as_deref() {
        Some(server) => ctx.probe.probe(server).await,
        None => Health::unknown(format!(
            "context {} has no cluster endpoint in the credential document",
            context.name
        )),
    }
}

#[instrument(skip(_secret, ctx))]
async fn reconcile(_secret: Arc<Secret>, ctx: Arc<CatalogContext>) -> Result<Action> {
    let document = ctx.source.load().await?;
    let contexts = document.contexts();
    let existing = ctx.store.list().await?;

    for entry in existing.iter().filter(|e| !is_current(e, contexts)) {
        ctx.store.delete(&entry.name_any()).await?;
        info!(
            "Removed cluster {} (context {}) from the catalog",
            entry.name_any(),
            entry.spec.context
        );
    }

    let mut desired = Vec::with_capacity(contexts.len());
    for context in contexts {
        let entry = ClusterDetector::for_context(
            &ctx.namespace,
            &context.name,
            &context.cluster,
            &context.user,
            &ctx.local_identity,
        );
        match ctx.store.upsert(&entry).await? {
            UpsertOutcome::Created => info!(
                "Cataloged {} cluster {} (context {})",
                entry.role().map(|r| r.as_str()).unwrap_or_default(),
                entry.name_any(),
                context.name
            ),
            UpsertOutcome::Updated => info!(
                "Updated {} cluster {} (context {})",
                entry.role().map(|r| r.as_str()).unwrap_or_default(),
                entry.name_any(),
                context.name
            ),
            UpsertOutcome::Unchanged => {}
        }
        desired.push((context, entry.name_any()));
    }

    let probes = join_all(desired.iter().map(|(context, _)| probe(&ctx, context))).await;
    for ((context, name), health) in desired.iter().zip(probes) {
        let previous = existing
            .iter()
            .find(|e| e.name_any() == *name)
            .and_then(|e| e.status.clone());
        let status = ClusterDetectorStatus {
            cluster_status: Some(health.state),
            reason: health.reason,
        };

        if health_transition(previous.as_ref().and_then(|s| s.cluster_status), health.state) {
            match health.state {
                HealthState::Running => info!("Cluster {} ({}) is running", name, context.name),
                HealthState::Unknown => warn!(
                    "Cluster {} ({}) is unknown: {}",
                    name,
                    context.name,
                    status.reason.as_deref().unwrap_or_default()
                ),
            }
        }

        if previous.as_ref() != Some(&status) {
            ctx.store.update_status(name, &status).await?;
        }
    }

    Ok(Action::requeue(ctx.resync_interval))
}

fn error_policy(
    _secret: Arc<Secret>,
    error: &ReplicantError,
    _ctx: Arc<CatalogContext>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}
