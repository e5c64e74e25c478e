// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-cluster capability interface used by the replication engine.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ReplicantError, Result};
use crate::replication::manifest::{Manifest, ResourceKind};

/// Outcome of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Operations the engine needs against one cluster.
///
/// "Not found" is never an error: `get` reports it as `None` and `delete` as success.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<Option<Manifest>>;

    async fn create(&self, manifest: &Manifest) -> Result<CreateOutcome>;

    /// Forced server-side apply under `field_manager`
    async fn apply(&self, manifest: &Manifest, field_manager: &str) -> Result<()>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    /// Names of every object of `kind` in `namespace`
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>>;
}

/// `ClusterOps` backed by a kube client, with a timeout on every call.
#[derive(Clone)]
pub struct KubeClusterOps {
    client: Client,
    timeout: Duration,
}

impl KubeClusterOps {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T, F>(&self, operation: String, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ReplicantError::Timeout {
                timeout: self.timeout,
                operation,
            })?
    }
}

fn api<K>(client: &Client, namespace: &str) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    Api::namespaced(client.clone(), namespace)
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn apply_typed<K>(api: Api<K>, object: &K, field_manager: &str) -> Result<()>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = object.meta().name.clone().unwrap_or_default();
    let pp = PatchParams::apply(field_manager).force();
    api.patch(&name, &pp, &Patch::Apply(object)).await?;
    Ok(())
}

async fn create_typed<K>(api: Api<K>, object: &K) -> Result<CreateOutcome>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    match api.create(&PostParams::default(), object).await {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if is_status(&e, 409) => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e.into()),
    }
}

async fn delete_typed<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, 404) => {
            debug!("{} already gone", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_names<K>(api: Api<K>) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default()).await?;
    Ok(list
        .items
        .iter()
        .filter_map(|o| o.meta().name.clone())
        .collect())
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    #[instrument(skip(self))]
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Manifest>> {
        let c = &self.client;
        let call = async {
            Ok::<_, ReplicantError>(match kind {
                ResourceKind::Namespace => get_opt::<Namespace>(Api::all(c.clone()), name)
                    .await?
                    .map(Manifest::Namespace),
                ResourceKind::ConfigMap => get_opt::<ConfigMap>(api(c, namespace), name)
                    .await?
                    .map(Manifest::ConfigMap),
                ResourceKind::Deployment => get_opt::<Deployment>(api(c, namespace), name)
                    .await?
                    .map(Manifest::Deployment),
                ResourceKind::Service => get_opt::<Service>(api(c, namespace), name)
                    .await?
                    .map(Manifest::Service),
                ResourceKind::Ingress => get_opt::<Ingress>(api(c, namespace), name)
                    .await?
                    .map(Manifest::Ingress),
                ResourceKind::Secret => get_opt::<Secret>(api(c, namespace), name)
                    .await?
                    .map(Manifest::Secret),
            })
        };
        self.bounded(format!("get {} {}/{}", kind, namespace, name), call)
            .await
    }

    #[instrument(skip(self, manifest), fields(kind = %manifest.kind(), name = %manifest.name()))]
    async fn create(&self, manifest: &Manifest) -> Result<CreateOutcome> {
        let c = &self.client;
        let ns = manifest.namespace();
        let call = async {
            match manifest {
                Manifest::Namespace(o) => create_typed(Api::<Namespace>::all(c.clone()), o).await,
                Manifest::ConfigMap(o) => create_typed(api::<ConfigMap>(c, ns), o).await,
                Manifest::Deployment(o) => create_typed(api::<Deployment>(c, ns), o).await,
                Manifest::Service(o) => create_typed(api::<Service>(c, ns), o).await,
                Manifest::Ingress(o) => create_typed(api::<Ingress>(c, ns), o).await,
                Manifest::Secret(o) => create_typed(api::<Secret>(c, ns), o).await,
            }
        };
        self.bounded(format!("create {} {}", manifest.kind(), manifest.name()), call)
            .await
    }

    #[instrument(skip(self, manifest), fields(kind = %manifest.kind(), name = %manifest.name()))]
    async fn apply(&self, manifest: &Manifest, field_manager: &str) -> Result<()> {
        let c = &self.client;
        let ns = manifest.namespace();
        let call = async {
            match manifest {
                Manifest::Namespace(o) => {
                    apply_typed(Api::<Namespace>::all(c.clone()), o, field_manager).await
                }
                Manifest::ConfigMap(o) => apply_typed(api::<ConfigMap>(c, ns), o, field_manager).await,
                Manifest::Deployment(o) => {
                    apply_typed(api::<Deployment>(c, ns), o, field_manager).await
                }
                Manifest::Service(o) => apply_typed(api::<Service>(c, ns), o, field_manager).await,
                Manifest::Ingress(o) => apply_typed(api::<Ingress>(c, ns), o, field_manager).await,
                Manifest::Secret(o) => apply_typed(api::<Secret>(c, ns), o, field_manager).await,
            }
        };
        self.bounded(format!("apply {} {}", manifest.kind(), manifest.name()), call)
            .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let c = &self.client;
        let call = async {
            match kind {
                ResourceKind::Namespace => delete_typed(Api::<Namespace>::all(c.clone()), name).await,
                ResourceKind::ConfigMap => delete_typed(api::<ConfigMap>(c, namespace), name).await,
                ResourceKind::Deployment => delete_typed(api::<Deployment>(c, namespace), name).await,
                ResourceKind::Service => delete_typed(api::<Service>(c, namespace), name).await,
                ResourceKind::Ingress => delete_typed(api::<Ingress>(c, namespace), name).await,
                ResourceKind::Secret => delete_typed(api::<Secret>(c, namespace), name).await,
            }
        };
        self.bounded(format!("delete {} {}/{}", kind, namespace, name), call)
            .await
    }

    #[instrument(skip(self))]
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<String>> {
        let c = &self.client;
        let call = async {
            match kind {
                ResourceKind::Namespace => list_names(Api::<Namespace>::all(c.clone())).await,
                ResourceKind::ConfigMap => list_names(api::<ConfigMap>(c, namespace)).await,
                ResourceKind::Deployment => list_names(api::<Deployment>(c, namespace)).await,
                ResourceKind::Service => list_names(api::<Service>(c, namespace)).await,
                ResourceKind::Ingress => list_names(api::<Ingress>(c, namespace)).await,
                ResourceKind::Secret => list_names(api::<Secret>(c, namespace)).await,
            }
        };
        self.bounded(format!("list {} in {}", kind, namespace), call)
            .await
    }
}
