// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Cluster clients built from the shared multi-context credential document

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{ReplicantError, Result};
use crate::kubernetes::ops::{ClusterOps, KubeClusterOps};
use crate::types::cluster_detector::cluster_identity;

/// One context of the credential document, resolved to its cluster endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub server: Option<String>,
}

impl CredentialContext {
    pub fn identity(&self) -> String {
        cluster_identity(&self.cluster, &self.user)
    }
}

// Only the parts of the document needed for the context table
#[derive(Deserialize)]
struct ContextTable {
    #[serde(default)]
    clusters: Vec<NamedEntry<ClusterEntry>>,
    #[serde(default)]
    contexts: Vec<NamedEntry<ContextEntry>>,
}

#[derive(Deserialize)]
struct NamedEntry<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context")]
    value: Option<T>,
}

#[derive(Deserialize)]
struct ClusterEntry {
    server: Option<String>,
}

#[derive(Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
}

/// A parsed credential document
#[derive(Clone)]
pub struct CredentialDocument {
    kubeconfig: Kubeconfig,
    contexts: Vec<CredentialContext>,
}

impl CredentialDocument {
    pub fn parse(raw: &str) -> Result<Self> {
        let kubeconfig: Kubeconfig = serde_yaml::from_str(raw).map_err(|e| {
            ReplicantError::KubeconfigError(format!("Failed to parse credential document: {}", e))
        })?;
        let table: ContextTable = serde_yaml::from_str(raw).map_err(|e| {
            ReplicantError::KubeconfigError(format!("Failed to read context table: {}", e))
        })?;

        let contexts = table
            .contexts
            .into_iter()
            .filter_map(|entry| {
                let context = entry.value?;
                let server = table
                    .clusters
                    .iter()
                    .find(|c| c.name == context.cluster)
                    .and_then(|c| c.value.as_ref())
                    .and_then(|c| c.server.clone());
                Some(CredentialContext {
                    name: entry.name,
                    cluster: context.cluster,
                    user: context.user,
                    server,
                })
            })
            .collect();

        Ok(Self {
            kubeconfig,
            contexts,
        })
    }

    pub fn contexts(&self) -> &[CredentialContext] {
        &self.contexts
    }

    /// The context whose `<cluster>.<user>` identity is `identity`
    pub fn find(&self, identity: &str) -> Option<&CredentialContext> {
        self.contexts.iter().find(|c| c.identity() == identity)
    }

    /// Build a client scoped to `context`. The document is materialized in memory only.
    pub async fn client_for(&self, context: &CredentialContext) -> Result<Client> {
        let construction = |reason: String| ReplicantError::ClientConstruction {
            context: context.name.clone(),
            reason,
        };

        // kube falls back to an anonymous user for a dangling reference
        if !self.kubeconfig.clusters.iter().any(|c| c.name == context.cluster) {
            return Err(construction(format!(
                "cluster '{}' is not in the credential document",
                context.cluster
            )));
        }
        if !self.kubeconfig.auth_infos.iter().any(|u| u.name == context.user) {
            return Err(construction(format!(
                "user '{}' is not in the credential document",
                context.user
            )));
        }

        let options = KubeConfigOptions {
            context: Some(context.name.clone()),
            ..Default::default()
        };
        let config = kube::Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(|e| construction(e.to_string()))?;

        Client::try_from(config).map_err(|e| construction(e.to_string()))
    }
}

/// Where the credential document comes from
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load(&self) -> Result<CredentialDocument>;
}

/// Reads the credential document from a key of a Secret
pub struct SecretCredentialSource {
    client: Client,
    namespace: String,
    name: String,
    key: String,
}

impl SecretCredentialSource {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            namespace: config.credential_secret_namespace.clone(),
            name: config.credential_secret_name.clone(),
            key: config.credential_secret_key.clone(),
        }
    }
}

#[async_trait]
impl CredentialSource for SecretCredentialSource {
    #[instrument(skip(self), fields(secret = %format!("{}/{}", self.namespace, self.name)))]
    async fn load(&self) -> Result<CredentialDocument> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        let secret = secrets.get_opt(&self.name).await?.ok_or_else(|| {
            ReplicantError::KubeconfigError(format!(
                "Credential secret {}/{} not found",
                self.namespace, self.name
            ))
        })?;

        let Some(blob) = secret.data.as_ref().and_then(|d| d.get(&self.key)) else {
            return Err(ReplicantError::KubeconfigError(format!(
                "Credential secret {}/{} does not contain '{}' key",
                self.namespace, self.name, self.key
            )));
        };

        let raw = String::from_utf8(blob.0.clone()).map_err(|e| {
            ReplicantError::KubeconfigError(format!("Failed to decode credential document: {}", e))
        })?;

        CredentialDocument::parse(&raw)
    }
}

/// A cluster the engine can act on, by identity
#[derive(Clone)]
pub struct ClusterTarget {
    pub identity: String,
    pub ops: Arc<dyn ClusterOps>,
}

/// Resolves cluster identities to handles on those clusters
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// The cluster this operator runs in
    fn primary(&self) -> ClusterTarget;

    /// Handles for every requested identity present in the credential document
    async fn clients_for(&self, targets: &[String]) -> Result<Vec<ClusterTarget>>;
}

/// `ClusterConnector` over a credential document source
pub struct CredentialFanout {
    source: Arc<dyn CredentialSource>,
    primary: ClusterTarget,
    timeout: Duration,
}

impl CredentialFanout {
    pub fn new(client: Client, source: Arc<dyn CredentialSource>, config: &Config) -> Self {
        let primary = ClusterTarget {
            identity: config.local_identity(),
            ops: Arc::new(KubeClusterOps::new(client, config.remote_call_timeout)),
        };
        Self {
            source,
            primary,
            timeout: config.remote_call_timeout,
        }
    }
}

#[async_trait]
impl ClusterConnector for CredentialFanout {
    fn primary(&self) -> ClusterTarget {
        self.primary.clone()
    }

    #[instrument(skip(self))]
    async fn clients_for(&self, targets: &[String]) -> Result<Vec<ClusterTarget>> {
        let document = self.source.load().await?;

        let mut handles = Vec::new();
        for identity in targets.iter().collect::<BTreeSet<_>>() {
            let Some(context) = document.find(identity) else {
                warn!(
                    "Target cluster {} is not in the credential document, skipping",
                    identity
                );
                continue;
            };

            let client = document.client_for(context).await?;
            debug!("Created client for {} (context {})", identity, context.name);
            handles.push(ClusterTarget {
                identity: identity.clone(),
                ops: Arc::new(KubeClusterOps::new(client, self.timeout)),
            });
        }

        info!("Resolved {} of {} target clusters", handles.len(), targets.len());
        Ok(handles)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::MockService;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    pub(crate) const DOCUMENT: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: kubernetes
  cluster:
    server: https://10.0.0.1:6443
    insecure-skip-tls-verify: true
- name: kind-east
  cluster:
    server: https://east.example.com:6443
    insecure-skip-tls-verify: true
users:
- name: kubernetes-admin
  user:
    token: primary-token
- name: kind-east
  user:
    token: east-token
contexts:
- name: primary
  context:
    cluster: kubernetes
    user: kubernetes-admin
- name: kind-east
  context:
    cluster: kind-east
    user: kind-east
current-context: primary
"#;

    pub(crate) struct StaticSource(pub(crate) String);

    #[async_trait]
    impl CredentialSource for StaticSource {
        async fn load(&self) -> Result<CredentialDocument> {
            CredentialDocument::parse(&self.0)
        }
    }

    fn secret_json(key: &str, value: &str) -> String {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("config".to_string()),
                namespace: Some("kubeconfig".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                key.to_string(),
                ByteString(value.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };
        serde_json::to_string(&secret).unwrap()
    }

    #[test]
    fn test_parse_context_table() {
        let document = CredentialDocument::parse(DOCUMENT).unwrap();

        let contexts = document.contexts();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].identity(), "kubernetes.kubernetes-admin");
        assert_eq!(contexts[1].name, "kind-east");
        assert_eq!(
            contexts[1].server.as_deref(),
            Some("https://east.example.com:6443")
        );
    }

    #[test]
    fn test_find_by_identity() {
        let document = CredentialDocument::parse(DOCUMENT).unwrap();

        assert_eq!(
            document.find("kind-east.kind-east").map(|c| c.name.as_str()),
            Some("kind-east")
        );
        assert!(document.find("kind-west.kind-west").is_none());
    }

    #[test]
    fn test_garbage_is_a_credential_error() {
        let err = CredentialDocument::parse("clusters: [").err().unwrap();
        assert!(matches!(err, ReplicantError::KubeconfigError(_)));
    }

    #[tokio::test]
    async fn test_client_for_unknown_user_is_construction_error() {
        let broken = DOCUMENT.replace("    user: kind-east\n", "    user: nobody\n");
        let document = CredentialDocument::parse(&broken).unwrap();
        let context = document
            .contexts()
            .iter()
            .find(|c| c.name == "kind-east")
            .unwrap()
            .clone();

        let err = document.client_for(&context).await.err().unwrap();

        assert!(
            matches!(err, ReplicantError::ClientConstruction { context, .. } if context == "kind-east")
        );
    }

    #[tokio::test]
    async fn test_client_for_unknown_cluster_is_construction_error() {
        let broken = DOCUMENT.replace("    cluster: kind-east\n", "    cluster: kind-west\n");
        let document = CredentialDocument::parse(&broken).unwrap();
        let context = document.find("kind-west.kind-east").unwrap().clone();

        let err = document.client_for(&context).await.err().unwrap();

        assert!(matches!(
            err,
            ReplicantError::ClientConstruction { ref reason, .. } if reason.contains("kind-west")
        ));
    }

    #[tokio::test]
    async fn test_secret_source_reads_configured_key() {
        let mock = MockService::new().on_get(
            "/api/v1/namespaces/kubeconfig/secrets/config",
            200,
            &secret_json("config", DOCUMENT),
        );
        let source = SecretCredentialSource::new(mock.into_client(), &Config::default());

        let document = source.load().await.unwrap();

        assert_eq!(document.contexts().len(), 2);
    }

    #[tokio::test]
    async fn test_secret_source_missing_key() {
        let mock = MockService::new().on_get(
            "/api/v1/namespaces/kubeconfig/secrets/config",
            200,
            &secret_json("other", DOCUMENT),
        );
        let source = SecretCredentialSource::new(mock.into_client(), &Config::default());

        let err = source.load().await.err().unwrap();

        assert!(matches!(err, ReplicantError::KubeconfigError(msg) if msg.contains("'config'")));
    }

    #[tokio::test]
    async fn test_secret_source_missing_secret() {
        let source =
            SecretCredentialSource::new(MockService::new().into_client(), &Config::default());

        let err = source.load().await.err().unwrap();

        assert!(matches!(err, ReplicantError::KubeconfigError(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_fanout_skips_unknown_targets() {
        let fanout = CredentialFanout::new(
            MockService::new().into_client(),
            Arc::new(StaticSource(DOCUMENT.to_string())),
            &Config::default(),
        );

        let targets = fanout
            .clients_for(&[
                "kind-west.kind-west".to_string(),
                "kind-east.kind-east".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].identity, "kind-east.kind-east");
        assert_eq!(fanout.primary().identity, "kubernetes.kubernetes-admin");
    }
}
