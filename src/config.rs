// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding the ClusterDetector catalog
    pub catalog_namespace: String,
    /// Location of the shared multi-context credential document
    pub credential_secret_namespace: String,
    pub credential_secret_name: String,
    pub credential_secret_key: String,
    /// Cluster and user names that identify the cluster this operator runs in
    pub local_cluster_name: String,
    pub local_auth_info: String,
    pub resync_interval: Duration,
    /// Upper bound for a single get/apply/delete/list call against a cluster
    pub remote_call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            catalog_namespace: "replicant-system".to_string(),
            credential_secret_namespace: "kubeconfig".to_string(),
            credential_secret_name: "config".to_string(),
            credential_secret_key: "config".to_string(),
            local_cluster_name: "kubernetes".to_string(),
            local_auth_info: "kubernetes-admin".to_string(),
            resync_interval: Duration::from_secs(30),
            remote_call_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{} must be a number of seconds, got {:?}", key, raw)),
                None => Ok(default),
            }
        };

        Ok(Config {
            catalog_namespace: string("REPLICANT_NAMESPACE", defaults.catalog_namespace),
            credential_secret_namespace: string(
                "CREDENTIAL_SECRET_NAMESPACE",
                defaults.credential_secret_namespace,
            ),
            credential_secret_name: string("CREDENTIAL_SECRET_NAME", defaults.credential_secret_name),
            credential_secret_key: string("CREDENTIAL_SECRET_KEY", defaults.credential_secret_key),
            local_cluster_name: string("LOCAL_CLUSTER_NAME", defaults.local_cluster_name),
            local_auth_info: string("LOCAL_AUTH_INFO", defaults.local_auth_info),
            resync_interval: seconds("RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            remote_call_timeout: seconds("REMOTE_CALL_TIMEOUT_SECS", defaults.remote_call_timeout)?,
        })
    }

    /// Identity of the cluster the operator runs in, in `<cluster>.<user>` form
    pub fn local_identity(&self) -> String {
        format!("{}.{}", self.local_cluster_name, self.local_auth_info)
    }
}
