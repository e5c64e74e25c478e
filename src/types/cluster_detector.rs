// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use kube::{api::ObjectMeta, CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::labels;

/// One cluster context found in the shared credential document.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "replicant.dev", version = "v1", kind = "ClusterDetector")]
#[kube(namespaced)]
#[kube(status = "ClusterDetectorStatus")]
#[kube(printcolumn = r#"{"name":"Context","type":"string","jsonPath":".spec.context"}"#)]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.clusterStatus"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetectorSpec {
    pub context: String,
    pub cluster: String,
    pub user: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDetectorStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_status: Option<HealthState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Running,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a context. Raw context names may not be valid object names.
pub fn cluster_identity(cluster: &str, user: &str) -> String {
    format!("{}.{}", cluster, user)
}

impl ClusterDetector {
    /// Build the desired catalog record for a context
    pub fn for_context(
        namespace: &str,
        context: &str,
        cluster: &str,
        user: &str,
        local_identity: &str,
    ) -> Self {
        let identity = cluster_identity(cluster, user);
        let role = if identity == local_identity {
            Role::Primary
        } else {
            Role::Secondary
        };

        ClusterDetector {
            metadata: ObjectMeta {
                name: Some(identity),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    labels::ROLE.to_string(),
                    role.as_str().to_string(),
                )])),
                ..Default::default()
            },
            spec: ClusterDetectorSpec {
                context: context.to_string(),
                cluster: cluster.to_string(),
                user: user.to_string(),
            },
            status: None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self.labels().get(labels::ROLE).map(String::as_str) {
            Some("primary") => Some(Role::Primary),
            Some("secondary") => Some(Role::Secondary),
            _ => None,
        }
    }

    pub fn health(&self) -> Option<HealthState> {
        self.status.as_ref().and_then(|s| s.cluster_status)
    }

    /// Whether labels and spec of `other` already match this record
    pub fn same_declaration(&self, other: &ClusterDetector) -> bool {
        self.spec == other.spec && self.role() == other.role()
    }
}
