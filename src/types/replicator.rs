// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The Replicator custom resource: a declared set of workload resources and the
//! secondary clusters they are replicated to.

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServiceSpec};
use k8s_openapi::api::networking::v1::IngressSpec;
use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::FINALIZER;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(group = "replicant.dev", version = "v1", kind = "Replicator")]
#[kube(namespaced)]
#[kube(status = "ReplicatorStatus")]
#[kube(printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.synced"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatorSpec {
    /// Namespace the resources are created in, on every cluster
    pub replication_namespace: String,
    /// Identities (`<cluster>.<user>`) of the secondary clusters
    #[serde(default)]
    pub target_cluster: Vec<String>,

    pub config_map_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map_data: Option<BTreeMap<String, String>>,

    pub deployment_name: String,
    pub deployment_spec: DeploymentTemplate,

    #[serde(default)]
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub service_spec: Option<ServiceSpec>,

    #[serde(default)]
    pub ingress_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub ingress_spec: Option<IngressSpec>,
    #[serde(default)]
    pub ingress_secure_enabled: bool,
}

/// The replicated subset of a DeploymentSpec
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub strategy: Option<DeploymentStrategy>,
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub template: PodTemplateSpec,
}

/// k8s-openapi types carry no JSON schema of their own; the API server keeps them as-is.
fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatorStatus {
    #[serde(default)]
    pub applied: Vec<PerResourceApplyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced: Option<SyncState>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerResourceApplyStatus {
    pub cluster: String,
    pub kind: String,
    pub name: String,
    pub apply_status: ApplyOutcome,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum ApplyOutcome {
    #[serde(rename = "applied")]
    Applied,
    #[serde(rename = "not applied")]
    NotApplied,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum SyncState {
    #[serde(rename = "synced")]
    Synced,
    #[serde(rename = "not synced")]
    NotSynced,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Synced => write!(f, "synced"),
            SyncState::NotSynced => write!(f, "not synced"),
        }
    }
}

/// Where a Replicator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested
    Active { finalizer_held: bool },
    /// Deletion requested; `cleanup_done` once the finalizer has been released
    Finalizing { cleanup_done: bool },
}

impl Replicator {
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == FINALIZER))
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let finalizer_held = self.has_finalizer();
        if self.metadata.deletion_timestamp.is_some() {
            Lifecycle::Finalizing {
                cleanup_done: !finalizer_held,
            }
        } else {
            Lifecycle::Active { finalizer_held }
        }
    }

    /// Host of the first ingress rule, used as the TLS host for a secured ingress
    pub fn ingress_host(&self) -> Option<&str> {
        self.spec
            .ingress_spec
            .as_ref()
            .and_then(|s| s.rules.as_ref())
            .and_then(|rules| rules.first())
            .and_then(|rule| rule.host.as_deref())
    }
}
