// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The closed set of resource kinds the operator replicates, and their diffing.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;
use serde_json::{Map, Value};
use std::fmt;

use super::managed::{applied_fields, project};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Deployment,
    Service,
    Ingress,
    Secret,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed object of one of the replicated kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Namespace(Namespace),
    ConfigMap(ConfigMap),
    Deployment(Deployment),
    Service(Service),
    Ingress(Ingress),
    Secret(Secret),
}

impl Manifest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Manifest::Namespace(_) => ResourceKind::Namespace,
            Manifest::ConfigMap(_) => ResourceKind::ConfigMap,
            Manifest::Deployment(_) => ResourceKind::Deployment,
            Manifest::Service(_) => ResourceKind::Service,
            Manifest::Ingress(_) => ResourceKind::Ingress,
            Manifest::Secret(_) => ResourceKind::Secret,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Manifest::Namespace(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::Ingress(o) => &o.metadata,
            Manifest::Secret(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Manifest::Namespace(o) => &mut o.metadata,
            Manifest::ConfigMap(o) => &mut o.metadata,
            Manifest::Deployment(o) => &mut o.metadata,
            Manifest::Service(o) => &mut o.metadata,
            Manifest::Ingress(o) => &mut o.metadata,
            Manifest::Secret(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Manifest::Namespace(o) => serde_json::to_value(o)?,
            Manifest::ConfigMap(o) => serde_json::to_value(o)?,
            Manifest::Deployment(o) => serde_json::to_value(o)?,
            Manifest::Service(o) => serde_json::to_value(o)?,
            Manifest::Ingress(o) => serde_json::to_value(o)?,
            Manifest::Secret(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }

    pub fn from_value(kind: ResourceKind, value: Value) -> Result<Manifest> {
        let manifest = match kind {
            ResourceKind::Namespace => Manifest::Namespace(serde_json::from_value(value)?),
            ResourceKind::ConfigMap => Manifest::ConfigMap(serde_json::from_value(value)?),
            ResourceKind::Deployment => Manifest::Deployment(serde_json::from_value(value)?),
            ResourceKind::Service => Manifest::Service(serde_json::from_value(value)?),
            ResourceKind::Ingress => Manifest::Ingress(serde_json::from_value(value)?),
            ResourceKind::Secret => Manifest::Secret(serde_json::from_value(value)?),
        };
        Ok(manifest)
    }

    /// The configuration `manager` last applied to this observed object.
    ///
    /// Identity fields (apiVersion, kind, name, namespace) are always kept.
    pub fn applied_view(&self, manager: &str) -> Result<Manifest> {
        let observed = self.to_value()?;
        let managed = self.meta().managed_fields.as_deref().unwrap_or_default();

        let mut view = match applied_fields(managed, manager) {
            Some(fields) => project(&observed, fields),
            None => Value::Object(Map::new()),
        };

        if let Value::Object(view) = &mut view {
            for key in ["apiVersion", "kind"] {
                if let Some(value) = observed.get(key) {
                    view.insert(key.to_string(), value.clone());
                }
            }
            let metadata = view
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(metadata) = metadata {
                for key in ["name", "namespace"] {
                    if let Some(value) = observed["metadata"].get(key) {
                        metadata.insert(key.to_string(), value.clone());
                    }
                }
            }
        }

        Manifest::from_value(self.kind(), view)
    }

    /// Whether the observed object already carries this desired configuration.
    pub fn is_converged(&self, observed: Option<&Manifest>, manager: &str) -> Result<bool> {
        let Some(observed) = observed else {
            return Ok(false);
        };
        if observed.kind() != self.kind() {
            return Ok(false);
        }
        let applied = observed.applied_view(manager)?;
        Ok(self.clone().normalized() == applied.normalized())
    }

    /// Collapse values the API server reports differently from how they were sent.
    fn normalized(mut self) -> Manifest {
        if let Manifest::Deployment(deployment) = &mut self {
            let volumes = deployment
                .spec
                .as_mut()
                .and_then(|s| s.template.spec.as_mut())
                .and_then(|s| s.volumes.as_mut());
            for volume in volumes.into_iter().flatten() {
                // An emptyDir without medium or size limit is equivalent to none at all
                let empty = volume
                    .empty_dir
                    .as_ref()
                    .is_some_and(|e| e.medium.is_none() && e.size_limit.is_none());
                if empty {
                    volume.empty_dir = None;
                }
            }
        }
        self
    }
}
