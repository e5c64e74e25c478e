// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Desired configurations built from a Replicator spec

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

use super::manifest::Manifest;
use crate::constants::{ingress, labels, secrets};
use crate::pki::IssuedCert;
use crate::types::ReplicatorSpec;

/// Label selecting the replicated pods
pub fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(labels::APP_KEY.to_string(), labels::APP_VALUE.to_string())])
}

fn object_meta(name: &str, namespace: &str, owner: Option<&OwnerReference>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        owner_references: owner.map(|o| vec![o.clone()]),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> Manifest {
    Manifest::Namespace(Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    })
}

pub fn config_map(spec: &ReplicatorSpec, owner: Option<&OwnerReference>) -> Manifest {
    Manifest::ConfigMap(ConfigMap {
        metadata: object_meta(&spec.config_map_name, &spec.replication_namespace, owner),
        data: spec.config_map_data.clone(),
        ..Default::default()
    })
}

pub fn deployment(spec: &ReplicatorSpec, owner: Option<&OwnerReference>) -> Manifest {
    let declared = &spec.deployment_spec;

    let mut template = declared.template.clone();
    template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(app_labels());

    Manifest::Deployment(Deployment {
        metadata: object_meta(&spec.deployment_name, &spec.replication_namespace, owner),
        spec: Some(DeploymentSpec {
            replicas: declared.replicas,
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            strategy: declared.strategy.clone(),
            template,
            ..Default::default()
        }),
        status: None,
    })
}

/// `None` when the spec declares no service
pub fn service(spec: &ReplicatorSpec, owner: Option<&OwnerReference>) -> Option<Manifest> {
    let mut service_spec = spec.service_spec.clone()?;
    service_spec
        .selector
        .get_or_insert_with(BTreeMap::new)
        .extend(app_labels());

    Some(Manifest::Service(Service {
        metadata: object_meta(&spec.service_name, &spec.replication_namespace, owner),
        spec: Some(service_spec),
        status: None,
    }))
}

/// The ingress without client certificate verification; `None` when the spec declares no ingress
pub fn ingress(spec: &ReplicatorSpec, owner: Option<&OwnerReference>) -> Option<Ingress> {
    let mut ingress_spec = spec.ingress_spec.clone()?;
    ingress_spec.ingress_class_name = Some(ingress::CLASS_NAME.to_string());

    let mut metadata = object_meta(&spec.ingress_name, &spec.replication_namespace, owner);
    metadata.annotations = Some(BTreeMap::from([(
        ingress::REWRITE_TARGET.to_string(),
        "/".to_string(),
    )]));

    Some(Ingress {
        metadata,
        spec: Some(ingress_spec),
        status: None,
    })
}

fn secret(
    name: &str,
    namespace: &str,
    entries: &[(&str, &str)],
    owner: Option<&OwnerReference>,
) -> Manifest {
    Manifest::Secret(Secret {
        metadata: object_meta(name, namespace, owner),
        data: Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    })
}

/// Server certificate, key and the CA that signed it, referenced by the ingress TLS entry
pub fn ingress_secret(
    namespace: &str,
    server: &IssuedCert,
    ca_pem: &str,
    owner: Option<&OwnerReference>,
) -> Manifest {
    secret(
        secrets::INGRESS_SECRET_NAME,
        namespace,
        &[
            (secrets::TLS_CERT_KEY, server.cert_pem.as_str()),
            (secrets::TLS_KEY_KEY, server.key_pem.as_str()),
            (secrets::CA_CERT_KEY, ca_pem),
        ],
        owner,
    )
}

/// Client certificate and key for callers of a secured ingress
pub fn client_secret(
    namespace: &str,
    client: &IssuedCert,
    owner: Option<&OwnerReference>,
) -> Manifest {
    secret(
        secrets::CLIENT_SECRET_NAME,
        namespace,
        &[
            (secrets::CLIENT_CERT_KEY, client.cert_pem.as_str()),
            (secrets::CLIENT_KEY_KEY, client.key_pem.as_str()),
        ],
        owner,
    )
}
