// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::constants::API_GROUP;
use crate::error::Result;
use crate::types::{ClusterDetector, Replicator};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{discovery::Discovery, Client, CustomResourceExt};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Kinds served by this operator, all in version v1 of [`API_GROUP`]
const KINDS: [&str; 2] = ["Replicator", "ClusterDetector"];

/// Definitions of every custom resource the operator reconciles
pub fn definitions() -> Vec<CustomResourceDefinition> {
    vec![Replicator::crd(), ClusterDetector::crd()]
}

/// Render all definitions as one multi-document YAML stream, ready for `kubectl apply -f -`
pub fn render_definitions() -> std::result::Result<String, serde_yaml::Error> {
    definitions()
        .iter()
        .map(|crd| serde_yaml::to_string(crd).map(|doc| format!("---\n{}", doc)))
        .collect()
}

/// Wait for the Replicator and ClusterDetector CRDs to become available in the cluster.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_crds(client: &Client) -> Result<()> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match missing_kinds(client).await {
            Ok(missing) if missing.is_empty() => {
                info!("CRDs ({}/v1) are available", API_GROUP);
                return Ok(());
            }
            Ok(missing) => {
                info!(
                    "CRDs {:?} ({}/v1) not yet available, waiting {} seconds...",
                    missing, API_GROUP, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for CRDs: {}, retrying in {} seconds...",
                    e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// The kinds of this operator not (yet) served by the API server.
async fn missing_kinds(client: &Client) -> Result<Vec<&'static str>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[API_GROUP])
        .run()
        .await?;

    let served: Vec<String> = discovery
        .groups()
        .filter(|group| group.name() == API_GROUP)
        .flat_map(|group| group.recommended_resources())
        .filter(|(ar, _)| ar.version == "v1")
        .map(|(ar, _)| ar.kind)
        .collect();

    Ok(KINDS
        .into_iter()
        .filter(|kind| !served.iter().any(|s| s == kind))
        .collect())
}
