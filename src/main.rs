// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replicant::config::Config;
use replicant::kubernetes::credentials::CredentialSource;
use replicant::kubernetes::crd::render_definitions;
use replicant::kubernetes::{wait_for_crds, CredentialFanout, LivezProbe, SecretCredentialSource};
use replicant::reconcilers::{ClusterDetectorReconciler, ReplicatorReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // `replicant crd` prints the CustomResourceDefinitions and exits
    if std::env::args().nth(1).as_deref() == Some("crd") {
        print!("{}", render_definitions()?);
        return Ok(());
    }

    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Replicant operator");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: catalog_namespace={}, local_identity={}",
        config.catalog_namespace,
        config.local_identity()
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    info!("Waiting for Replicant CRDs to become available...");
    wait_for_crds(&client).await?;

    let source: Arc<dyn CredentialSource> =
        Arc::new(SecretCredentialSource::new(client.clone(), &config));
    let connector = Arc::new(CredentialFanout::new(client.clone(), source.clone(), &config));

    let catalog_reconciler = ClusterDetectorReconciler::new(
        client.clone(),
        source,
        Arc::new(LivezProbe::new()?),
        &config,
    );
    let replicator_reconciler =
        ReplicatorReconciler::new(client.clone(), connector, config.resync_interval);

    info!("Starting reconcilers...");

    tokio::try_join!(catalog_reconciler.run(), replicator_reconciler.run())?;

    // Reached once both controllers have drained after a shutdown signal
    warn!("All reconcilers stopped");
    Ok(())
}
