// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Secured ingress: client certificate verification backed by generated secrets.

use k8s_openapi::api::networking::v1::{Ingress, IngressTLS};
use tracing::{debug, info, instrument, warn};

use super::desired;
use super::fanout::{ReplicationRun, StatusAccumulator};
use super::manifest::{Manifest, ResourceKind};
use crate::constants::{ingress as annotations, secrets, FIELD_MANAGER};
use crate::error::{ReplicantError, Result};
use crate::types::replicator::ApplyOutcome;

/// Build the ingress to apply on the run's cluster, creating TLS material first when
/// client verification is requested. `None` when no ingress is declared.
#[instrument(skip(run, status), fields(cluster = %run.cluster()))]
pub async fn prepare(
    run: &ReplicationRun<'_>,
    status: &mut StatusAccumulator,
) -> Result<Option<Manifest>> {
    let spec = &run.replicator.spec;
    let Some(mut ingress) = desired::ingress(spec, run.owner.as_ref()) else {
        return Ok(None);
    };

    if spec.ingress_secure_enabled {
        let host = run.replicator.ingress_host().ok_or_else(|| {
            ReplicantError::InvalidSpec(format!(
                "secured ingress {} needs a host on its first rule",
                spec.ingress_name
            ))
        })?;

        rotate_on_host_change(run, host).await?;
        ensure_secrets(run, host, status).await?;
        require_client_certificates(&mut ingress, run.namespace(), host);
    }

    // A shared spec replicated to several clusters may carry repeated entries
    if let Some(tls) = ingress.spec.as_mut().and_then(|s| s.tls.as_mut()) {
        tls.truncate(1);
    }

    Ok(Some(Manifest::Ingress(ingress)))
}

fn observed_tls_host(observed: &Manifest) -> Option<&str> {
    let Manifest::Ingress(ingress) = observed else {
        return None;
    };
    ingress
        .spec
        .as_ref()?
        .tls
        .as_ref()?
        .first()?
        .hosts
        .as_ref()?
        .first()
        .map(String::as_str)
}

/// When the TLS host moved, every secret in the namespace is deleted so that
/// certificates for the new host are generated. This includes secrets the
/// operator did not create.
async fn rotate_on_host_change(run: &ReplicationRun<'_>, host: &str) -> Result<()> {
    let spec = &run.replicator.spec;
    let observed = run
        .ops()
        .get(ResourceKind::Ingress, run.namespace(), &spec.ingress_name)
        .await?;
    let Some(previous) = observed.as_ref().and_then(observed_tls_host) else {
        return Ok(());
    };
    if previous == host {
        return Ok(());
    }

    warn!(
        "TLS host of ingress {} changed from {} to {} on {}, deleting all secrets in {}",
        spec.ingress_name,
        previous,
        host,
        run.cluster(),
        run.namespace()
    );
    for name in run.ops().list(ResourceKind::Secret, run.namespace()).await? {
        run.ops()
            .delete(ResourceKind::Secret, run.namespace(), &name)
            .await?;
        info!("Deleted secret {}/{} on {}", run.namespace(), name, run.cluster());
    }
    Ok(())
}

async fn secret_exists(run: &ReplicationRun<'_>, name: &str) -> Result<bool> {
    Ok(run
        .ops()
        .get(ResourceKind::Secret, run.namespace(), name)
        .await?
        .is_some())
}

/// Generate the server and client secrets unless both already exist.
///
/// The pair always comes from one CA, so a missing half means both are reissued
/// and the client certificate verifies against the `ca.crt` served to the ingress.
async fn ensure_secrets(
    run: &ReplicationRun<'_>,
    host: &str,
    status: &mut StatusAccumulator,
) -> Result<()> {
    let owner = run.owner.as_ref();

    let present = async {
        Ok::<_, ReplicantError>((
            secret_exists(run, secrets::INGRESS_SECRET_NAME).await?,
            secret_exists(run, secrets::CLIENT_SECRET_NAME).await?,
        ))
    }
    .await;
    let (server_present, client_present) = match present {
        Ok(present) => present,
        Err(e) => return record_pair(run, status, Err(e)),
    };
    match (server_present, client_present) {
        (true, true) => {
            debug!(
                "Secrets {} and {} already exist",
                secrets::INGRESS_SECRET_NAME,
                secrets::CLIENT_SECRET_NAME
            );
            return record_pair(run, status, Ok(()));
        }
        (false, false) => {}
        _ => warn!(
            "Only one of {} and {} exists in {} on {}, reissuing both from a new CA",
            secrets::INGRESS_SECRET_NAME,
            secrets::CLIENT_SECRET_NAME,
            run.namespace(),
            run.cluster()
        ),
    }

    let issued = run.issuer.issue_ca().and_then(|ca| {
        let server = ca.issue_server(host)?;
        let client = ca.issue_client()?;
        Ok((
            desired::ingress_secret(run.namespace(), &server, ca.cert_pem(), owner),
            desired::client_secret(run.namespace(), &client, owner),
        ))
    });
    let (server_secret, client_secret) = match issued {
        Ok(pair) => pair,
        Err(e) => return record_pair(run, status, Err(e)),
    };

    let outcome = run.ops().apply(&server_secret, FIELD_MANAGER).await;
    record(run, status, secrets::INGRESS_SECRET_NAME, &outcome);
    outcome?;
    info!(
        "Server certificate secret {} applied on {}",
        secrets::INGRESS_SECRET_NAME,
        run.cluster()
    );

    let outcome = run.ops().apply(&client_secret, FIELD_MANAGER).await;
    record(run, status, secrets::CLIENT_SECRET_NAME, &outcome);
    outcome?;
    info!(
        "Client certificate secret {} applied on {}",
        secrets::CLIENT_SECRET_NAME,
        run.cluster()
    );
    Ok(())
}

/// Record the same outcome for both secrets and hand it back
fn record_pair(
    run: &ReplicationRun<'_>,
    status: &mut StatusAccumulator,
    outcome: Result<()>,
) -> Result<()> {
    record(run, status, secrets::INGRESS_SECRET_NAME, &outcome);
    record(run, status, secrets::CLIENT_SECRET_NAME, &outcome);
    outcome
}

fn record(
    run: &ReplicationRun<'_>,
    status: &mut StatusAccumulator,
    name: &str,
    outcome: &Result<()>,
) {
    let outcome = if outcome.is_ok() {
        ApplyOutcome::Applied
    } else {
        ApplyOutcome::NotApplied
    };
    status.record(run.cluster(), ResourceKind::Secret, name, outcome);
}

/// Point the ingress at the generated secret and require verified client certificates.
fn require_client_certificates(ingress: &mut Ingress, namespace: &str, host: &str) {
    let annotations_map = ingress.metadata.annotations.get_or_insert_with(Default::default);
    annotations_map.insert(
        annotations::AUTH_TLS_VERIFY_CLIENT.to_string(),
        "on".to_string(),
    );
    annotations_map.insert(
        annotations::AUTH_TLS_SECRET.to_string(),
        format!("{}/{}", namespace, secrets::INGRESS_SECRET_NAME),
    );

    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls.get_or_insert_with(Vec::new).push(IngressTLS {
            hosts: Some(vec![host.to_string()]),
            secret_name: Some(secrets::INGRESS_SECRET_NAME.to_string()),
        });
    }
}
