// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicantError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to read credential document: {0}")]
    KubeconfigError(String),

    #[error("Failed to create client for context {context}: {reason}")]
    ClientConstruction { context: String, reason: String },

    #[error("Namespace creation failed: {0}")]
    NamespaceError(String),

    #[error("Certificate issuance failed: {0}")]
    CertificateError(String),

    #[error("Timed out after {timeout:?} during {operation}")]
    Timeout { timeout: Duration, operation: String },

    #[error("Invalid replication spec: {0}")]
    InvalidSpec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to apply {kind} {name} on cluster {cluster}: {source}")]
    ApplyFailed {
        cluster: String,
        kind: String,
        name: String,
        #[source]
        source: Box<ReplicantError>,
    },

    #[error("Replication did not converge on clusters: {}", .0.join(", "))]
    NotSynced(Vec<String>),

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<ReplicantError>),
}

fn format_aggregate(errors: &[ReplicantError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReplicantError {
    /// Collapse a list of collected errors into one, or `Ok` when empty
    pub fn aggregate(mut errors: Vec<ReplicantError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ReplicantError::Aggregate(errors)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicantError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(ReplicantError::aggregate(vec![]).is_ok());
    }

    #[test]
    fn test_aggregate_single_is_unwrapped() {
        let err = ReplicantError::aggregate(vec![ReplicantError::InvalidSpec("x".into())])
            .unwrap_err();
        assert!(matches!(err, ReplicantError::InvalidSpec(_)));
    }

    #[test]
    fn test_aggregate_many_keeps_every_message() {
        let err = ReplicantError::aggregate(vec![
            ReplicantError::NamespaceError("first".into()),
            ReplicantError::NamespaceError("second".into()),
        ])
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }
}
