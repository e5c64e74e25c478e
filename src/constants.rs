// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// API group shared by the Replicator and ClusterDetector CRDs
pub const API_GROUP: &str = "replicant.dev";

/// The operator name used for server-side apply
pub const FIELD_MANAGER: &str = "replicant";

/// Finalizer held on a Replicator until secondary clusters are cleaned up
pub const FINALIZER: &str = "replicant.dev/finalizer";

/// Kubernetes label keys and values used by Replicant
pub mod labels {
    /// Role of a cataloged cluster ("primary" or "secondary")
    pub const ROLE: &str = "app.kubernetes.io/role";
    /// Selector label stamped on replicated pods, deployments and services
    pub const APP_KEY: &str = "apps";
    pub const APP_VALUE: &str = "nginx";
}

/// Ingress annotations and defaults
pub mod ingress {
    pub const CLASS_NAME: &str = "nginx";
    pub const REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
    pub const AUTH_TLS_VERIFY_CLIENT: &str = "nginx.ingress.kubernetes.io/auth-tls-verify-client";
    pub const AUTH_TLS_SECRET: &str = "nginx.ingress.kubernetes.io/auth-tls-secret";
}

/// Secrets generated for a secured ingress
pub mod secrets {
    /// Holds `tls.crt`, `tls.key` and `ca.crt`
    pub const INGRESS_SECRET_NAME: &str = "ca-secret";
    /// Holds `client.crt` and `client.key`
    pub const CLIENT_SECRET_NAME: &str = "cli-secret";

    pub const TLS_CERT_KEY: &str = "tls.crt";
    pub const TLS_KEY_KEY: &str = "tls.key";
    pub const CA_CERT_KEY: &str = "ca.crt";
    pub const CLIENT_CERT_KEY: &str = "client.crt";
    pub const CLIENT_KEY_KEY: &str = "client.key";
}

/// Health probe settings
pub mod health {
    /// Path probed on every cluster endpoint
    pub const LIVEZ_PATH: &str = "livez";
    pub const TIMEOUT_SECS: u64 = 2;
}

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Requeue delay after a failed reconciliation
pub const ERROR_REQUEUE_SECS: u64 = 60;
