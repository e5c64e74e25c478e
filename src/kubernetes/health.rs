// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Liveness probing of cluster API endpoints

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::constants::health::{LIVEZ_PATH, TIMEOUT_SECS};
use crate::types::cluster_detector::HealthState;

/// Result of probing one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    pub state: HealthState,
    /// Present only when the state is `UNKNOWN`
    pub reason: Option<String>,
}

impl Health {
    pub fn running() -> Self {
        Health {
            state: HealthState::Running,
            reason: None,
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Health {
            state: HealthState::Unknown,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the API server at `server`. Failures are reported as data, never as errors.
    async fn probe(&self, server: &str) -> Health;
}

/// Probes `<server>/livez` without certificate verification
pub struct LivezProbe {
    http: reqwest::Client,
}

impl LivezProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }
}

fn livez_url(server: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(server)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(LIVEZ_PATH)
}

#[async_trait]
impl HealthProbe for LivezProbe {
    async fn probe(&self, server: &str) -> Health {
        let url = match livez_url(server) {
            Ok(url) => url,
            Err(e) => return Health::unknown(format!("invalid server url {}: {}", server, e)),
        };

        match self.http.get(url.clone()).send().await {
            Ok(response) => {
                debug!("{} answered {}", url, response.status());
                Health::running()
            }
            Err(e) => Health::unknown(format!("failed to get response from {}: {}", url, e)),
        }
    }
}
