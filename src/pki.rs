// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-process certificate authority for secured ingresses.
//!
//! The CA key lives only in memory. A restart produces a new CA that cannot
//! validate leaf certificates issued by an earlier process.

use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, PKCS_RSA_SHA256,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{ReplicantError, Result};

/// Validity of every issued certificate, counted from the moment of issuance
const VALIDITY_DAYS: i64 = 8 * 365;

const ORGANIZATION: &str = "Replicant";

/// A PEM encoded certificate and its private key
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

fn validity() -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now, now + time::Duration::days(VALIDITY_DAYS))
}

fn subject(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

fn generate_key(purpose: &str) -> Result<KeyPair> {
    KeyPair::generate_for(&PKCS_RSA_SHA256).map_err(|e| {
        ReplicantError::CertificateError(format!("failed to generate {} key: {}", purpose, e))
    })
}

/// A self-signed CA together with its signing key.
pub struct CertificateAuthority {
    cert_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

impl CertificateAuthority {
    fn generate() -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = subject("ca");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        (params.not_before, params.not_after) = validity();

        let key = generate_key("CA")?;
        let cert = params.clone().self_signed(&key).map_err(|e| {
            ReplicantError::CertificateError(format!("failed to self-sign CA: {}", e))
        })?;

        Ok(Self {
            cert_pem: cert.pem(),
            issuer: Issuer::new(params, key),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    fn sign(&self, params: CertificateParams, purpose: &str) -> Result<IssuedCert> {
        let key = generate_key(purpose)?;
        let cert = params.signed_by(&key, &self.issuer).map_err(|e| {
            ReplicantError::CertificateError(format!("failed to sign {} cert: {}", purpose, e))
        })?;
        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    /// Server certificate for `hostname`, usable for TLS server authentication
    pub fn issue_server(&self, hostname: &str) -> Result<IssuedCert> {
        let dns = Ia5String::try_from(hostname.to_string()).map_err(|e| {
            ReplicantError::CertificateError(format!("invalid DNS name '{}': {}", hostname, e))
        })?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject("server");
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = vec![SanType::DnsName(dns)];
        (params.not_before, params.not_after) = validity();

        self.sign(params, "server")
    }

    /// Client certificate for mutual TLS against an ingress that trusts this CA
    pub fn issue_client(&self) -> Result<IssuedCert> {
        let mut params = CertificateParams::default();
        params.distinguished_name = subject("client");
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        (params.not_before, params.not_after) = validity();

        self.sign(params, "client")
    }
}

/// Issues CAs and leaf certificates, remembering the most recently issued CA.
#[derive(Default)]
pub struct CertificateIssuer {
    current: Mutex<Option<Arc<CertificateAuthority>>>,
}

impl CertificateIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new CA and make it the one later leaf certificates are signed by
    pub fn issue_ca(&self) -> Result<Arc<CertificateAuthority>> {
        let ca = Arc::new(CertificateAuthority::generate()?);
        info!("Issued new in-process certificate authority");
        if let Ok(mut current) = self.current.lock() {
            *current = Some(ca.clone());
        }
        Ok(ca)
    }

    /// The most recently issued CA, if any
    pub fn current(&self) -> Option<Arc<CertificateAuthority>> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn require_current(&self) -> Result<Arc<CertificateAuthority>> {
        self.current().ok_or_else(|| {
            ReplicantError::CertificateError("certificate authority not initialized".to_string())
        })
    }

    pub fn issue_server(&self, hostname: &str) -> Result<IssuedCert> {
        debug!("Issuing server certificate for {}", hostname);
        self.require_current()?.issue_server(hostname)
    }

    pub fn issue_client(&self) -> Result<IssuedCert> {
        debug!("Issuing client certificate");
        self.require_current()?.issue_client()
    }
}
