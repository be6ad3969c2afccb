//! TLS setup for talking to LND.
//!
//! LND serves a self-signed certificate with `CA:TRUE`, which webpki refuses
//! as a server certificate. Instead of path validation we pin the exact
//! certificate from `tls.cert`; handshake signatures are still checked
//! against its key.

use anyhow::Context;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, CertificateError, ClientConfig, ServerName};
use std::sync::Arc;
use std::time::SystemTime;

/// Accepts the server only if it presents exactly the pinned certificate.
pub struct PinnedCertVerifier {
    pinned: Certificate,
}

impl PinnedCertVerifier {
    pub fn new(der: Vec<u8>) -> Self {
        Self {
            pinned: Certificate(der),
        }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.0 == self.pinned.0 {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }
}

/// First certificate of a PEM bundle, as DER.
pub fn first_cert_der(pem: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut certs = rustls_pemfile::certs(&mut &pem[..]).context("TLS cert is not valid PEM")?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in TLS cert file");
    }
    Ok(certs.swap_remove(0))
}

/// rustls client config trusting only the certificate in `cert_pem`.
pub fn pinned_client_config(cert_pem: &[u8]) -> anyhow::Result<ClientConfig> {
    let der = first_cert_der(cert_pem)?;
    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(der)))
        .with_no_client_auth())
}
