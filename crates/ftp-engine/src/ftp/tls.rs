//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! - Builds one rustls `TlsConnector` per session from [`TlsOptions`].
//! - The same connector (and so the same session cache) secures the control
//!   channel and every data channel, which lets servers that insist on TLS
//!   session reuse accept the data connections.

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::TlsOptions;
use log::warn;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A configured TLS client for one FTP session.
#[derive(Clone)]
pub struct FtpTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl FtpTls {
    /// Build the connector: PEM trust anchors from the options, or the
    /// platform trust store when none are given.
    pub fn from_options(opts: &TlsOptions) -> FtpResult<Self> {
        let roots = if opts.ca_certs.is_empty() {
            native_roots()
        } else {
            pem_roots(&opts.ca_certs)?
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| FtpError::tls_failed(format!("TLS configuration: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        if opts.accept_invalid_certs {
            warn!("FTPS certificate verification disabled – insecure!");
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }

        let server_name = ServerName::try_from(opts.hostname.clone()).map_err(|e| {
            FtpError::tls_failed(format!("Invalid TLS hostname '{}': {}", opts.hostname, e))
        })?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name,
        })
    }

    /// Run the client handshake over `tcp`.
    pub async fn wrap(&self, tcp: TcpStream) -> FtpResult<TlsStream<TcpStream>> {
        self.connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| FtpError::tls_failed(format!("TLS handshake failed: {}", e)))
    }
}

fn native_roots() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        warn!("Skipping unreadable platform certificate: {}", e);
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if ignored > 0 {
        warn!("Loaded {} platform certificates, ignored {}", added, ignored);
    }
    roots
}

fn pem_roots(pems: &[String]) -> FtpResult<rustls::RootCertStore> {
    let mut roots = rustls::RootCertStore::empty();
    for pem in pems {
        let mut cursor = Cursor::new(pem.as_bytes());
        let certs = rustls_pemfile::certs(&mut cursor)
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|e| FtpError::tls_failed(format!("Failed to read CA cert: {}", e)))?;
        if certs.is_empty() {
            return Err(FtpError::tls_failed("CA cert PEM contains no certificate"));
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| FtpError::tls_failed(format!("Failed to add CA cert: {}", e)))?;
        }
    }
    Ok(roots)
}

// ─── NoCertVerifier (for self-signed certs) ─────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
