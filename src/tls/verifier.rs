use anyhow::Context;
use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, Error, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::Level;
use x509_parser::parse_x509_certificate;

/// Web PKI verification that logs the presented leaf certificate and can be
/// switched off entirely for insecure probing.
#[derive(Debug)]
pub struct MetricsCertVerifier {
    inner: Arc<WebPkiServerVerifier>,
    insecure: bool,
}

impl MetricsCertVerifier {
    pub fn new(
        insecure: bool,
        provider: Arc<CryptoProvider>,
        root_store: &RootCertStore,
    ) -> Result<Self, anyhow::Error> {
        let roots = Arc::new(root_store.clone());
        let inner = WebPkiServerVerifier::builder_with_provider(roots, provider)
            .build()
            .context("Failed to build certificate verifier")?;
        Ok(Self { inner, insecure })
    }
}

/// What gets logged about the server's leaf certificate.
#[derive(Debug)]
struct LeafSummary {
    subject: String,
    issuer: String,
    valid: String,
    names: Vec<String>,
}

impl LeafSummary {
    fn parse(der: &CertificateDer<'_>) -> Option<Self> {
        let (_, cert) = parse_x509_certificate(der.as_ref()).ok()?;
        let validity = cert.validity();
        let names = match cert.tbs_certificate.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .map(|name| name.to_string())
                .collect(),
            _ => Vec::new(),
        };
        Some(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            valid: format!("{} - {}", validity.not_before, validity.not_after),
            names,
        })
    }
}

impl ServerCertVerifier for MetricsCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if tracing::enabled!(Level::DEBUG) {
            match LeafSummary::parse(end_entity) {
                Some(leaf) => debug!(
                    subject = %leaf.subject,
                    issuer = %leaf.issuer,
                    valid = %leaf.valid,
                    names = ?leaf.names,
                    "server certificate"
                ),
                None => debug!("server certificate is not valid X.509"),
            }
        }

        if self.insecure {
            return Ok(ServerCertVerified::assertion());
        }
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
            .inspect_err(|e| warn!(server = ?server_name, "certificate rejected: {}", e))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
