pub mod verifier;

use crate::config::ClientConfig;
use crate::trace::TlsState;
use anyhow::Context;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::crypto::CryptoProvider;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use verifier::MetricsCertVerifier;

/// Builds the rustls connector used for `https` origins.
pub fn build_connector(config: &ClientConfig) -> Result<TlsConnector, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = config.ca_file.as_ref() {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open CA file: {}", file_path.display()))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });

    let verifier = MetricsCertVerifier::new(config.insecure, provider.clone(), &root_store)?;

    let mut tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    // The dispatcher only speaks HTTP/1.1.
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));

    Ok(TlsConnector::from(Arc::new(tls_config)))
}

pub fn negotiated<S>(stream: &TlsStream<S>) -> TlsState {
    let (_, conn) = stream.get_ref();
    TlsState {
        protocol_version: conn
            .protocol_version()
            .map(|v| format!("{:?}", v))
            .unwrap_or_default(),
        cipher_suite: conn
            .negotiated_cipher_suite()
            .map(|s| format!("{:?}", s.suite()))
            .unwrap_or_default(),
    }
}
