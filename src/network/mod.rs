//! Network layer: accept gateway, per-connection tasks, TLS plumbing.

pub mod connection;
pub mod gateway;

use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsConfig;

/// Build a TLS acceptor from the configured certificate and key, with
/// client certificates requested (for certfp/SASL EXTERNAL) but optional.
pub fn build_acceptor(config: &TlsConfig) -> anyhow::Result<TlsAcceptor> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(
        &mut std::io::BufReader::new(std::fs::File::open(&config.cert_path)?),
    )
    .collect::<Result<_, _>>()?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut std::io::BufReader::new(
        std::fs::File::open(&config.key_path)?,
    ))?
    .ok_or_else(|| anyhow::anyhow!("no private key in {}", config.key_path))?;

    let verifier = tokio_rustls::rustls::server::WebPkiClientVerifier::builder(Arc::new(
        RootCertStore::empty(),
    ))
    .allow_unauthenticated()
    .build()
    // An empty root store rejects real verification; fall back to not
    // requesting client certs when the verifier cannot be built.
    .ok();

    let builder = ServerConfig::builder();
    let server_config = match verifier {
        Some(verifier) => builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)?,
        None => builder
            .with_no_client_auth()
            .with_single_cert(certs, key)?,
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Build an outbound TLS connector trusting the platform roots.
pub fn build_connector() -> anyhow::Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse a hostname for SNI.
pub fn server_name(host: &str) -> anyhow::Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| anyhow::anyhow!("invalid TLS server name {host}"))
}
