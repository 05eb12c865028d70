use std::fmt;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::error::ConfigError;

/// TLS material for connections to the collector.
///
/// Either PEM material or a prebuilt rustls config; the prebuilt config wins.
/// Without trusted certificates the webpki roots are used.
#[derive(Clone, Default)]
pub struct TlsConfig {
    pub trusted_certificates_pem: Option<Vec<u8>>,
    pub client_certificate_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    pub client_config: Option<Arc<ClientConfig>>,
}

impl TlsConfig {
    pub fn with_trusted_certificates(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.trusted_certificates_pem = Some(pem.into());
        self
    }

    pub fn with_client_identity(
        mut self,
        certificate_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        self.client_certificate_pem = Some(certificate_pem.into());
        self.client_key_pem = Some(key_pem.into());
        self
    }

    pub fn with_client_config(mut self, config: Arc<ClientConfig>) -> Self {
        self.client_config = Some(config);
        self
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("trusted_certificates", &self.trusted_certificates_pem.is_some())
            .field("client_certificate", &self.client_certificate_pem.is_some())
            .field("client_key", &self.client_key_pem.is_some())
            .field("client_config", &self.client_config.is_some())
            .finish()
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls("No certificates found in PEM input".to_string()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| ConfigError::Tls(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| ConfigError::Tls("No private key found in PEM input".to_string()))
}

/// Build the rustls client configuration for `tls`.
pub(crate) fn client_config(tls: Option<&TlsConfig>) -> Result<ClientConfig, ConfigError> {
    if let Some(prebuilt) = tls.and_then(|t| t.client_config.as_ref()) {
        let mut config = ClientConfig::clone(prebuilt);
        // ALPN is chosen by the connector from the negotiated HTTP versions
        config.alpn_protocols.clear();
        return Ok(config);
    }

    let mut roots = RootCertStore::empty();
    match tls.and_then(|t| t.trusted_certificates_pem.as_deref()) {
        Some(pem) => {
            for cert in parse_certificates(pem)? {
                roots
                    .add(cert)
                    .map_err(|e| ConfigError::Tls(format!("Invalid trusted certificate: {e}")))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConfigError::Tls(e.to_string()))?
    .with_root_certificates(roots);

    let certificate = tls.and_then(|t| t.client_certificate_pem.as_deref());
    let key = tls.and_then(|t| t.client_key_pem.as_deref());
    match (certificate, key) {
        (Some(certificate), Some(key)) => builder
            .with_client_auth_cert(parse_certificates(certificate)?, parse_private_key(key)?)
            .map_err(|e| ConfigError::Tls(format!("Invalid client identity: {e}"))),
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(ConfigError::Tls(
            "Client certificate and key must be configured together".to_string(),
        )),
    }
}
