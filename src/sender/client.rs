use std::error::Error as StdError;
use std::io;

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::error::{ConfigError, TransportError};
use crate::sender::proxy::ProxyConnector;
use crate::sender::tls;
use crate::sender::SenderConfig;

pub(crate) type HttpClient = Client<HttpsConnector<ProxyConnector>, Full<Bytes>>;

/// Which HTTP versions a sender speaks to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Negotiation {
    Http1,
    /// HTTP/2 only; plaintext connections use prior knowledge.
    Http2Only,
}

pub(crate) fn build_client(
    config: &SenderConfig,
    negotiation: Negotiation,
) -> Result<HttpClient, ConfigError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(config.connect_timeout));
    let tcp = ProxyConnector::new(http, config.proxy.clone());

    let tls = tls::client_config(config.tls.as_ref())?;
    let builder = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http();
    let connector = match negotiation {
        Negotiation::Http1 => builder.enable_http1().wrap_connector(tcp),
        Negotiation::Http2Only => builder.enable_http2().wrap_connector(tcp),
    };

    Ok(Client::builder(TokioExecutor::new())
        .http2_only(negotiation == Negotiation::Http2Only)
        .build(connector))
}

fn find_io_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a io::Error> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Some(io);
        }
        current = err.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        current = cause.source();
    }
    message
}

/// Classify a client failure into the tagged transport error used for retries.
pub(crate) fn classify(err: &hyper_util::client::legacy::Error) -> TransportError {
    let message = error_chain(err);
    let connecting = err.is_connect();
    if let Some(io) = find_io_error(err) {
        return match TransportError::from_io(io, connecting) {
            TransportError::Io(_) => TransportError::Io(message),
            classified => classified,
        };
    }
    if connecting {
        let lower = message.to_ascii_lowercase();
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            return TransportError::Tls(message);
        }
    }
    TransportError::Io(message)
}
