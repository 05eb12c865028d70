use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while building exporters, senders and policies.
///
/// These are always reported eagerly by the builders, never from an export call.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),
    #[error("Invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Unsupported compression method {0:?}")]
    UnsupportedCompression(String),
    #[error("No sender provider registered under {0:?}")]
    UnknownSender(String),
    #[error("Invalid header {0}")]
    InvalidHeader(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("No tokio runtime available to dispatch requests")]
    NoRuntime,
}

/// Why a single logical send could not produce a response.
///
/// Retry classification works on these variants as data; see
/// [`crate::retry::is_retryable_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),
    #[error("timed out on an established connection: {0}")]
    ReadTimeout(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("failed to write request payload: {0}")]
    Marshal(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("sender has been shut down")]
    Shutdown,
}

impl TransportError {
    /// Map an I/O error, distinguishing the connect phase from the exchange itself.
    pub fn from_io(err: &io::Error, connecting: bool) -> Self {
        let message = err.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(message),
            io::ErrorKind::TimedOut if connecting => Self::ConnectTimeout(message),
            io::ErrorKind::TimedOut => Self::ReadTimeout(message),
            _ => Self::Io(message),
        }
    }
}

/// Outcome reported to the caller of an exporter.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server responded with gRPC status {code:?}: {message}")]
    GrpcStatus { code: tonic::Code, message: String },
    #[error("server responded with HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("exporter has been shut down")]
    Shutdown,
    #[error("export did not complete within {0:?}")]
    Timeout(Duration),
    #[error("export was abandoned before completion")]
    Abandoned,
}

impl From<ExportError> for opentelemetry_sdk::error::OTelSdkError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Shutdown => Self::AlreadyShutdown,
            ExportError::Timeout(after) => Self::Timeout(after),
            other => Self::InternalFailure(other.to_string()),
        }
    }
}
