//! OTLP export transport with pluggable senders.
//!
//! This crate delivers already-assembled telemetry batches (traces, metrics,
//! logs, profiles) to an OTLP collector over unary gRPC or HTTP, with
//! compression, retry with exponential backoff and optional marshaler reuse.
//!
//! # Features
//!
//! - `gcp`: Google Cloud authentication for the telemetry endpoint
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use otlp_transport::{EncodedPayloadFactory, ExporterBuilder, ExporterConfig, Signal};
//!
//! let config = ExporterConfig::from_env(Signal::Traces)?;
//! let exporter = ExporterBuilder::new(config, EncodedPayloadFactory).build()?;
//!
//! exporter.export(&encoded_request).await?;
//! exporter.shutdown().await?;
//! ```
//!
//! # Configuration
//!
//! ## Using the Builder
//!
//! ```rust,ignore
//! let config = ExporterConfig::builder(Signal::Logs)
//!     .grpc()
//!     .endpoint("https://collector:4317")
//!     .gzip()
//!     .header("api-key", "secret")
//!     .memory_mode(MemoryMode::ReusableData)
//!     .build();
//! ```
//!
//! ## Protocols
//!
//! - [`Protocol::Grpc`]: length-prefixed protobuf over HTTP/2
//! - [`Protocol::HttpProtobuf`]: protobuf body over HTTP POST (default)
//! - [`Protocol::HttpJson`]: JSON body over HTTP POST
//!
//! # Environment Variables
//!
//! Every `OTEL_EXPORTER_OTLP_<X>` variable also exists per signal as
//! `OTEL_EXPORTER_OTLP_<SIGNAL>_<X>`, which wins over the generic one.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector endpoint | `http://localhost:4318` (`:4317` for gRPC) |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `grpc`, `http/protobuf` or `http/json` | `http/protobuf` |
//! | `OTEL_EXPORTER_OTLP_TIMEOUT` | Per-attempt timeout in milliseconds | `10000` |
//! | `OTEL_EXPORTER_OTLP_COMPRESSION` | `gzip` or `none` | `none` |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `key=value` pairs, comma separated | - |
//! | `OTEL_EXPORTER_OTLP_MEMORY_MODE` | `reusable_data` or `immutable_data` | `immutable_data` |
//! | `OTEL_EXPORTER_OTLP_SENDER_PROVIDER` | Registered sender provider name | `hyper` |
//! | `HTTPS_PROXY` / `HTTP_PROXY` / `ALL_PROXY` | Proxy reached through `CONNECT` | direct |
//! | `NO_PROXY` | Hosts that bypass the proxy | - |
//! | `RUST_LOG` | Log level filter | `info` |
//! | `LOG_FORMAT` | `pretty` or `json` | `pretty` |
//!
//! # Module Structure
//!
//! - [`completion`]: Completion handles returned by exports
//! - [`compression`]: Request body compressors
//! - [`config`]: Exporter and logging configuration
//! - [`error`]: Error types
//! - [`exporter`]: The exporter and its builder
//! - [`marshal`]: Payload abstractions
//! - [`pool`]: Reusable marshaler pool
//! - [`retry`]: Retry policy and backoff
//! - [`sender`]: gRPC and HTTP senders plus their registry
//! - [`trace`]: Log subscriber setup
//! - `gcp`: Google Cloud credentials (feature-gated)

pub mod completion;
pub mod compression;
pub mod config;
pub mod error;
pub mod exporter;
pub mod marshal;
pub mod pool;
pub mod retry;
pub mod sender;
pub mod trace;

#[cfg(feature = "gcp")]
pub mod gcp;

// Re-exports
pub use completion::{CompletionHandle, Completer, ExportResult};
pub use compression::{Compressor, CompressorRegistry};
pub use config::{ExporterConfig, ExporterConfigBuilder, LogConfig, LogFormat, MemoryMode, Protocol, Signal};
pub use error::{ConfigError, ExportError, TransportError};
pub use exporter::{Exporter, ExporterBuilder, PayloadExporter, Transport};
pub use marshal::{
    EncodedPayload, EncodedPayloadFactory, Marshaler, MarshalerFactory, MessageWriter,
    PayloadFormat, ReusableMarshaler,
};
pub use retry::RetryPolicy;
pub use sender::{Authenticator, ProxySelector, Sender, SenderConfig, SenderRegistry};
pub use trace::init_logging;
