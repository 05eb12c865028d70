//! Google Cloud credentials for OTLP export.
//!
//! Provides a headers supplier that authenticates requests to the Google
//! telemetry endpoint with Application Default Credentials.
//!
//! # Example
//!
//! ```rust,ignore
//! use otlp_transport::gcp::{GcpAuth, GcpConfig};
//!
//! let gcp = GcpConfig::from_env().expect("GCP config from env");
//! let auth = GcpAuth::from_adc(&gcp).await?;
//!
//! let config = ExporterConfig::new(Signal::Traces)
//!     .with_protocol(Protocol::Grpc)
//!     .with_endpoint(gcp.endpoint.clone());
//! let exporter = ExporterBuilder::new(config, EncodedPayloadFactory)
//!     .with_headers(auth.supplier())
//!     .build()?;
//! ```
//!
//! # Environment Variables
//!
//! - `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT` / `GCP_PROJECT`: Project ID
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Custom OTLP endpoint

mod auth;
pub mod config;

pub use auth::{auth_headers, GcpAuth, REFRESH_INTERVAL};
pub use config::{GcpConfig, DEFAULT_ENDPOINT};
