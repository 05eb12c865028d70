//! Sends pre-encoded OTLP export requests to a collector.
//!
//! Reads one serialized `Export*ServiceRequest` from a file and exports it
//! with the transport configured from `OTEL_EXPORTER_OTLP_*` variables and flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use otlp_transport::{
    init_logging, EncodedPayloadFactory, ExporterBuilder, ExporterConfig, LogConfig, MemoryMode,
    PayloadExporter, Protocol, ProxySelector, Signal,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send encoded OTLP requests to a collector", long_about = None)]
struct Args {
    /// File holding one encoded export request
    payload: PathBuf,

    /// Signal the request belongs to
    #[arg(short, long, default_value = "traces")]
    signal: Signal,

    /// grpc, http/protobuf or http/json
    #[arg(short, long)]
    protocol: Option<Protocol>,

    /// Collector endpoint (full URL for HTTP)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// gzip or none
    #[arg(short, long)]
    compression: Option<String>,

    /// reusable_data or immutable_data
    #[arg(long)]
    memory_mode: Option<MemoryMode>,

    /// Per-attempt timeout in milliseconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// How many times to send the request
    #[arg(short = 'n', long, default_value_t = 1)]
    repeat: u32,

    /// Seconds to wait for all exports to finish
    #[arg(long, default_value_t = 60)]
    wait: u64,

    /// Disable retries
    #[arg(long)]
    no_retry: bool,

    /// Proxy for every connection, overriding HTTP(S)_PROXY
    #[arg(long)]
    proxy: Option<String>,

    /// Authenticate with Google Application Default Credentials
    #[cfg(feature = "gcp")]
    #[arg(long)]
    gcp: bool,
}

impl Args {
    fn apply(&self, mut config: ExporterConfig) -> ExporterConfig {
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = Some(endpoint.clone());
        }
        if let Some(compression) = &self.compression {
            config.compression = compression.clone();
        }
        if let Some(mode) = self.memory_mode {
            config.memory_mode = mode;
        }
        if let Some(millis) = self.timeout {
            config.timeout = Duration::from_millis(millis);
        }
        if self.no_retry {
            config.retry_policy = None;
        }
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(ProxySelector::to(proxy));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logging(&LogConfig::from_env())?;

    #[allow(unused_mut)]
    let mut config = args.apply(ExporterConfig::from_env(args.signal)?);
    let payload = tokio::fs::read(&args.payload).await?;

    #[cfg(feature = "gcp")]
    let auth = if args.gcp {
        let gcp = otlp_transport::gcp::GcpConfig::from_env()
            .ok_or("GOOGLE_CLOUD_PROJECT must be set to use --gcp")?;
        if args.endpoint.is_none() {
            config.endpoint = Some(if config.protocol.is_grpc() {
                gcp.endpoint.clone()
            } else {
                format!("{}{}", gcp.endpoint.trim_end_matches('/'), args.signal.http_path())
            });
        }
        Some(otlp_transport::gcp::GcpAuth::from_adc(&gcp).await?)
    } else {
        None
    };

    let builder = ExporterBuilder::<[u8], _>::new(config, EncodedPayloadFactory);
    #[cfg(feature = "gcp")]
    let builder = match auth {
        Some(auth) => builder.with_headers(auth.supplier()).with_authenticator(auth),
        None => builder,
    };
    let exporter: PayloadExporter = builder.build()?;

    info!(
        signal = %args.signal,
        bytes = payload.len(),
        repeat = args.repeat,
        "Sending {}",
        args.payload.display()
    );

    let handles: Vec<_> = (0..args.repeat).map(|_| exporter.export(&payload)).collect();

    let wait = Duration::from_secs(args.wait);
    let mut failed = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.wait_timeout(wait).await {
            Ok(()) => info!(export = i, "Export succeeded"),
            Err(err) => {
                failed += 1;
                error!(export = i, error = %err, "Export failed");
            }
        }
    }

    exporter.shutdown().await?;

    if failed > 0 {
        return Err(format!("{failed} of {} exports failed", args.repeat).into());
    }
    Ok(())
}
