use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use percent_encoding::percent_decode_str;

use crate::compression;
use crate::error::ConfigError;
use crate::marshal::PayloadFormat;
use crate::retry::RetryPolicy;
use crate::sender::{ProxySelector, TlsConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT};

pub const DEFAULT_GRPC_ENDPOINT: &str = "http://localhost:4317";
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:4318";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty human-readable format with colors (for local dev)
    #[default]
    Pretty,
    /// JSON structured format (for cloud environments)
    Json,
}

/// Logging configuration for binaries built on this crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl LogConfig {
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    /// Read `RUST_LOG` and `LOG_FORMAT`
    pub fn from_env() -> Self {
        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Pretty,
        };

        Self {
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format,
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of telemetry an exporter ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
    Profiles,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
            Self::Profiles => "profiles",
        }
    }

    /// Fully qualified gRPC export method.
    pub fn grpc_method(&self) -> &'static str {
        match self {
            Self::Traces => "opentelemetry.proto.collector.trace.v1.TraceService/Export",
            Self::Metrics => "opentelemetry.proto.collector.metrics.v1.MetricsService/Export",
            Self::Logs => "opentelemetry.proto.collector.logs.v1.LogsService/Export",
            Self::Profiles => {
                "opentelemetry.proto.collector.profiles.v1development.ProfilesService/Export"
            }
        }
    }

    /// Path appended to a base endpoint for HTTP export.
    pub fn http_path(&self) -> &'static str {
        match self {
            Self::Traces => "/v1/traces",
            Self::Metrics => "/v1/metrics",
            Self::Logs => "/v1/logs",
            Self::Profiles => "/v1development/profiles",
        }
    }

    fn env_infix(&self) -> &'static str {
        match self {
            Self::Traces => "TRACES",
            Self::Metrics => "METRICS",
            Self::Logs => "LOGS",
            Self::Profiles => "PROFILES",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "traces" | "trace" | "spans" => Ok(Self::Traces),
            "metrics" => Ok(Self::Metrics),
            "logs" => Ok(Self::Logs),
            "profiles" => Ok(Self::Profiles),
            _ => Err(ConfigError::InvalidValue {
                key: "signal".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// OTLP transport protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    #[default]
    HttpProtobuf,
    HttpJson,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::HttpProtobuf => "http/protobuf",
            Self::HttpJson => "http/json",
        }
    }

    pub fn payload_format(&self) -> PayloadFormat {
        match self {
            Self::Grpc | Self::HttpProtobuf => PayloadFormat::Binary,
            Self::HttpJson => PayloadFormat::Json,
        }
    }

    pub fn is_grpc(&self) -> bool {
        matches!(self, Self::Grpc)
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "grpc" => Ok(Self::Grpc),
            "http/protobuf" => Ok(Self::HttpProtobuf),
            "http/json" => Ok(Self::HttpJson),
            other => Err(ConfigError::InvalidValue {
                key: "protocol".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Allocation strategy for per-export serialization state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryMode {
    /// Pool and reuse marshalers. Collection and export must not overlap.
    ReusableData,
    /// Fresh marshaler per export; exports may run concurrently.
    #[default]
    ImmutableData,
}

impl FromStr for MemoryMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reusable_data" => Ok(Self::ReusableData),
            "immutable_data" => Ok(Self::ImmutableData),
            _ => Err(ConfigError::InvalidValue {
                key: "memory_mode".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// Everything needed to build an exporter for one signal
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub signal: Signal,
    pub protocol: Protocol,
    /// Full URL for HTTP; base URL for gRPC. `None` selects the default.
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Registered compressor name, or `none`.
    pub compression: String,
    pub headers: Vec<(String, String)>,
    pub retry_policy: Option<RetryPolicy>,
    pub memory_mode: MemoryMode,
    /// Registered sender provider; `None` selects the default.
    pub sender_provider: Option<String>,
    pub tls: Option<TlsConfig>,
    /// `None` connects directly.
    pub proxy: Option<ProxySelector>,
}

impl ExporterConfig {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            protocol: Protocol::default(),
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            compression: compression::NONE.to_string(),
            headers: Vec::new(),
            retry_policy: Some(RetryPolicy::default()),
            memory_mode: MemoryMode::default(),
            sender_provider: None,
            tls: None,
            proxy: None,
        }
    }

    pub fn builder(signal: Signal) -> ExporterConfigBuilder {
        ExporterConfigBuilder::new(signal)
    }

    /// Create config from the standard `OTEL_EXPORTER_OTLP_*` variables.
    ///
    /// Signal-specific variables win over the generic ones. A generic HTTP
    /// endpoint gets the signal path appended; a signal-specific one is used as-is.
    pub fn from_env(signal: Signal) -> Result<Self, ConfigError> {
        Self::from_lookup(signal, |key| env::var(key).ok())
    }

    /// Like [`ExporterConfig::from_env`] with a custom variable source.
    pub fn from_lookup<L>(signal: Signal, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |suffix: &str| -> Option<(String, String)> {
            let specific = format!("OTEL_EXPORTER_OTLP_{}_{suffix}", signal.env_infix());
            if let Some(value) = lookup(&specific).filter(|v| !v.trim().is_empty()) {
                return Some((specific, value));
            }
            let generic = format!("OTEL_EXPORTER_OTLP_{suffix}");
            lookup(&generic)
                .filter(|v| !v.trim().is_empty())
                .map(|value| (generic, value))
        };

        let mut config = Self::new(signal);

        if let Some((_, value)) = read("PROTOCOL") {
            config.protocol = value.parse()?;
        }

        if let Some((key, value)) = read("ENDPOINT") {
            let value = value.trim().to_string();
            let generic = !key.contains(signal.env_infix());
            config.endpoint = Some(if generic && !config.protocol.is_grpc() {
                format!("{}{}", value.trim_end_matches('/'), signal.http_path())
            } else {
                value
            });
        }

        if let Some((key, value)) = read("TIMEOUT") {
            let millis = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue { key, value })?;
            config.timeout = Duration::from_millis(millis);
        }

        if let Some((_, value)) = read("COMPRESSION") {
            config.compression = value.trim().to_ascii_lowercase();
        }

        if let Some((key, value)) = read("HEADERS") {
            config.headers = parse_headers(&value).map_err(|_| ConfigError::InvalidValue { key, value })?;
        }

        if let Some(value) = lookup("OTEL_EXPORTER_OTLP_MEMORY_MODE").filter(|v| !v.trim().is_empty()) {
            config.memory_mode = value.parse()?;
        }

        if let Some(value) = lookup("OTEL_EXPORTER_OTLP_SENDER_PROVIDER").filter(|v| !v.trim().is_empty()) {
            config.sender_provider = Some(value.trim().to_string());
        }

        config.proxy = ProxySelector::from_lookup(&lookup);

        Ok(config)
    }

    /// The endpoint requests go to, defaults applied.
    pub fn resolved_endpoint(&self) -> String {
        match (&self.endpoint, self.protocol) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Protocol::Grpc) => DEFAULT_GRPC_ENDPOINT.to_string(),
            (None, _) => format!("{DEFAULT_HTTP_ENDPOINT}{}", self.signal.http_path()),
        }
    }

    /// Configured headers as a validated header map.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::InvalidHeader(format!("{name}: {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::InvalidHeader(format!("{name}: {e}")))?;
            headers.append(header_name, header_value);
        }
        Ok(headers)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = compression.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// `None` disables retries.
    pub fn with_retry_policy(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_memory_mode(mut self, mode: MemoryMode) -> Self {
        self.memory_mode = mode;
        self
    }

    pub fn with_sender_provider(mut self, name: impl Into<String>) -> Self {
        self.sender_provider = Some(name.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxySelector) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Parse `key1=value1,key2=value2`, percent-decoding both sides.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ()> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, value) = entry.split_once('=').ok_or(())?;
            let name = percent_decode_str(name.trim()).decode_utf8().map_err(|_| ())?;
            let value = percent_decode_str(value.trim()).decode_utf8().map_err(|_| ())?;
            if name.is_empty() {
                return Err(());
            }
            Ok((name.into_owned(), value.into_owned()))
        })
        .collect()
}

pub struct ExporterConfigBuilder {
    signal: Signal,
    protocol: Option<Protocol>,
    endpoint: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    compression: Option<String>,
    headers: Vec<(String, String)>,
    retry_policy: Option<Option<RetryPolicy>>,
    memory_mode: Option<MemoryMode>,
    sender_provider: Option<String>,
    tls: Option<TlsConfig>,
    proxy: Option<ProxySelector>,
}

impl ExporterConfigBuilder {
    pub fn new(signal: Signal) -> Self {
        Self {
            signal,
            protocol: None,
            endpoint: None,
            timeout: None,
            connect_timeout: None,
            compression: None,
            headers: Vec::new(),
            retry_policy: None,
            memory_mode: None,
            sender_provider: None,
            tls: None,
            proxy: None,
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn grpc(self) -> Self {
        self.protocol(Protocol::Grpc)
    }

    pub fn http_json(self) -> Self {
        self.protocol(Protocol::HttpJson)
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    pub fn gzip(self) -> Self {
        self.compression(compression::GZIP)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(Some(policy));
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry_policy = Some(None);
        self
    }

    pub fn memory_mode(mut self, mode: MemoryMode) -> Self {
        self.memory_mode = Some(mode);
        self
    }

    pub fn sender_provider(mut self, name: impl Into<String>) -> Self {
        self.sender_provider = Some(name.into());
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn proxy(mut self, proxy: ProxySelector) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn build(self) -> ExporterConfig {
        let defaults = ExporterConfig::new(self.signal);
        ExporterConfig {
            signal: self.signal,
            protocol: self.protocol.unwrap_or(defaults.protocol),
            endpoint: self.endpoint,
            timeout: self.timeout.unwrap_or(defaults.timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            compression: self.compression.unwrap_or(defaults.compression),
            headers: self.headers,
            retry_policy: self.retry_policy.unwrap_or(defaults.retry_policy),
            memory_mode: self.memory_mode.unwrap_or(defaults.memory_mode),
            sender_provider: self.sender_provider,
            tls: self.tls,
            proxy: self.proxy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // Helper to clean up env vars after tests
    struct EnvGuard {
        vars: Vec<&'static str>,
    }

    impl EnvGuard {
        fn new(vars: &[&'static str]) -> Self {
            Self { vars: vars.to_vec() }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                env::remove_var(var);
            }
        }
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn log_format_default_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn log_config_with_methods_chain() {
        let config = LogConfig::new()
            .with_log_level("debug")
            .with_log_format(LogFormat::Json);

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn config_new_sets_defaults() {
        let config = ExporterConfig::new(Signal::Traces);

        assert_eq!(config.protocol, Protocol::HttpProtobuf);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.compression, "none");
        assert_eq!(config.memory_mode, MemoryMode::ImmutableData);
        assert_eq!(config.retry_policy.as_ref().map(RetryPolicy::max_attempts), Some(5));
        assert_eq!(config.resolved_endpoint(), "http://localhost:4318/v1/traces");
        assert!(config.sender_provider.is_none());
    }

    #[test]
    fn grpc_default_endpoint() {
        let config = ExporterConfig::new(Signal::Logs).with_protocol(Protocol::Grpc);

        assert_eq!(config.resolved_endpoint(), "http://localhost:4317");
    }

    #[test]
    fn builder_sets_all_fields() {
        let config = ExporterConfig::builder(Signal::Metrics)
            .grpc()
            .endpoint("https://collector:4317")
            .timeout(Duration::from_secs(3))
            .gzip()
            .header("x-team", "obs")
            .no_retry()
            .memory_mode(MemoryMode::ReusableData)
            .sender_provider("hyper")
            .build();

        assert_eq!(config.protocol, Protocol::Grpc);
        assert_eq!(config.resolved_endpoint(), "https://collector:4317");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.compression, "gzip");
        assert_eq!(config.headers, vec![("x-team".to_string(), "obs".to_string())]);
        assert!(config.retry_policy.is_none());
        assert_eq!(config.memory_mode, MemoryMode::ReusableData);
        assert_eq!(config.sender_provider.as_deref(), Some("hyper"));
    }

    #[test]
    fn builder_uses_defaults_when_not_set() {
        let config = ExporterConfig::builder(Signal::Logs).build();

        assert_eq!(config.protocol, Protocol::HttpProtobuf);
        assert!(config.retry_policy.is_some());
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn generic_http_endpoint_gets_signal_path() {
        let config = ExporterConfig::from_lookup(
            Signal::Logs,
            lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318/")]),
        )
        .unwrap();

        assert_eq!(config.resolved_endpoint(), "http://collector:4318/v1/logs");
    }

    #[test]
    fn signal_endpoint_is_used_verbatim() {
        let config = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://generic:4318"),
                ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", "http://traces:9999/custom"),
            ]),
        )
        .unwrap();

        assert_eq!(config.resolved_endpoint(), "http://traces:9999/custom");
    }

    #[test]
    fn grpc_endpoint_is_not_suffixed() {
        let config = ExporterConfig::from_lookup(
            Signal::Metrics,
            lookup(&[
                ("OTEL_EXPORTER_OTLP_PROTOCOL", "grpc"),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
            ]),
        )
        .unwrap();

        assert_eq!(config.protocol, Protocol::Grpc);
        assert_eq!(config.resolved_endpoint(), "http://collector:4317");
    }

    #[test]
    fn env_reads_timeout_compression_and_modes() {
        let config = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[
                ("OTEL_EXPORTER_OTLP_TIMEOUT", "2500"),
                ("OTEL_EXPORTER_OTLP_TRACES_COMPRESSION", "GZIP"),
                ("OTEL_EXPORTER_OTLP_MEMORY_MODE", "reusable_data"),
                ("OTEL_EXPORTER_OTLP_SENDER_PROVIDER", "hyper"),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", "http/json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.compression, "gzip");
        assert_eq!(config.memory_mode, MemoryMode::ReusableData);
        assert_eq!(config.sender_provider.as_deref(), Some("hyper"));
        assert_eq!(config.protocol.payload_format(), PayloadFormat::Json);
    }

    #[test]
    fn env_headers_are_percent_decoded() {
        let config = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[(
                "OTEL_EXPORTER_OTLP_HEADERS",
                "api-key=secret%20value, x-tenant = blue ,",
            )]),
        )
        .unwrap();

        assert_eq!(
            config.headers,
            vec![
                ("api-key".to_string(), "secret value".to_string()),
                ("x-tenant".to_string(), "blue".to_string()),
            ]
        );
        let headers = config.header_map().unwrap();
        assert_eq!(headers["api-key"], "secret value");
    }

    #[test]
    fn malformed_values_are_rejected() {
        let bad_timeout = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[("OTEL_EXPORTER_OTLP_TIMEOUT", "soon")]),
        );
        assert!(matches!(
            bad_timeout,
            Err(ConfigError::InvalidValue { key, .. }) if key == "OTEL_EXPORTER_OTLP_TIMEOUT"
        ));

        let bad_headers = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[("OTEL_EXPORTER_OTLP_HEADERS", "no-separator")]),
        );
        assert!(matches!(bad_headers, Err(ConfigError::InvalidValue { .. })));

        let bad_protocol = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[("OTEL_EXPORTER_OTLP_PROTOCOL", "thrift")]),
        );
        assert!(matches!(bad_protocol, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn invalid_header_names_fail_validation() {
        let config = ExporterConfig::new(Signal::Traces).with_header("bad header", "x");

        assert!(matches!(config.header_map(), Err(ConfigError::InvalidHeader(_))));
    }

    #[test]
    fn signals_parse_and_describe_themselves() {
        assert_eq!("Traces".parse::<Signal>().unwrap(), Signal::Traces);
        assert_eq!("profiles".parse::<Signal>().unwrap(), Signal::Profiles);
        assert!("events".parse::<Signal>().is_err());
        assert_eq!(Signal::Metrics.http_path(), "/v1/metrics");
        assert!(Signal::Logs.grpc_method().ends_with("LogsService/Export"));
    }

    #[test]
    fn proxy_variables_select_a_proxy() {
        let config = ExporterConfig::from_lookup(
            Signal::Traces,
            lookup(&[
                ("HTTPS_PROXY", "http://proxy:3128"),
                ("NO_PROXY", "localhost"),
            ]),
        )
        .unwrap();

        let proxy = config.proxy.unwrap();
        assert_eq!(
            proxy.select(&"https://collector:4318".parse().unwrap()),
            Some("http://proxy:3128/".parse().unwrap())
        );
        assert!(proxy.select(&"https://localhost:4318".parse().unwrap()).is_none());
    }

    #[test]
    fn no_proxy_variables_connect_directly() {
        let config = ExporterConfig::from_lookup(Signal::Traces, lookup(&[])).unwrap();

        assert!(config.proxy.is_none());
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _guard = EnvGuard::new(&["OTEL_EXPORTER_OTLP_PROFILES_ENDPOINT"]);
        env::set_var("OTEL_EXPORTER_OTLP_PROFILES_ENDPOINT", "http://profiles:4318/p");

        let config = ExporterConfig::from_env(Signal::Profiles).unwrap();

        assert_eq!(config.resolved_endpoint(), "http://profiles:4318/p");
    }

    #[test]
    fn log_config_from_env_reads_format() {
        let _guard = EnvGuard::new(&["LOG_FORMAT"]);
        env::set_var("LOG_FORMAT", "json");

        assert_eq!(LogConfig::from_env().log_format, LogFormat::Json);
    }
}
