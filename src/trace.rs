use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogConfig, LogFormat};

/// JSON line formatter with `severity` at root level, as cloud log agents expect
struct JsonFormat;

impl<S, N> FormatEvent<S, N> for JsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        use std::fmt::Write;

        let severity = match *event.metadata().level() {
            tracing::Level::ERROR => "ERROR",
            tracing::Level::WARN => "WARNING",
            tracing::Level::INFO => "INFO",
            tracing::Level::DEBUG => "DEBUG",
            tracing::Level::TRACE => "DEBUG",
        };

        write!(writer, r#"{{"severity":"{}""#, severity)?;

        write!(
            writer,
            r#","timestamp":"{}""#,
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        )?;

        let target = serde_json::to_string(event.metadata().target()).map_err(|_| std::fmt::Error)?;
        write!(writer, r#","target":{}"#, target)?;

        if let Some(span) = ctx.lookup_current() {
            let ext = span.extensions();
            if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                let name = serde_json::to_string(span.name()).map_err(|_| std::fmt::Error)?;
                let fields = serde_json::to_string(fields.as_str()).map_err(|_| std::fmt::Error)?;
                write!(writer, r#","span":{{"name":{},"fields":{}}}"#, name, fields)?;
            }
        }

        let mut visitor = serde_json::Map::new();
        event.record(&mut JsonVisitor(&mut visitor));

        for (key, value) in visitor.iter() {
            let key = serde_json::to_string(key).map_err(|_| std::fmt::Error)?;
            let json_str = serde_json::to_string(value).map_err(|_| std::fmt::Error)?;
            write!(writer, r#",{}:{}"#, key, json_str)?;
        }

        writeln!(writer, "}}")
    }
}

/// Visitor to collect event fields into a JSON map
struct JsonVisitor<'a>(&'a mut serde_json::Map<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(
            field.name().to_string(),
            serde_json::Value::String(format!("{:?}", value)),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0
            .insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

/// Build the JSON fmt layer for structured logging (cloud environments)
pub fn build_json_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .event_format(JsonFormat)
        .with_ansi(false)
}

/// Build the pretty fmt layer for human-readable output (local dev)
pub fn build_pretty_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .pretty()
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
}

/// Build the env filter from config
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = build_filter(config);

    match config.log_format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(build_pretty_layer())
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(build_json_layer())
            .try_init(),
    }
}
