//! The public export entry point.
//!
//! An [`Exporter`] turns one batch into a payload according to its
//! [`MemoryMode`], hands it to the sender resolved at build time and returns a
//! [`CompletionHandle`] that resolves when the sender reports back.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Uri};
use tokio::runtime::Handle;
use tonic::Code;
use tracing::{debug, info, warn};

use crate::completion::{CompletionHandle, Completer, ExportResult};
use crate::compression::CompressorRegistry;
use crate::config::{ExporterConfig, MemoryMode, Signal};
use crate::error::{ConfigError, ExportError, TransportError};
use crate::marshal::{
    EncodedPayloadFactory, MarshalerFactory, MarshalerWriter, MessageWriter, PayloadFormat,
    ReusableMarshaler,
};
use crate::pool::MarshalerPool;
use crate::sender::registry::{GrpcTransport, HttpTransport};
use crate::sender::{
    Authenticator, GrpcResponse, GrpcSenderConfig, HeadersSupplier, HttpResponse,
    HttpSenderConfig, OnError, SenderConfig, SenderRegistry,
};

/// Exporter for payloads encoded ahead of time.
pub type PayloadExporter = Exporter<[u8], EncodedPayloadFactory>;

/// The sender behind an exporter, by protocol family.
#[derive(Clone)]
pub enum Transport {
    Grpc(GrpcTransport),
    Http(HttpTransport),
}

impl Transport {
    fn send(&self, signal: Signal, writer: Arc<dyn MessageWriter>, completer: Completer) {
        let failed = completer.clone();
        let on_error: OnError = Box::new(move |err: TransportError| {
            failed.complete(Err(execution_failure(signal, err)));
        });
        match self {
            Self::Grpc(sender) => sender.send(
                writer,
                Box::new(move |response: GrpcResponse| {
                    completer.complete(grpc_outcome(signal, response));
                }),
                on_error,
            ),
            Self::Http(sender) => sender.send(
                writer,
                Box::new(move |response: HttpResponse| {
                    completer.complete(http_outcome(signal, response));
                }),
                on_error,
            ),
        }
    }

    fn shutdown(&self) -> CompletionHandle {
        match self {
            Self::Grpc(sender) => sender.shutdown(),
            Self::Http(sender) => sender.shutdown(),
        }
    }
}

fn grpc_outcome(signal: Signal, response: GrpcResponse) -> ExportResult {
    if response.is_success() {
        return Ok(());
    }
    let code = response.status_code;
    let message = response.status_description.unwrap_or_default();
    match code {
        Code::Unimplemented => warn!(
            signal = %signal,
            status_message = %message,
            "Failed to export {signal}. Server responded with UNIMPLEMENTED. \
             This usually means that the collector has no OTLP receiver enabled for this signal."
        ),
        Code::Unavailable => warn!(
            signal = %signal,
            status_message = %message,
            "Failed to export {signal}. Server is UNAVAILABLE. \
             Make sure the collector is running and reachable from this network."
        ),
        _ => warn!(
            signal = %signal,
            code = ?code,
            status_message = %message,
            "Failed to export {signal}. Server responded with gRPC status {}",
            code.description()
        ),
    }
    Err(ExportError::GrpcStatus { code, message })
}

fn http_outcome(signal: Signal, response: HttpResponse) -> ExportResult {
    if response.is_success() {
        return Ok(());
    }
    let body = String::from_utf8_lossy(&response.response_body);
    let message = if body.trim().is_empty() {
        response.status_message
    } else {
        format!("{}: {}", response.status_message, body.trim())
    };
    warn!(
        signal = %signal,
        status = response.status_code,
        status_message = %message,
        "Failed to export {signal}. Server responded with HTTP status {}",
        response.status_code
    );
    Err(ExportError::HttpStatus {
        status: response.status_code,
        message,
    })
}

fn execution_failure(signal: Signal, err: TransportError) -> ExportError {
    match err {
        TransportError::Shutdown => {
            debug!(signal = %signal, "Export rejected, sender is shut down");
            ExportError::Shutdown
        }
        err => {
            warn!(
                signal = %signal,
                error = %err,
                "Failed to export {signal}. The request could not be executed"
            );
            ExportError::Transport(err)
        }
    }
}

/// Builds an [`Exporter`] from an [`ExporterConfig`], resolving the
/// compressor and sender provider by name.
pub struct ExporterBuilder<B: ?Sized, F> {
    config: ExporterConfig,
    factory: F,
    senders: SenderRegistry,
    compressors: CompressorRegistry,
    headers: Option<HeadersSupplier>,
    authenticator: Option<Arc<dyn Authenticator>>,
    retryable_codes: Option<Vec<Code>>,
    runtime: Option<Handle>,
    _batch: PhantomData<fn(&B)>,
}

impl<B: ?Sized, F: MarshalerFactory<B>> ExporterBuilder<B, F> {
    pub fn new(config: ExporterConfig, factory: F) -> Self {
        Self {
            config,
            factory,
            senders: SenderRegistry::default(),
            compressors: CompressorRegistry::default(),
            headers: None,
            authenticator: None,
            retryable_codes: None,
            runtime: None,
            _batch: PhantomData,
        }
    }

    pub fn with_sender_registry(mut self, registry: SenderRegistry) -> Self {
        self.senders = registry;
        self
    }

    pub fn with_compressor_registry(mut self, registry: CompressorRegistry) -> Self {
        self.compressors = registry;
        self
    }

    /// Dynamic headers, merged over the configured static ones on every request.
    pub fn with_headers<H>(mut self, supplier: H) -> Self
    where
        H: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.headers = Some(Arc::new(supplier));
        self
    }

    /// Only used by HTTP senders.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Only used by gRPC senders.
    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.retryable_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Exporter<B, F>, ConfigError> {
        let config = self.config;
        let compressor = self.compressors.resolve(&config.compression)?;
        let endpoint = config.resolved_endpoint();
        let uri = endpoint.parse::<Uri>().map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        let static_headers = config.header_map()?;
        let dynamic = self.headers;
        let mut common = SenderConfig::new(uri)
            .with_timeout(config.timeout)
            .with_connect_timeout(config.connect_timeout)
            .with_headers(move || {
                let mut headers = static_headers.clone();
                if let Some(dynamic) = &dynamic {
                    headers.extend(dynamic());
                }
                headers
            });
        common.compressor = compressor;
        common.retry_policy = config.retry_policy.clone();
        common.tls = config.tls.clone();
        common.proxy = config.proxy.clone();
        common.runtime = self.runtime;

        let provider = config.sender_provider.as_deref();
        let format = config.protocol.payload_format();
        let transport = if config.protocol.is_grpc() {
            let mut grpc = GrpcSenderConfig::new(common, config.signal.grpc_method());
            if let Some(codes) = self.retryable_codes {
                grpc = grpc.with_retryable_codes(codes);
            }
            Transport::Grpc(self.senders.grpc_provider(provider)?.create_grpc_sender(grpc)?)
        } else {
            let mut http = HttpSenderConfig::new(common).with_content_type(format.content_type());
            http.authenticator = self.authenticator;
            Transport::Http(self.senders.http_provider(provider)?.create_http_sender(http)?)
        };

        info!(
            signal = %config.signal,
            protocol = config.protocol.as_str(),
            endpoint = %endpoint,
            compression = %config.compression,
            memory_mode = ?config.memory_mode,
            "Built OTLP exporter"
        );

        Ok(Exporter {
            signal: config.signal,
            memory_mode: config.memory_mode,
            format,
            transport,
            factory: self.factory,
            pool: MarshalerPool::new(),
            is_shutdown: AtomicBool::new(false),
            _batch: PhantomData,
        })
    }
}

/// Exports batches of `B` through one sender.
///
/// With [`MemoryMode::ReusableData`] marshalers come from a pool owned by the
/// exporter, and callers must not mutate the batch data they wrapped while an
/// export is being serialized. With [`MemoryMode::ImmutableData`] every call
/// gets its own marshaler and calls may overlap freely.
pub struct Exporter<B: ?Sized, F: MarshalerFactory<B>> {
    signal: Signal,
    memory_mode: MemoryMode,
    format: PayloadFormat,
    transport: Transport,
    factory: F,
    pool: MarshalerPool<F::Reusable>,
    is_shutdown: AtomicBool,
    _batch: PhantomData<fn(&B)>,
}

impl<B: ?Sized, F: MarshalerFactory<B>> Exporter<B, F> {
    pub fn builder(config: ExporterConfig, factory: F) -> ExporterBuilder<B, F> {
        ExporterBuilder::new(config, factory)
    }

    /// Export from explicit parts, bypassing the registries.
    pub fn from_parts(
        signal: Signal,
        memory_mode: MemoryMode,
        format: PayloadFormat,
        transport: Transport,
        factory: F,
    ) -> Self {
        Self {
            signal,
            memory_mode,
            format,
            transport,
            factory,
            pool: MarshalerPool::new(),
            is_shutdown: AtomicBool::new(false),
            _batch: PhantomData,
        }
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.memory_mode
    }

    /// Serialize `batch` and send it. Never blocks on the network.
    pub fn export(&self, batch: &B) -> CompletionHandle {
        if self.is_shutdown.load(Ordering::Acquire) {
            return CompletionHandle::failure(ExportError::Shutdown);
        }

        let writer: Arc<dyn MessageWriter> = match self.memory_mode {
            MemoryMode::ReusableData => {
                let mut marshaler = self.pool.acquire(|| self.factory.create_reusable());
                marshaler.initialize(batch);
                Arc::new(MarshalerWriter::new(marshaler, self.format))
            }
            MemoryMode::ImmutableData => {
                Arc::new(MarshalerWriter::new(self.factory.create(batch), self.format))
            }
        };

        let (completer, handle) = CompletionHandle::pending();
        self.transport.send(self.signal, writer, completer);
        handle
    }

    /// Nothing is buffered here, so there is never anything to flush.
    pub fn flush(&self) -> CompletionHandle {
        CompletionHandle::success()
    }

    pub fn shutdown(&self) -> CompletionHandle {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            info!(signal = %self.signal, "Calling shutdown() multiple times.");
            return CompletionHandle::success();
        }
        self.pool.clear();
        self.transport.shutdown()
    }

    /// Idle pooled marshalers.
    pub fn pooled_marshalers(&self) -> usize {
        self.pool.idle()
    }

    /// Marshalers the pool has allocated so far.
    pub fn allocated_marshalers(&self) -> usize {
        self.pool.created()
    }
}

impl<B: ?Sized, F: MarshalerFactory<B>> fmt::Debug for Exporter<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("signal", &self.signal)
            .field("memory_mode", &self.memory_mode)
            .field("format", &self.format)
            .field("pool", &self.pool)
            .field("is_shutdown", &self.is_shutdown.load(Ordering::Relaxed))
            .finish()
    }
}
