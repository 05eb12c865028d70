//! Transport-specific executors of one logical request/response exchange.
//!
//! A [`Sender`] never blocks the caller: [`Sender::send`] hands the exchange to
//! a tokio task and reports the outcome through exactly one of two callbacks.
//! Completed calls, including ones with a failing status, go to `on_response`.
//! Calls that could not be executed at all go to `on_error`.
//!
//! # Module Structure
//!
//! - [`grpc`]: unary gRPC over HTTP/2 with length-prefixed framing
//! - [`http`]: plain HTTP POST of the payload
//! - [`proxy`]: proxy selection and `CONNECT` tunneling
//! - [`registry`]: name-keyed providers that build senders from a config

pub mod grpc;
pub mod http;
pub mod proxy;
pub mod registry;
pub mod tls;

pub(crate) mod client;

use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::http::{HeaderMap, Uri};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::completion::CompletionHandle;
use crate::compression::{self, Compressor};
use crate::error::{ConfigError, TransportError};
use crate::marshal::MessageWriter;
use crate::retry::RetryPolicy;

use self::client::{HttpClient, Negotiation};

pub use self::grpc::{GrpcResponse, GrpcSender, GrpcSenderConfig};
pub use self::http::{AuthFuture, Authenticator, HttpResponse, HttpSender, HttpSenderConfig};
pub use self::proxy::ProxySelector;
pub use self::registry::{GrpcSenderProvider, HttpSenderProvider, HyperSenderProvider, SenderRegistry};
pub use self::tls::TlsConfig;

pub const USER_AGENT: &str = concat!("otlp-transport/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type OnResponse<R> = Box<dyn FnOnce(R) + Send>;
pub type OnError = Box<dyn FnOnce(TransportError) + Send>;

/// Produces the extra headers of each request; invoked once per request.
pub type HeadersSupplier = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

pub trait Sender: Send + Sync {
    type Response: Send + 'static;

    fn send(
        &self,
        writer: Arc<dyn MessageWriter>,
        on_response: OnResponse<Self::Response>,
        on_error: OnError,
    );

    /// Cancel in-flight work and release connections. Idempotent and non-blocking.
    fn shutdown(&self) -> CompletionHandle;
}

/// Settings shared by every sender family.
#[derive(Clone)]
pub struct SenderConfig {
    pub endpoint: Uri,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub headers: Option<HeadersSupplier>,
    pub compressor: Option<Arc<dyn Compressor>>,
    pub retry_policy: Option<RetryPolicy>,
    pub tls: Option<TlsConfig>,
    /// `None` connects directly.
    pub proxy: Option<ProxySelector>,
    /// Runtime that executes requests; defaults to the one current at build time.
    pub runtime: Option<Handle>,
}

impl SenderConfig {
    pub fn new(endpoint: Uri) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            headers: None,
            compressor: None,
            retry_policy: None,
            tls: None,
            proxy: None,
            runtime: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_headers<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.headers = Some(Arc::new(supplier));
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
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

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub(crate) fn supplied_headers(&self) -> HeaderMap {
        self.headers.as_ref().map(|supplier| supplier()).unwrap_or_default()
    }
}

impl fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderConfig")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("headers", &self.headers.as_ref().map(|_| "supplier"))
            .field("compressor", &self.compressor.as_ref().map(|c| c.encoding().to_string()))
            .field("retry_policy", &self.retry_policy)
            .field("tls", &self.tls)
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// Reject endpoints the hyper client cannot dial.
pub(crate) fn validate_endpoint(endpoint: &Uri) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };
    match endpoint.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("scheme must be http or https")),
    }
    if endpoint.host().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Holds both callbacks of one `send` and fires exactly one of them.
///
/// A retained payload stays alive until the outcome is known and is released
/// just before the callback runs, so a pooled marshaler is back in its pool by
/// the time the caller observes completion.
///
/// Dropping an unfired delivery (for example when its task is aborted with the
/// runtime) reports [`TransportError::Cancelled`].
pub(crate) struct Delivery<R> {
    on_response: Option<OnResponse<R>>,
    on_error: Option<OnError>,
    payload: Option<Arc<dyn MessageWriter>>,
}

impl<R> Delivery<R> {
    pub(crate) fn new(on_response: OnResponse<R>, on_error: OnError) -> Self {
        Self {
            on_response: Some(on_response),
            on_error: Some(on_error),
            payload: None,
        }
    }

    /// Keep `payload` alive for the whole exchange.
    pub(crate) fn retaining(mut self, payload: Arc<dyn MessageWriter>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub(crate) fn finish(mut self, result: Result<R, TransportError>) {
        self.payload = None;
        let on_response = self.on_response.take();
        let on_error = self.on_error.take();
        match (result, on_response, on_error) {
            (Ok(response), Some(on_response), _) => on_response(response),
            (Err(err), _, Some(on_error)) => on_error(err),
            _ => {}
        }
    }
}

impl<R> Drop for Delivery<R> {
    fn drop(&mut self) {
        self.payload = None;
        self.on_response = None;
        if let Some(on_error) = self.on_error.take() {
            on_error(TransportError::Cancelled);
        }
    }
}

/// Serialize a payload, turning panics inside the writer into errors.
pub(crate) fn write_payload(
    writer: &dyn MessageWriter,
    sink: &mut dyn io::Write,
) -> Result<(), TransportError> {
    match panic::catch_unwind(AssertUnwindSafe(|| writer.write_message(sink))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(TransportError::Marshal(err.to_string())),
        Err(_) => Err(TransportError::Marshal(
            "payload writer panicked".to_string(),
        )),
    }
}

/// Serialize a payload through `compressor` into memory.
pub(crate) fn compress_payload(
    writer: &dyn MessageWriter,
    compressor: &dyn Compressor,
) -> Result<Vec<u8>, TransportError> {
    let mut failure = None;
    let compressed = compression::compress_to_vec(compressor, |sink| {
        write_payload(writer, sink).map_err(|err| {
            let message = err.to_string();
            failure = Some(err);
            io::Error::other(message)
        })
    });
    match (compressed, failure) {
        (Ok(compressed), _) => Ok(compressed),
        (Err(_), Some(err)) => Err(err),
        (Err(err), None) => Err(TransportError::Marshal(format!("compression failed: {err}"))),
    }
}

/// Runtime, connection pool and cancellation shared by the hyper-based senders.
pub(crate) struct SenderCore {
    name: &'static str,
    runtime: Handle,
    cancel: CancellationToken,
    shutdown: AtomicBool,
    client: Mutex<Option<HttpClient>>,
}

impl SenderCore {
    pub(crate) fn new(
        name: &'static str,
        config: &SenderConfig,
        negotiation: Negotiation,
    ) -> Result<Self, ConfigError> {
        let runtime = match &config.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };
        let client = client::build_client(config, negotiation)?;
        Ok(Self {
            name,
            runtime,
            cancel: CancellationToken::new(),
            shutdown: AtomicBool::new(false),
            client: Mutex::new(Some(client)),
        })
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run `exchange` on the sender's runtime and deliver its outcome.
    pub(crate) fn dispatch<R, F, Fut>(&self, delivery: Delivery<R>, exchange: F)
    where
        R: Send + 'static,
        F: FnOnce(HttpClient, CancellationToken) -> Fut,
        Fut: Future<Output = Result<R, TransportError>> + Send + 'static,
    {
        let client = match self.client.lock().clone() {
            Some(client) if !self.is_shutdown() => client,
            _ => {
                delivery.finish(Err(TransportError::Shutdown));
                return;
            }
        };
        let exchange = exchange(client, self.cancel.clone());
        self.runtime.spawn(async move {
            let result = exchange.await;
            delivery.finish(result);
        });
    }

    pub(crate) fn shutdown(&self) -> CompletionHandle {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            debug!(sender = self.name, "Sender already shut down");
            return CompletionHandle::success();
        }
        info!(sender = self.name, "Shutting down sender");
        self.cancel.cancel();
        // dropping the client releases idle pooled connections
        self.client.lock().take();
        CompletionHandle::success()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct PanickingWriter;

    impl MessageWriter for PanickingWriter {
        fn write_message(&self, _sink: &mut dyn io::Write) -> io::Result<()> {
            panic!("bad payload");
        }

        fn content_length(&self) -> Option<usize> {
            Some(1)
        }
    }

    fn counting_delivery(
        responses: &Arc<AtomicUsize>,
        errors: &Arc<Mutex<Vec<TransportError>>>,
    ) -> Delivery<u32> {
        let responses = responses.clone();
        let errors = errors.clone();
        Delivery::new(
            Box::new(move |_| {
                responses.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |err| errors.lock().push(err)),
        )
    }

    #[test]
    fn delivery_fires_response_once() {
        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        counting_delivery(&responses, &errors).finish(Ok(7));

        assert_eq!(responses.load(Ordering::SeqCst), 1);
        assert!(errors.lock().is_empty());
    }

    #[test]
    fn dropped_delivery_reports_cancellation() {
        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        drop(counting_delivery(&responses, &errors));

        assert_eq!(responses.load(Ordering::SeqCst), 0);
        assert_eq!(*errors.lock(), vec![TransportError::Cancelled]);
    }

    #[test]
    fn delivery_error_fires_once() {
        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        counting_delivery(&responses, &errors).finish(Err(TransportError::Shutdown));

        assert_eq!(*errors.lock(), vec![TransportError::Shutdown]);
        assert_eq!(responses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn retained_payload_is_released_before_the_callback() {
        let payload = testing::payload(b"batch", crate::marshal::PayloadFormat::Binary);
        let observed = payload.clone();
        let holders = Arc::new(AtomicUsize::new(0));
        let seen = holders.clone();

        let delivery: Delivery<u32> = Delivery::new(
            Box::new(move |_| seen.store(Arc::strong_count(&observed), Ordering::SeqCst)),
            Box::new(|_| {}),
        )
        .retaining(payload.clone());
        drop(payload);
        delivery.finish(Ok(1));

        // only the callback's own handle remains
        assert_eq!(holders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_delivery_releases_retained_payload() {
        let payload = testing::payload(b"batch", crate::marshal::PayloadFormat::Binary);
        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let delivery = counting_delivery(&responses, &errors).retaining(payload.clone());
        assert_eq!(Arc::strong_count(&payload), 2);
        drop(delivery);

        assert_eq!(Arc::strong_count(&payload), 1);
        assert_eq!(*errors.lock(), vec![TransportError::Cancelled]);
    }

    #[test]
    fn writer_panic_becomes_marshal_error() {
        let result = write_payload(&PanickingWriter, &mut Vec::new());

        assert!(matches!(result, Err(TransportError::Marshal(_))));
    }

    #[test]
    fn headers_supplier_is_invoked_per_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let config = SenderConfig::new(Uri::from_static("http://localhost:4318"))
            .with_headers(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let mut headers = HeaderMap::new();
                headers.insert("x-call", n.to_string().parse().unwrap());
                headers
            });

        assert_eq!(config.supplied_headers()["x-call"], "0");
        assert_eq!(config.supplied_headers()["x-call"], "1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn endpoints_need_scheme_and_host() {
        assert!(validate_endpoint(&Uri::from_static("http://localhost:4318/v1/traces")).is_ok());
        assert!(validate_endpoint(&Uri::from_static("https://collector:4317")).is_ok());
        assert!(matches!(
            validate_endpoint(&Uri::from_static("/v1/traces")),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            validate_endpoint(&Uri::from_static("ftp://collector:21")),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn core_requires_a_runtime() {
        let config = SenderConfig::new(Uri::from_static("http://localhost:4318"));

        assert!(matches!(
            SenderCore::new("test", &config, Negotiation::Http1),
            Err(ConfigError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn core_rejects_work_after_shutdown() {
        let config = SenderConfig::new(Uri::from_static("http://localhost:4318"));
        let core = SenderCore::new("test", &config, Negotiation::Http1).unwrap();
        let responses = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(Vec::new()));

        assert!(core.shutdown().await.is_ok());
        assert!(core.shutdown().await.is_ok());
        core.dispatch(counting_delivery(&responses, &errors), |_, _| async { Ok(1) });

        assert_eq!(*errors.lock(), vec![TransportError::Shutdown]);
        assert_eq!(responses.load(Ordering::SeqCst), 0);
    }
}
