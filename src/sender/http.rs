//! Plain HTTP export: one POST of the serialized payload per attempt.

use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ::http::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use ::http::{HeaderMap, Method, Request, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::completion::CompletionHandle;
use crate::compression::Compressor;
use crate::error::{ConfigError, TransportError};
use crate::marshal::{MessageWriter, PayloadFormat};
use crate::retry::{self, RetryPolicy};
use crate::sender::client::{self, HttpClient, Negotiation};
use crate::sender::{
    compress_payload, validate_endpoint, write_payload, Delivery, HeadersSupplier, OnError,
    OnResponse, Sender, SenderConfig, SenderCore,
};

/// HTTP statuses worth another attempt.
pub const RETRYABLE_STATUS_CODES: [u16; 4] = [429, 502, 503, 504];

pub type AuthFuture<'a> = Pin<Box<dyn Future<Output = Result<HeaderMap, TransportError>> + Send + 'a>>;

/// Supplies credentials after the collector answered `401 Unauthorized`.
///
/// The returned headers are added to a single re-issued request. Implementations
/// must not hand back the credentials that were just rejected.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self) -> AuthFuture<'_>;
}

impl<F> Authenticator for F
where
    F: Fn() -> Result<HeaderMap, TransportError> + Send + Sync,
{
    fn authenticate(&self) -> AuthFuture<'_> {
        Box::pin(future::ready(self()))
    }
}

#[derive(Clone)]
pub struct HttpSenderConfig {
    pub common: SenderConfig,
    pub content_type: String,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl HttpSenderConfig {
    pub fn new(common: SenderConfig) -> Self {
        Self {
            common,
            content_type: PayloadFormat::Binary.content_type().to_string(),
            authenticator: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
}

impl std::fmt::Debug for HttpSenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSenderConfig")
            .field("common", &self.common)
            .field("content_type", &self.content_type)
            .field("authenticator", &self.authenticator.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_message: String,
    pub response_body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

struct Call {
    uri: Uri,
    timeout: Duration,
    content_type: String,
    headers: Option<HeadersSupplier>,
    compressor: Option<Arc<dyn Compressor>>,
    retry_policy: Option<RetryPolicy>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Call {
    fn request(&self, body: &Bytes, extra: Option<&HeaderMap>) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, self.content_type.as_str())
            .header(USER_AGENT, crate::sender::USER_AGENT);
        if let Some(compressor) = &self.compressor {
            builder = builder.header(CONTENT_ENCODING, compressor.encoding());
        }
        let mut request = builder
            .body(Full::new(body.clone()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        if let Some(supplier) = &self.headers {
            request.headers_mut().extend(supplier());
        }
        if let Some(extra) = extra {
            request.headers_mut().extend(extra.clone());
        }
        Ok(request)
    }

    async fn exchange(
        &self,
        client: &HttpClient,
        body: &Bytes,
        extra: Option<&HeaderMap>,
    ) -> Result<HttpResponse, TransportError> {
        let request = self.request(body, extra)?;
        let response = client.request(request).await.map_err(|e| client::classify(&e))?;
        let status = response.status();
        let response_body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Io(format!("failed to read response body: {e}")))?
            .to_bytes();
        Ok(HttpResponse {
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            response_body,
        })
    }

    async fn attempt(&self, client: &HttpClient, body: &Bytes) -> Result<HttpResponse, TransportError> {
        let exchange = async {
            let response = self.exchange(client, body, None).await?;
            match &self.authenticator {
                Some(authenticator) if response.status_code == StatusCode::UNAUTHORIZED.as_u16() => {
                    debug!("Collector requested authentication, re-issuing request");
                    let credentials = authenticator.authenticate().await?;
                    self.exchange(client, body, Some(&credentials)).await
                }
                _ => Ok(response),
            }
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }

    async fn execute(
        self: Arc<Self>,
        client: HttpClient,
        cancel: CancellationToken,
        writer: Arc<dyn MessageWriter>,
    ) -> Result<HttpResponse, TransportError> {
        // encoded once, replayed by every attempt
        let body = encode_body(writer.as_ref(), self.compressor.as_deref())?;
        drop(writer);
        retry::execute(
            self.retry_policy.as_ref(),
            &cancel,
            |_| self.attempt(&client, &body),
            |response| RETRYABLE_STATUS_CODES.contains(&response.status_code),
        )
        .await
    }
}

fn encode_body(
    writer: &dyn MessageWriter,
    compressor: Option<&dyn Compressor>,
) -> Result<Bytes, TransportError> {
    match compressor {
        Some(compressor) => compress_payload(writer, compressor).map(Bytes::from),
        None => {
            let mut body = Vec::with_capacity(writer.content_length().unwrap_or(0));
            write_payload(writer, &mut body)?;
            Ok(body.into())
        }
    }
}

/// A [`Sender`] posting payloads over HTTP/1.1 through a pooled hyper client.
pub struct HttpSender {
    core: SenderCore,
    call: Arc<Call>,
}

impl HttpSender {
    pub fn new(config: HttpSenderConfig) -> Result<Self, ConfigError> {
        let HttpSenderConfig {
            common,
            content_type,
            authenticator,
        } = config;
        validate_endpoint(&common.endpoint)?;
        let core = SenderCore::new("http", &common, Negotiation::Http1)?;
        debug!(uri = %common.endpoint, "Created HTTP sender");
        Ok(Self {
            core,
            call: Arc::new(Call {
                uri: common.endpoint,
                timeout: common.timeout,
                content_type,
                headers: common.headers,
                compressor: common.compressor,
                retry_policy: common.retry_policy,
                authenticator,
            }),
        })
    }
}

impl Sender for HttpSender {
    type Response = HttpResponse;

    fn send(
        &self,
        writer: Arc<dyn MessageWriter>,
        on_response: OnResponse<HttpResponse>,
        on_error: OnError,
    ) {
        let delivery = Delivery::new(on_response, on_error).retaining(writer.clone());
        let call = self.call.clone();
        self.core
            .dispatch(delivery, move |client, cancel| call.execute(client, cancel, writer));
    }

    fn shutdown(&self) -> CompletionHandle {
        self.core.shutdown()
    }
}
