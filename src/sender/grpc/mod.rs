//! Unary gRPC over HTTP/2.
//!
//! The request message is framed once per logical call and the same frame is
//! replayed on every retry. Status is read from the response headers first
//! (trailers-only responses), then from the trailers, and finally derived from
//! the HTTP status when the server never produced one.

pub mod framing;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use ::http::header::{CONTENT_TYPE, TE, USER_AGENT};
use ::http::response::Parts;
use ::http::{HeaderValue, Method, Request, StatusCode, Uri, Version};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::debug;

use crate::completion::CompletionHandle;
use crate::compression::Compressor;
use crate::error::{ConfigError, TransportError};
use crate::marshal::MessageWriter;
use crate::retry::{self, RetryPolicy};
use crate::sender::client::{self, HttpClient, Negotiation};
use crate::sender::{
    validate_endpoint, Delivery, HeadersSupplier, OnError, OnResponse, Sender, SenderConfig,
    SenderCore,
};

use self::status::{code_from_http, read_status, DEFAULT_RETRYABLE_CODES};

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";
const GRPC_TIMEOUT: &str = "grpc-timeout";
const GRPC_ENCODING: &str = "grpc-encoding";

#[derive(Debug, Clone)]
pub struct GrpcSenderConfig {
    pub common: SenderConfig,
    /// `package.Service/Method`, appended to the endpoint path.
    pub full_method_name: String,
    /// Statuses retried when they arrive on an HTTP-success response.
    pub retryable_codes: Vec<Code>,
}

impl GrpcSenderConfig {
    pub fn new(common: SenderConfig, full_method_name: impl Into<String>) -> Self {
        Self {
            common,
            full_method_name: full_method_name.into(),
            retryable_codes: DEFAULT_RETRYABLE_CODES.to_vec(),
        }
    }

    pub fn with_retryable_codes(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.retryable_codes = codes.into_iter().collect();
        self
    }
}

/// The outcome of a completed unary call, successful or not.
#[derive(Debug, Clone)]
pub struct GrpcResponse {
    pub status_code: Code,
    pub status_description: Option<String>,
    /// The response message with its frame header removed on success, the raw
    /// body otherwise.
    pub response_message: Bytes,
    pub http_status: StatusCode,
}

impl GrpcResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == Code::Ok
    }
}

/// Format a deadline the way `grpc-timeout` expects: at most eight digits and a unit.
fn grpc_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;
    let millis = timeout.as_millis();
    if millis <= MAX {
        return format!("{millis}m");
    }
    format!("{}S", timeout.as_secs().min(MAX as u64))
}

/// Per-call state shared by all attempts of one sender.
struct Call {
    uri: Uri,
    timeout: Duration,
    headers: Option<HeadersSupplier>,
    compressor: Option<Arc<dyn Compressor>>,
    retry_policy: Option<RetryPolicy>,
    retryable_codes: Vec<Code>,
}

impl Call {
    fn is_retryable(&self, response: &GrpcResponse) -> bool {
        response.http_status.is_success() && self.retryable_codes.contains(&response.status_code)
    }

    fn request(&self, frame: &Bytes) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .version(Version::HTTP_2)
            .header(CONTENT_TYPE, GRPC_CONTENT_TYPE)
            .header(TE, "trailers")
            .header(USER_AGENT, crate::sender::USER_AGENT)
            .header(GRPC_TIMEOUT, grpc_timeout(self.timeout));
        if let Some(compressor) = &self.compressor {
            builder = builder.header(GRPC_ENCODING, compressor.encoding());
        }
        let mut request = builder
            .body(Full::new(frame.clone()))
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        if let Some(supplier) = &self.headers {
            request.headers_mut().extend(supplier());
        }
        Ok(request)
    }

    async fn attempt(&self, client: &HttpClient, frame: &Bytes) -> Result<GrpcResponse, TransportError> {
        let request = self.request(frame)?;
        let exchange = async {
            let response = client.request(request).await.map_err(|e| client::classify(&e))?;
            let (parts, body) = response.into_parts();
            let collected = body.collect().await;
            let (body, trailers) = match collected {
                Ok(collected) => {
                    let trailers = collected.trailers().cloned();
                    (collected.to_bytes(), trailers)
                }
                Err(err) => {
                    // status then falls back to the headers or the HTTP status
                    debug!(error = %err, "Failed to read gRPC response body");
                    (Bytes::new(), None)
                }
            };
            Ok::<_, TransportError>(into_response(parts, body, trailers.as_ref()))
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
    ) -> Result<GrpcResponse, TransportError> {
        let frame = framing::encode(writer.as_ref(), self.compressor.as_deref())?;
        drop(writer);
        retry::execute(
            self.retry_policy.as_ref(),
            &cancel,
            |_| self.attempt(&client, &frame),
            |response| self.is_retryable(response),
        )
        .await
    }
}

fn into_response(
    parts: Parts,
    body: Bytes,
    trailers: Option<&::http::HeaderMap>,
) -> GrpcResponse {
    let http_status = parts.status;
    let status = read_status(&parts.headers).or_else(|| trailers.and_then(read_status));
    let (status_code, status_description) = match status {
        Some(status) => status,
        None if http_status.is_success() => (
            Code::Unknown,
            Some("response carried no grpc-status".to_string()),
        ),
        None => (
            code_from_http(http_status),
            Some(format!("HTTP status {http_status}")),
        ),
    };
    let response_message = if status_code == Code::Ok {
        match framing::decode(body.clone()) {
            Ok(frame) => frame.map(|frame| frame.message).unwrap_or_default(),
            Err(err) => {
                // the call completed; hand the body over as received
                debug!(error = %err, "Unframed gRPC response message");
                body
            }
        }
    } else {
        body
    };
    GrpcResponse {
        status_code,
        status_description,
        response_message,
        http_status,
    }
}

/// A [`Sender`] issuing unary gRPC calls through a pooled hyper client.
pub struct GrpcSender {
    core: SenderCore,
    call: Arc<Call>,
}

impl GrpcSender {
    pub fn new(config: GrpcSenderConfig) -> Result<Self, ConfigError> {
        let GrpcSenderConfig {
            common,
            full_method_name,
            retryable_codes,
        } = config;
        validate_endpoint(&common.endpoint)?;
        let base = common.endpoint.to_string();
        let target = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            full_method_name.trim_start_matches('/')
        );
        let uri = target.parse::<Uri>().map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: target.clone(),
            reason: e.to_string(),
        })?;
        let core = SenderCore::new("grpc", &common, Negotiation::Http2Only)?;
        debug!(uri = %uri, "Created gRPC sender");
        Ok(Self {
            core,
            call: Arc::new(Call {
                uri,
                timeout: common.timeout,
                headers: common.headers,
                compressor: common.compressor,
                retry_policy: common.retry_policy,
                retryable_codes,
            }),
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.call.uri
    }
}

impl Sender for GrpcSender {
    type Response = GrpcResponse;

    fn send(
        &self,
        writer: Arc<dyn MessageWriter>,
        on_response: OnResponse<GrpcResponse>,
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
