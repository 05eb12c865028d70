//! Name-keyed sender providers.
//!
//! Exporters never construct a concrete sender themselves; they ask the
//! registry for a provider by name so the client library behind the transport
//! can be swapped without touching exporter code.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::ConfigError;
use crate::sender::{
    GrpcResponse, GrpcSender, GrpcSenderConfig, HttpResponse, HttpSender, HttpSenderConfig, Sender,
};

/// Name of the built-in hyper-based provider.
pub const DEFAULT_PROVIDER: &str = "hyper";

pub type GrpcTransport = Arc<dyn Sender<Response = GrpcResponse>>;
pub type HttpTransport = Arc<dyn Sender<Response = HttpResponse>>;

pub trait GrpcSenderProvider: Send + Sync {
    fn create_grpc_sender(&self, config: GrpcSenderConfig) -> Result<GrpcTransport, ConfigError>;
}

pub trait HttpSenderProvider: Send + Sync {
    fn create_http_sender(&self, config: HttpSenderConfig) -> Result<HttpTransport, ConfigError>;
}

/// Builds [`GrpcSender`] and [`HttpSender`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HyperSenderProvider;

impl GrpcSenderProvider for HyperSenderProvider {
    fn create_grpc_sender(&self, config: GrpcSenderConfig) -> Result<GrpcTransport, ConfigError> {
        Ok(Arc::new(GrpcSender::new(config)?))
    }
}

impl HttpSenderProvider for HyperSenderProvider {
    fn create_http_sender(&self, config: HttpSenderConfig) -> Result<HttpTransport, ConfigError> {
        Ok(Arc::new(HttpSender::new(config)?))
    }
}

fn lookup<P: ?Sized>(
    providers: &BTreeMap<String, Arc<P>>,
    kind: &str,
    name: Option<&str>,
) -> Result<Arc<P>, ConfigError> {
    match name {
        Some(name) => providers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSender(name.to_string())),
        None => {
            if let Some(provider) = providers.get(DEFAULT_PROVIDER) {
                return Ok(provider.clone());
            }
            let (first, provider) = providers
                .iter()
                .next()
                .ok_or_else(|| ConfigError::UnknownSender(DEFAULT_PROVIDER.to_string()))?;
            if providers.len() > 1 {
                warn!(
                    kind,
                    provider = %first,
                    "Multiple sender providers registered and none selected, using the first"
                );
            }
            Ok(provider.clone())
        }
    }
}

/// Statically registered sender providers, keyed by name.
#[derive(Clone)]
pub struct SenderRegistry {
    grpc: BTreeMap<String, Arc<dyn GrpcSenderProvider>>,
    http: BTreeMap<String, Arc<dyn HttpSenderProvider>>,
}

impl SenderRegistry {
    /// A registry without any provider, not even the built-in one.
    pub fn empty() -> Self {
        Self {
            grpc: BTreeMap::new(),
            http: BTreeMap::new(),
        }
    }

    pub fn register_grpc(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn GrpcSenderProvider>,
    ) -> &mut Self {
        self.grpc.insert(name.into(), provider);
        self
    }

    pub fn register_http(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn HttpSenderProvider>,
    ) -> &mut Self {
        self.http.insert(name.into(), provider);
        self
    }

    /// Resolve a gRPC provider; `None` selects the default one.
    pub fn grpc_provider(&self, name: Option<&str>) -> Result<Arc<dyn GrpcSenderProvider>, ConfigError> {
        lookup(&self.grpc, "grpc", name)
    }

    /// Resolve an HTTP provider; `None` selects the default one.
    pub fn http_provider(&self, name: Option<&str>) -> Result<Arc<dyn HttpSenderProvider>, ConfigError> {
        lookup(&self.http, "http", name)
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register_grpc(DEFAULT_PROVIDER, Arc::new(HyperSenderProvider))
            .register_http(DEFAULT_PROVIDER, Arc::new(HyperSenderProvider));
        registry
    }
}

impl fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("grpc", &self.grpc.keys().collect::<Vec<_>>())
            .field("http", &self.http.keys().collect::<Vec<_>>())
            .finish()
    }
}
