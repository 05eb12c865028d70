//! Proxy selection for collector connections.
//!
//! Destinations picked by a [`ProxySelector`] are reached through an HTTP
//! `CONNECT` tunnel to the proxy. Everything else is dialed directly. Plain-HTTP
//! collectors are tunneled as well, so TLS and HTTP/2 prior knowledge behave the
//! same with or without a proxy.

use std::error::Error as StdError;
use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ::http::Uri;
use hyper_util::client::legacy::connect::proxy::Tunnel;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::proxy::matcher::{Intercept, Matcher};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tower_service::Service;
use tracing::debug;

/// Picks the proxy, if any, a connection to a collector goes through.
#[derive(Clone)]
pub struct ProxySelector {
    matcher: Arc<Matcher>,
}

impl ProxySelector {
    /// Honor `ALL_PROXY`, `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`, in either case.
    pub fn from_env() -> Self {
        Self {
            matcher: Arc::new(Matcher::from_env()),
        }
    }

    /// Like [`ProxySelector::from_env`] with a custom variable source.
    ///
    /// Returns `None` when no proxy variable is set.
    pub fn from_lookup<L>(lookup: L) -> Option<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let first = |names: [&str; 2]| -> String {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
                .unwrap_or_default()
        };
        let all = first(["ALL_PROXY", "all_proxy"]);
        let http = first(["HTTP_PROXY", "http_proxy"]);
        let https = first(["HTTPS_PROXY", "https_proxy"]);
        if all.is_empty() && http.is_empty() && https.is_empty() {
            return None;
        }
        let matcher = Matcher::builder()
            .all(all)
            .http(http)
            .https(https)
            .no(first(["NO_PROXY", "no_proxy"]))
            .build();
        Some(Self {
            matcher: Arc::new(matcher),
        })
    }

    /// Send every connection through `proxy`.
    pub fn to(proxy: &str) -> Self {
        Self::to_except(proxy, "")
    }

    /// Send connections through `proxy`, except to hosts in the comma-separated
    /// `no_proxy` list (`NO_PROXY` syntax).
    pub fn to_except(proxy: &str, no_proxy: &str) -> Self {
        let matcher = Matcher::builder().all(proxy).no(no_proxy).build();
        Self {
            matcher: Arc::new(matcher),
        }
    }

    /// The proxy a connection to `destination` goes through, if any.
    pub fn select(&self, destination: &Uri) -> Option<Uri> {
        self.intercept(destination).map(|intercept| intercept.uri().clone())
    }

    fn intercept(&self, destination: &Uri) -> Option<Intercept> {
        self.matcher.intercept(destination)
    }
}

impl fmt::Debug for ProxySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the matcher never prints credentials
        f.debug_tuple("ProxySelector").field(&self.matcher).finish()
    }
}

type BoxError = Box<dyn StdError + Send + Sync>;
type Connecting = Pin<Box<dyn Future<Output = Result<TokioIo<TcpStream>, BoxError>> + Send>>;

/// TCP connector that tunnels through the selected proxy when there is one.
#[derive(Clone)]
pub(crate) struct ProxyConnector {
    direct: HttpConnector,
    proxy: Option<ProxySelector>,
}

impl ProxyConnector {
    pub(crate) fn new(direct: HttpConnector, proxy: Option<ProxySelector>) -> Self {
        Self { direct, proxy }
    }
}

impl Service<Uri> for ProxyConnector {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = Connecting;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        self.direct.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, destination: Uri) -> Connecting {
        let intercept = self
            .proxy
            .as_ref()
            .and_then(|proxy| proxy.intercept(&destination));
        let Some(intercept) = intercept else {
            let connecting = self.direct.call(destination);
            return Box::pin(async move { Ok::<_, BoxError>(connecting.await?) });
        };

        debug!(proxy = %intercept.uri(), destination = %destination, "Tunneling through proxy");
        let mut tunnel = Tunnel::new(intercept.uri().clone(), self.direct.clone());
        if let Some(auth) = intercept.basic_auth() {
            tunnel = tunnel.with_auth(auth.clone());
        }
        let destination = with_default_port(destination);
        Box::pin(async move {
            future::poll_fn(|cx| tunnel.poll_ready(cx)).await?;
            Ok::<_, BoxError>(tunnel.call(destination).await?)
        })
    }
}

/// The tunnel assumes 443 when the port is omitted.
fn with_default_port(destination: Uri) -> Uri {
    if destination.port().is_some() {
        return destination;
    }
    let (Some(scheme), Some(host)) = (destination.scheme_str(), destination.host()) else {
        return destination;
    };
    let port = if scheme == "https" { 443 } else { 80 };
    format!("{scheme}://{host}:{port}")
        .parse()
        .unwrap_or(destination)
}
