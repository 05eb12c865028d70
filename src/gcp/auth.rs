use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use gcp_auth::TokenProvider;
use http::{HeaderMap, HeaderValue};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ConfigError, TransportError};
use crate::gcp::config::GcpConfig;
use crate::sender::http::AuthFuture;
use crate::sender::Authenticator;

/// How often the cached credentials are refreshed. Tokens live for an hour and
/// the provider hands back its cached token until it nears expiry.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Build the request headers for a bearer token.
pub fn auth_headers(token: &str, project_id: &str) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();

    headers.insert(
        http::header::AUTHORIZATION,
        HeaderValue::try_from(format!("Bearer {}", token))
            .map_err(|e| ConfigError::Auth(format!("Invalid token format: {}", e)))?,
    );

    if !project_id.is_empty() {
        headers.insert(
            "x-goog-user-project",
            HeaderValue::try_from(project_id)
                .map_err(|e| ConfigError::Auth(format!("Invalid project ID: {}", e)))?,
        );
    }

    Ok(headers)
}

async fn fetch_headers(
    provider: &dyn TokenProvider,
    config: &GcpConfig,
) -> Result<HeaderMap, ConfigError> {
    let scopes: Vec<&str> = config.scopes.iter().map(String::as_str).collect();
    let token = provider
        .token(&scopes)
        .await
        .map_err(|e| ConfigError::Auth(format!("Failed to get token: {}", e)))?;
    auth_headers(token.as_str(), &config.project_id)
}

type ReauthFuture = Pin<Box<dyn Future<Output = Result<HeaderMap, ConfigError>> + Send>>;
type Reauth = Arc<dyn Fn() -> ReauthFuture + Send + Sync>;

async fn new_provider() -> Result<Arc<dyn TokenProvider>, ConfigError> {
    gcp_auth::provider()
        .await
        .map_err(|e| ConfigError::Auth(format!("Failed to create auth provider: {}", e)))
}

/// Google Application Default Credentials kept fresh in the background.
///
/// The refresh task stops when the last clone of the headers supplier is dropped.
/// A rejected token is replaced through a provider with an empty cache, so the
/// re-issued request never carries the credentials that were just refused.
pub struct GcpAuth {
    headers: Arc<RwLock<HeaderMap>>,
    reauth: Option<Reauth>,
    refresher: Option<JoinHandle<()>>,
}

impl GcpAuth {
    /// Resolve ADC, fetch a first token and start refreshing it.
    pub async fn from_adc(config: &GcpConfig) -> Result<Arc<Self>, ConfigError> {
        let provider = new_provider().await?;

        let headers = Arc::new(RwLock::new(fetch_headers(provider.as_ref(), config).await?));
        let refresher = tokio::spawn(refresh(provider, config.clone(), headers.clone()));

        let reauth_config = config.clone();
        let reauth: Reauth = Arc::new(move || -> ReauthFuture {
            let config = reauth_config.clone();
            Box::pin(async move {
                let provider = new_provider().await?;
                fetch_headers(provider.as_ref(), &config).await
            })
        });

        Ok(Arc::new(Self {
            headers,
            reauth: Some(reauth),
            refresher: Some(refresher),
        }))
    }

    /// Fixed credentials, never refreshed.
    pub fn from_headers(headers: HeaderMap) -> Arc<Self> {
        Arc::new(Self {
            headers: Arc::new(RwLock::new(headers)),
            reauth: None,
            refresher: None,
        })
    }

    #[cfg(test)]
    fn with_reauth(headers: HeaderMap, reauth: Reauth) -> Arc<Self> {
        Arc::new(Self {
            headers: Arc::new(RwLock::new(headers)),
            reauth: Some(reauth),
            refresher: None,
        })
    }

    /// Current credential headers.
    pub fn headers(&self) -> HeaderMap {
        self.headers.read().clone()
    }

    /// A per-request headers supplier for [`crate::sender::SenderConfig::with_headers`].
    pub fn supplier(self: &Arc<Self>) -> impl Fn() -> HeaderMap + Send + Sync + 'static {
        let auth = self.clone();
        move || auth.headers()
    }
}

impl Authenticator for GcpAuth {
    fn authenticate(&self) -> AuthFuture<'_> {
        Box::pin(async move {
            let Some(reauth) = &self.reauth else {
                return Ok(self.headers());
            };
            let fresh = reauth()
                .await
                .map_err(|e| TransportError::Auth(e.to_string()))?;
            *self.headers.write() = fresh.clone();
            debug!("Fetched new GCP credentials after the collector rejected the previous ones");
            Ok(fresh)
        })
    }
}

impl Drop for GcpAuth {
    fn drop(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
    }
}

async fn refresh(provider: Arc<dyn TokenProvider>, config: GcpConfig, headers: Arc<RwLock<HeaderMap>>) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        match fetch_headers(provider.as_ref(), &config).await {
            Ok(fresh) => {
                *headers.write() = fresh;
                debug!(project_id = %config.project_id, "Refreshed GCP credentials");
            }
            Err(err) => warn!(error = %err, "Failed to refresh GCP credentials, keeping the previous token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_headers_carry_bearer_and_project() {
        let headers = auth_headers("ya29.token", "my-project").unwrap();

        assert_eq!(headers[http::header::AUTHORIZATION], "Bearer ya29.token");
        assert_eq!(headers["x-goog-user-project"], "my-project");
    }

    #[test]
    fn empty_project_is_omitted() {
        let headers = auth_headers("ya29.token", "").unwrap();

        assert!(headers.get("x-goog-user-project").is_none());
    }

    #[test]
    fn invalid_token_is_rejected() {
        assert!(matches!(
            auth_headers("bad\ntoken", "p"),
            Err(ConfigError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn fixed_credentials_are_returned_as_is() {
        let auth = GcpAuth::from_headers(auth_headers("t", "p").unwrap());
        let supplier = auth.supplier();

        assert_eq!(supplier()["x-goog-user-project"], "p");
        assert_eq!(
            auth.authenticate().await.unwrap()[http::header::AUTHORIZATION],
            "Bearer t"
        );
    }

    #[tokio::test]
    async fn rejected_token_is_replaced_with_a_new_one() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let reauth: Reauth = Arc::new(move || -> ReauthFuture {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move { auth_headers(&format!("fresh-{n}"), "p") })
        });
        let auth = GcpAuth::with_reauth(auth_headers("stale", "p").unwrap(), reauth);
        let supplier = auth.supplier();

        let headers = auth.authenticate().await.unwrap();

        assert_eq!(headers[http::header::AUTHORIZATION], "Bearer fresh-1");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // later requests pick up the replacement too
        assert_eq!(supplier()[http::header::AUTHORIZATION], "Bearer fresh-1");
    }

    #[tokio::test]
    async fn failed_reauthentication_is_an_auth_error() {
        let reauth: Reauth = Arc::new(|| -> ReauthFuture {
            Box::pin(async { Err(ConfigError::Auth("no credentials".into())) })
        });
        let auth = GcpAuth::with_reauth(auth_headers("stale", "p").unwrap(), reauth);

        let result = auth.authenticate().await;

        assert!(matches!(result, Err(TransportError::Auth(_))));
        assert_eq!(auth.headers()[http::header::AUTHORIZATION], "Bearer stale");
    }
}
