use std::env;

/// Default GCP telemetry endpoint
pub const DEFAULT_ENDPOINT: &str = "https://telemetry.googleapis.com";

/// OAuth scope accepted by the telemetry ingestion API
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// GCP-specific configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpConfig {
    pub project_id: String,
    pub endpoint: String,
    pub scopes: Vec<String>,
}

impl GcpConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Create from environment variables
    /// - GOOGLE_CLOUD_PROJECT / GCLOUD_PROJECT / GCP_PROJECT for project_id
    /// - OTEL_EXPORTER_OTLP_ENDPOINT for endpoint (defaults to DEFAULT_ENDPOINT)
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let project_id = lookup("GOOGLE_CLOUD_PROJECT")
            .or_else(|| lookup("GCLOUD_PROJECT"))
            .or_else(|| lookup("GCP_PROJECT"))?;

        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Some(Self::new(project_id).with_endpoint(endpoint))
    }
}
