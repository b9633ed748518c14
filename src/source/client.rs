use crate::config::SourceConfig;
use crate::error::{RelayError, Result};
use crate::metadata::EntitySource;
use crate::source::EntityMetadata;
use async_trait::async_trait;
use url::{Position, Url};

/// HTTP side of the Gotify API plus endpoint construction for the stream
pub struct SourceClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl SourceClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: config.server_url()?,
            token: config.client_token.clone(),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `ws(s)://host/stream?token=...`, secure when the server URL is https
    pub fn stream_url(&self) -> Result<Url> {
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        self.endpoint(scheme, "stream")
    }

    pub fn applications_url(&self) -> Result<Url> {
        self.endpoint(self.base.scheme(), "application")
    }

    fn endpoint(&self, scheme: &str, path: &str) -> Result<Url> {
        if self.base.host_str().is_none_or(str::is_empty) {
            return Err(RelayError::Config("gotify host is not set".to_string()));
        }

        let authority = &self.base[Position::BeforeHost..Position::AfterPort];
        let prefix = self.base.path().trim_end_matches('/');
        let mut url = Url::parse(&format!("{scheme}://{authority}{prefix}/{path}"))
            .map_err(|e| RelayError::Config(format!("invalid gotify endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    /// Fetch every application visible to the client token
    pub async fn get_applications(&self) -> Result<Vec<EntityMetadata>> {
        let url = self.applications_url()?;
        tracing::debug!(host = ?self.base.host_str(), "Fetching application list from Gotify");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Connection(format!(
                "gotify API error (status {}): {}",
                status.as_u16(),
                body
            )));
        }

        let body = response.text().await?;
        let applications: Vec<EntityMetadata> = serde_json::from_str(&body)?;
        tracing::debug!(count = applications.len(), "Received application list");
        Ok(applications)
    }
}

#[async_trait]
impl EntitySource for SourceClient {
    async fn list_entities(&self) -> Result<Vec<EntityMetadata>> {
        self.get_applications().await
    }
}
