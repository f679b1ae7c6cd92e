use crate::error::{ApiError, ApiResult};
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the control-plane service (e.g., "https://example.com")
    pub base_url: String,
    /// Timeout for requests in seconds
    pub timeout_seconds: u64,
}

impl ClientConfig {
    /// Create a new configuration with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: 30,
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Control-plane API client
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) http_client: HttpClient,
}

impl Client {
    /// Create a new API client
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        // Validate the base URL early so later joins cannot fail
        Url::parse(&config.base_url)?;

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Resolve a path against the configured base URL
    pub(crate) fn endpoint(&self, path: &str) -> ApiResult<Url> {
        let base = Url::parse(&self.config.base_url)?;
        Ok(base.join(path)?)
    }

    /// POST a JSON body and decode a JSON response
    pub(crate) async fn post_json<B, R>(&self, path: &str, body: &B) -> ApiResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.http_client.post(url).json(body).send().await?;
        Self::decode(response).await
    }

    /// GET a JSON response
    pub(crate) async fn get_json<R>(&self, path: &str) -> ApiResult<R>
    where
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.http_client.get(url).send().await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> ApiResult<R> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 400 {
                return Err(ApiError::Validation(message));
            }
            return Err(ApiError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<R>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_against_base() {
        let client = Client::new(ClientConfig::new("https://example.com")).unwrap();
        let url = client.endpoint("/api/upload/initialize").unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/upload/initialize");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(Client::new(ClientConfig::new("not a url")).is_err());
    }
}
