//! Lattice API client for the remote experimentation service
//!
//! HTTP implementation of the [`ExperimentTransport`] port. The client owns
//! no resilience logic of its own: it performs one request per call,
//! wraps every call in a timeout, and classifies failures into
//! [`TransportError`] so the resilient layer above can decide retry
//! eligibility.

use std::time::Duration;

use async_trait::async_trait;
use quarry_core::sync::ports::{ExperimentTransport, ResultPage, TransportError};
use quarry_domain::{Dataset, DatasetAnalysis, Experiment, ExperimentResult};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::errors::SyncError;

/// Configuration for the Lattice client
#[derive(Debug, Clone)]
pub struct LatticeClientConfig {
    /// Base URL for the Lattice API (e.g., "https://api.lattice.dev/v1")
    pub base_url: String,
    /// Bearer token presented on every request, when configured
    pub api_token: Option<String>,
    /// Timeout for API requests
    pub timeout: Duration,
    /// User-Agent header value
    pub user_agent: String,
}

impl Default for LatticeClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.lattice.dev/v1".to_string(),
            api_token: None,
            timeout: Duration::from_secs(30),
            user_agent: format!("quarry/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client for the Lattice experimentation API.
pub struct LatticeClient {
    http: reqwest::Client,
    config: LatticeClientConfig,
}

/// Wire shapes for paginated and enveloped responses
#[derive(Debug, Deserialize)]
struct ResultPageResponse {
    results: Vec<ExperimentResult>,
    next_cursor: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DatasetListResponse {
    datasets: Vec<Dataset>,
}

impl LatticeClient {
    /// Create a new client with default configuration
    pub fn new() -> Result<Self, SyncError> {
        Self::with_config(LatticeClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: LatticeClientConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = tokio::time::timeout(self.config.timeout, self.authorize(builder).send())
            .await
            .map_err(|_| TransportError::Timeout(self.config.timeout))?
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self.send(self.http.get(&url)).await?;
        decode_body(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let url = self.url(path);
        debug!(url = %url, "POST");

        let response = self.send(self.http.post(&url)).await?;
        decode_body(response).await
    }
}

#[async_trait]
impl ExperimentTransport for LatticeClient {
    #[instrument(skip(self))]
    async fn fetch_experiment(&self, id: &str) -> Result<Experiment, TransportError> {
        self.get_json(&format!("/experiments/{id}")).await
    }

    #[instrument(skip(self))]
    async fn fetch_experiment_results(
        &self,
        experiment_id: &str,
        cursor: u64,
        page_size: usize,
    ) -> Result<ResultPage, TransportError> {
        let page: ResultPageResponse = self
            .get_json(&format!(
                "/experiments/{experiment_id}/results?cursor={cursor}&limit={page_size}"
            ))
            .await?;

        debug!(
            experiment_id,
            cursor,
            count = page.results.len(),
            has_more = page.next_cursor.is_some(),
            "fetched result page"
        );

        Ok(ResultPage { results: page.results, next_cursor: page.next_cursor })
    }

    #[instrument(skip(self))]
    async fn list_datasets(&self) -> Result<Vec<Dataset>, TransportError> {
        let listing: DatasetListResponse = self.get_json("/datasets").await?;
        Ok(listing.datasets)
    }

    #[instrument(skip(self))]
    async fn analyze_dataset(&self, dataset_id: &str) -> Result<DatasetAnalysis, TransportError> {
        self.post_json(&format!("/datasets/{dataset_id}/analyze")).await
    }
}

async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    response
        .json()
        .await
        .map_err(|e| TransportError::Malformed(format!("failed to parse response: {e}")))
}

fn classify_status(status: StatusCode, message: String) -> TransportError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Auth(message),
        StatusCode::NOT_FOUND => TransportError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => TransportError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT => TransportError::Network(message),
        status if status.is_server_error() => {
            TransportError::Server { status: status.as_u16(), message }
        }
        status => {
            warn!(status = status.as_u16(), "unexpected client status");
            TransportError::Malformed(format!("unexpected status {status}: {message}"))
        }
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(Duration::ZERO)
    } else if err.is_connect() || err.is_request() {
        TransportError::Network(err.to_string())
    } else if err.is_decode() {
        TransportError::Malformed(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
