//! HTTP client for the pole telemetry API.
//!
//! The API returns one flat record per call. Until the backend is wired
//! up, mock mode serves a demo record so the rest of the system can run.

use crate::error::{RegistryError, RegistryResult};
use lightwise_core::TelemetryRecord;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Telemetry API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Serve the demo record instead of calling the API.
    #[serde(default = "default_use_mock")]
    pub use_mock: bool,
    /// API base URL, without the `/telemetry` path.
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_use_mock() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            use_mock: default_use_mock(),
            api_base: None,
            api_key: None,
        }
    }
}

impl TelemetryConfig {
    /// Check if requests go to the mock. Also true when no API base is set.
    pub fn is_mock(&self) -> bool {
        self.use_mock || self.api_base.as_deref().map_or(true, |b| b.trim().is_empty())
    }
}

/// Client for fetching pole telemetry.
pub struct TelemetryClient {
    client: Client,
    config: TelemetryConfig,
}

impl TelemetryClient {
    pub fn new(config: TelemetryConfig) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// `{api_base}/telemetry`, tolerating a trailing slash on the base.
    pub fn telemetry_url(&self) -> Option<String> {
        self.config
            .api_base
            .as_deref()
            .map(|base| format!("{}/telemetry", base.trim().trim_end_matches('/')))
    }

    /// Fetch the current telemetry record.
    pub async fn fetch(&self) -> RegistryResult<TelemetryRecord> {
        let url = match self.telemetry_url() {
            Some(url) if !self.config.is_mock() => url,
            _ => {
                debug!("Serving mock telemetry");
                return Ok(TelemetryRecord::demo());
            }
        };

        info!(url = %url, "Fetching telemetry");

        let mut request = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Api {
                status: status.as_u16(),
            });
        }

        response
            .json::<TelemetryRecord>()
            .await
            .map_err(|e| RegistryError::Http(format!("Failed to parse response: {e}")))
    }
}
