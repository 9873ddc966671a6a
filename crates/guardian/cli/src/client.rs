//! HTTP client for the Guardian daemon

use crate::error::{CliError, CliResult};
use chrono::{DateTime, Utc};
use guardian_types::{AssertionView, OverrideRecord, OverrideRequest, SystemStatus};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// HTTP client for communicating with the Guardian daemon
pub struct GuardianClient {
    client: Client,
    base_url: String,
}

/// Daemon health response
#[derive(Debug, Deserialize)]
pub struct DaemonHealth {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub session_id: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Current governance status
#[derive(Debug, Deserialize, Serialize)]
pub struct GovernanceStatus {
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    pub session_id: String,
    pub engine_running: bool,
    pub sequence: u64,
    pub evaluated_at: DateTime<Utc>,
    pub system_status: SystemStatus,
    pub halted: usize,
    pub overridden: usize,
    pub assertions: Vec<AssertionView>,
    #[serde(default)]
    pub source_error: Option<String>,
}

/// Error body returned by the daemon
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ReviewBody<'a> {
    reviewer: &'a str,
}

impl GuardianClient {
    /// Create a new Guardian client
    pub fn new(endpoint: &str) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Check daemon health
    pub async fn health(&self) -> CliResult<DaemonHealth> {
        self.get("/api/v1/health").await
    }

    /// Current snapshot
    pub async fn status(&self) -> CliResult<GovernanceStatus> {
        self.get("/api/v1/status").await
    }

    /// Submit a signed override
    pub async fn submit_override(&self, request: &OverrideRequest) -> CliResult<OverrideRecord> {
        self.post("/api/v1/overrides", request).await
    }

    /// Record a review of one assertion
    pub async fn review(&self, assertion_id: &str, reviewer: &str) -> CliResult<()> {
        let url = format!("{}/api/v1/assertions/{}/review", self.base_url, assertion_id);
        let response = self
            .client
            .post(&url)
            .json(&ReviewBody { reviewer })
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> CliResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> CliResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CliResult<T> {
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> CliError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => CliError::Api {
                status,
                code: body.code,
                message: body.error,
                reason: body
                    .details
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(|r| r.as_str())
                    .map(str::to_owned),
            },
            Err(_) => CliError::Api {
                status,
                code: "UNKNOWN".into(),
                message: text,
                reason: None,
            },
        }
    }
}
