//! Read-only client for a chain's upgrade plan and latest block height.
//!
//! Plan:   GET <rest>/cosmos/upgrade/v1beta1/current_plan
//! Height: GET <rpc>/status when an RPC URL is configured, otherwise
//!         GET <rest>/cosmos/base/tendermint/v1beta1/blocks/latest

pub mod types;

use crate::config::ChainConfig;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use types::UpgradePlan;

use types::{LatestBlockResponse, StatusResponse};

const CURRENT_PLAN_PATH: &str = "/cosmos/upgrade/v1beta1/current_plan";
const LATEST_BLOCK_PATH: &str = "/cosmos/base/tendermint/v1beta1/blocks/latest";
const STATUS_PATH: &str = "/status";

/// Longest response body echoed back in an error.
const MAX_ERROR_BODY: usize = 256;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request successful, but no `{0}` object in response")]
    MissingField(&'static str),
}

impl FetchError {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Request(e) if e.is_timeout() => "timeout",
            FetchError::Request(_) => "request_failed",
            FetchError::Status { .. } => "bad_status",
            FetchError::Malformed(_) => "malformed",
            FetchError::MissingField(_) => "missing_field",
        }
    }
}

/// Where a monitor reads chain state from.
#[async_trait]
pub trait PlanSource: Send + Sync {
    /// The currently scheduled upgrade, `None` when nothing is scheduled.
    async fn current_plan(&self) -> Result<Option<UpgradePlan>, FetchError>;

    /// Height of the chain's latest block.
    async fn latest_height(&self) -> Result<u64, FetchError>;
}

/// Decode a `current_plan` body. A missing `plan` key is an error, `null` is "no plan".
pub fn parse_current_plan(body: &str) -> Result<Option<UpgradePlan>, FetchError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let plan = match value.get("plan") {
        None => return Err(FetchError::MissingField("plan")),
        Some(serde_json::Value::Null) => return Ok(None),
        Some(plan) => plan.clone(),
    };

    let plan: UpgradePlan = serde_json::from_value(plan)?;
    if plan.is_empty() {
        return Ok(None);
    }
    Ok(Some(plan))
}

/// HTTP-backed [`PlanSource`] for a single chain.
#[derive(Clone)]
pub struct ChainClient {
    http: reqwest::Client,
    endpoint: String,
    rpc: Option<String>,
}

impl ChainClient {
    pub fn new(http: reqwest::Client, config: &ChainConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            rpc: config.rpc.clone(),
        }
    }

    /// Build the shared HTTP client with a bounded per-request timeout.
    pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("cosmos-upgrade-watcher/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        debug!(url = %url, "fetching");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl PlanSource for ChainClient {
    async fn current_plan(&self) -> Result<Option<UpgradePlan>, FetchError> {
        let url = format!("{}{}", self.endpoint, CURRENT_PLAN_PATH);
        let body = self.get_text(&url).await?;
        parse_current_plan(&body)
    }

    async fn latest_height(&self) -> Result<u64, FetchError> {
        match &self.rpc {
            Some(rpc) => {
                let body = self.get_text(&format!("{}{}", rpc, STATUS_PATH)).await?;
                let status: StatusResponse = serde_json::from_str(&body)?;
                Ok(status.result.sync_info.latest_block_height)
            }
            None => {
                let url = format!("{}{}", self.endpoint, LATEST_BLOCK_PATH);
                let body = self.get_text(&url).await?;
                let block: LatestBlockResponse = serde_json::from_str(&body)?;
                Ok(block.block.header.height)
            }
        }
    }
}

/// Cap an error body so an HTML error page can't flood the logs.
pub(crate) fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
