use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::properties::record_properties;
use crate::connector::DestinationWriter;
use crate::http::{send_at_most_once, send_with_retry, HttpError, RetryPolicy};
use crate::transform::DestinationRecord;
use mirra_common::error::{MirraError, MirraResult};
use mirra_config::{ensure_present, get_var_or, require_var};

pub const NOTION_VERSION: &str = "2022-06-28";
pub const NOTION_API_URL: &str = "https://api.notion.com";

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub base_url: String,
    pub token: String,
    pub database_id: String,
    /// Minimum spacing between consecutive write calls.
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl NotionClientConfig {
    pub fn from_env() -> MirraResult<Self> {
        let mut missing = Vec::new();
        let config = Self::from_env_collecting(&mut missing);
        ensure_present(&missing)?;
        Ok(config)
    }

    pub fn from_env_collecting(missing: &mut Vec<String>) -> Self {
        Self {
            base_url: get_var_or("NOTION_API_URL", NOTION_API_URL),
            token: require_var("NOTION_TOKEN", missing),
            database_id: require_var("NOTION_DATABASE_ID", missing),
            min_interval_ms: std::env::var("NOTION_MIN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(350),
            max_retries: std::env::var("NOTION_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            timeout_secs: std::env::var("NOTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotionClientError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<NotionClientError> for MirraError {
    fn from(e: NotionClientError) -> Self {
        MirraError::Destination(format!("notion: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct PageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseInfo {
    #[serde(default)]
    title: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
struct RichText {
    #[serde(default)]
    plain_text: String,
}

pub struct NotionClient {
    client: Client,
    config: NotionClientConfig,
    retry: RetryPolicy,
    last_call: Mutex<Option<Instant>>,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let retry = RetryPolicy::new(config.max_retries);
        Ok(Self {
            client,
            config,
            retry,
            last_call: Mutex::new(None),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(self.config.min_interval_ms)
    }

    /// Wait until `min_interval` has passed since the previous call. Callers queue on the lock.
    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval() {
                tokio::time::sleep(self.min_interval() - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, NotionClientError> {
        let url = self.url(path);
        let build = || {
            let req = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&self.config.token)
                .header("Notion-Version", NOTION_VERSION);
            match body {
                Some(b) => req.json(b),
                None => req,
            }
        };
        // POST creates a page; replaying it after a timeout would duplicate the row.
        let response = if method == reqwest::Method::POST {
            send_at_most_once(&self.retry, build).await?
        } else {
            send_with_retry(&self.retry, build).await?
        };
        Ok(response)
    }

    pub async fn create_page(&self, record: &DestinationRecord) -> Result<String, NotionClientError> {
        self.throttle().await;
        let body = json!({
            "parent": { "database_id": self.config.database_id },
            "properties": record_properties(record),
        });
        let page: PageRef = self
            .send(reqwest::Method::POST, "pages", Some(&body))
            .await?
            .json()
            .await
            .map_err(|e| NotionClientError::Malformed(e.to_string()))?;
        Ok(page.id)
    }

    pub async fn archive_page(&self, page_id: &str) -> Result<(), NotionClientError> {
        self.throttle().await;
        let body = json!({ "archived": true });
        self.send(reqwest::Method::PATCH, &format!("pages/{page_id}"), Some(&body))
            .await?;
        Ok(())
    }

    pub async fn update_page(
        &self,
        page_id: &str,
        record: &DestinationRecord,
    ) -> Result<(), NotionClientError> {
        self.throttle().await;
        let body = json!({ "properties": record_properties(record) });
        self.send(reqwest::Method::PATCH, &format!("pages/{page_id}"), Some(&body))
            .await?;
        Ok(())
    }

    pub async fn database_title(&self) -> Result<String, NotionClientError> {
        let path = format!("databases/{}", self.config.database_id);
        let info: DatabaseInfo = self
            .send(reqwest::Method::GET, &path, None)
            .await?
            .json()
            .await
            .map_err(|e| NotionClientError::Malformed(e.to_string()))?;
        Ok(info
            .title
            .first()
            .map(|t| t.plain_text.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_owned()))
    }
}

#[async_trait]
impl DestinationWriter for NotionClient {
    async fn create(&self, record: &DestinationRecord) -> MirraResult<String> {
        Ok(self.create_page(record).await?)
    }

    async fn archive(&self, destination_id: &str) -> MirraResult<()> {
        Ok(self.archive_page(destination_id).await?)
    }

    async fn update(&self, destination_id: &str, record: &DestinationRecord) -> MirraResult<()> {
        Ok(self.update_page(destination_id, record).await?)
    }

    async fn check_connection(&self) -> MirraResult<String> {
        Ok(self.database_title().await?)
    }
}
