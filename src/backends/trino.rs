//! Trino/Athena-style warehouse backend
//!
//! The billing warehouse speaks the Trino client REST protocol: the statement
//! is POSTed as plain text and results are paged through `nextUri` links.
//! From the gateway's point of view this is still one synchronous call.

use crate::error::{CopilotError, Result};
use crate::nlq::executor::SqlBackend;
use crate::nlq::query::Row;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// POST /v1/statement with SQL in body (plain text, not JSON)
// Headers: X-Trino-User, X-Trino-Catalog, X-Trino-Schema

#[derive(Debug, Deserialize)]
struct TrinoResponse {
    id: Option<String>,
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
    columns: Option<Vec<TrinoColumn>>,
    data: Option<Vec<Vec<serde_json::Value>>>,
    error: Option<TrinoError>,
}

#[derive(Debug, Deserialize)]
struct TrinoError {
    message: String,
    #[serde(rename = "errorCode")]
    error_code: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TrinoColumn {
    name: String,
}

#[derive(Debug, Clone)]
pub struct TrinoSettings {
    pub coordinator_url: String,
    pub catalog: String,
    pub schema: String,
    pub user: String,
    /// Upper bound for one statement including all page fetches.
    pub timeout: Duration,
}

impl Default for TrinoSettings {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            catalog: "awsdatacatalog".to_string(),
            schema: "cur".to_string(),
            user: "finops".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct TrinoWarehouse {
    settings: TrinoSettings,
    client: Client,
}

impl TrinoWarehouse {
    const MAX_POLLS: usize = 10_000;

    pub fn new(mut settings: TrinoSettings) -> Result<Self> {
        settings.coordinator_url = settings.coordinator_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| CopilotError::Config(format!("Failed to create HTTP client for Trino: {}", e)))?;
        Ok(Self { settings, client })
    }

    async fn submit(&self, sql: &str) -> Result<TrinoResponse> {
        let url = format!("{}/v1/statement", self.settings.coordinator_url);
        let response = self
            .client
            .post(&url)
            .header("X-Trino-User", &self.settings.user)
            .header("X-Trino-Catalog", &self.settings.catalog)
            .header("X-Trino-Schema", &self.settings.schema)
            .header("Content-Type", "text/plain")
            .body(sql.trim_end_matches(';').to_string())
            .send()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to submit Trino query: {}", e)))?;

        Self::decode(response).await
    }

    async fn fetch(&self, next_uri: &str) -> Result<TrinoResponse> {
        let url = if next_uri.starts_with("http") {
            next_uri.to_string()
        } else {
            format!("{}{}", self.settings.coordinator_url, next_uri)
        };

        let response = self
            .client
            .get(&url)
            .header("X-Trino-User", &self.settings.user)
            .send()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to fetch Trino results: {}", e)))?;

        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<TrinoResponse> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CopilotError::Backend(format!(
                "Trino request failed with status {}: {}",
                status, text
            )));
        }

        let page: TrinoResponse = response
            .json()
            .await
            .map_err(|e| CopilotError::Backend(format!("Failed to parse Trino response: {}", e)))?;

        if let Some(error) = &page.error {
            return Err(CopilotError::Backend(format!(
                "Trino error: {} (code: {:?})",
                error.message, error.error_code
            )));
        }
        Ok(page)
    }
}

/// Zip column names with positional values. Missing trailing values become null.
fn rows_from_page(columns: &[TrinoColumn], data: Vec<Vec<serde_json::Value>>) -> Vec<Row> {
    data.into_iter()
        .map(|values| {
            let mut values = values.into_iter();
            columns
                .iter()
                .map(|c| (c.name.clone(), values.next().unwrap_or(serde_json::Value::Null)))
                .collect()
        })
        .collect()
}

/// Linear backoff in 100ms steps capped at 1s. No wait after the first
/// page or after a page that carried data.
fn fetch_delay(poll_count: usize, had_data: bool) -> Option<Duration> {
    if had_data || poll_count <= 1 {
        return None;
    }
    Some(Duration::from_millis((100 * poll_count.min(10)) as u64))
}

#[async_trait]
impl SqlBackend for TrinoWarehouse {
    fn name(&self) -> &'static str {
        "trino"
    }

    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        let started = Instant::now();
        let first = self.submit(sql).await?;
        let query_id = first.id.clone().unwrap_or_default();
        info!(query_id = %query_id, "Trino query submitted");

        let mut columns: Option<Vec<TrinoColumn>> = None;
        let mut pending: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut page = first;
        let mut poll_count = 0usize;

        loop {
            if columns.is_none() {
                columns = page.columns.take();
            }
            let had_data = page.data.is_some();
            if let Some(data) = page.data.take() {
                pending.extend(data);
            }

            let Some(next_uri) = page.next_uri.take() else {
                break;
            };

            if started.elapsed() > self.settings.timeout {
                return Err(CopilotError::TimedOut(format!(
                    "Trino query {} did not finish within {}s",
                    query_id,
                    self.settings.timeout.as_secs()
                )));
            }
            poll_count += 1;
            if poll_count > Self::MAX_POLLS {
                return Err(CopilotError::Backend(format!(
                    "Trino query exceeded max polls ({})",
                    Self::MAX_POLLS
                )));
            }

            if let Some(delay) = fetch_delay(poll_count, had_data) {
                tokio::time::sleep(delay).await;
            }
            debug!(query_id = %query_id, poll_count, "fetching next Trino page");
            page = self.fetch(&next_uri).await?;
        }

        let rows = match columns {
            Some(columns) => rows_from_page(&columns, pending),
            None if pending.is_empty() => Vec::new(),
            None => {
                warn!(query_id = %query_id, "Trino returned data without columns");
                return Err(CopilotError::Backend("No columns in Trino response".to_string()));
            }
        };
        info!(query_id = %query_id, rows = rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "Trino query finished");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_delay_skips_pages_with_data() {
        assert_eq!(fetch_delay(1, false), None);
        assert_eq!(fetch_delay(5, true), None);
        assert_eq!(fetch_delay(3, false), Some(Duration::from_millis(300)));
        assert_eq!(fetch_delay(42, false), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_rows_from_page_pads_missing_values() {
        let columns = vec![
            TrinoColumn { name: "service".into() },
            TrinoColumn { name: "cost".into() },
        ];
        let rows = rows_from_page(
            &columns,
            vec![
                vec!["AmazonEC2".into(), 10.5.into()],
                vec!["AmazonS3".into()],
            ],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["cost"], 10.5);
        assert!(rows[1]["cost"].is_null());
        assert_eq!(rows[1].keys().collect::<Vec<_>>(), vec!["service", "cost"]);
    }
}
