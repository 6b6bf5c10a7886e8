//! Client for the market data API behind the built-in tools.
//!
//! Tools talk to the upstream through the [`DataApi`] trait so they can be
//! exercised against a scripted source in tests.

use async_trait::async_trait;
use quarry_config::DataApiConfig;
use quarry_core::error::ToolError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::pagination::Page;

/// Spot price of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h_pct: Option<f64>,
    /// Unix seconds
    pub updated_at: i64,
}

/// One entry of a symbol's activity feed (trades, transfers, listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    /// Unix seconds
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ActivityPage {
    #[serde(default)]
    items: Vec<ActivityEvent>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// The upstream operations the tools need.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn price(&self, symbol: &str) -> Result<PriceQuote, ToolError>;

    /// One newest-first page of a symbol's activity feed.
    async fn activity_page(
        &self,
        symbol: &str,
        cursor: Option<String>,
    ) -> Result<Page<ActivityEvent>, ToolError>;
}

/// HTTP implementation of [`DataApi`].
pub struct DataApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl DataApiClient {
    pub fn new(config: &DataApiConfig) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "data_api".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ToolError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Data API request");

        let mut request = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else {
                format!("request failed: {e}")
            };
            ToolError::ExecutionFailed {
                tool_name: path.to_string(),
                reason,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Upstream {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: path.to_string(),
                reason: format!("unexpected response body: {e}"),
            })
    }
}

#[async_trait]
impl DataApi for DataApiClient {
    async fn price(&self, symbol: &str) -> Result<PriceQuote, ToolError> {
        self.get_json("price", &[("symbol", symbol)]).await
    }

    async fn activity_page(
        &self,
        symbol: &str,
        cursor: Option<String>,
    ) -> Result<Page<ActivityEvent>, ToolError> {
        let mut query = vec![("symbol", symbol)];
        if let Some(cursor) = cursor.as_deref() {
            query.push(("cursor", cursor));
        }
        let page: ActivityPage = self.get_json("activity", &query).await?;
        Ok(Page::new(page.items, page.next_cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = DataApiClient::new(&DataApiConfig {
            base_url: "https://data.example.com/v1/".into(),
            api_key: None,
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.base_url(), "https://data.example.com/v1");
    }

    #[test]
    fn activity_page_tolerates_missing_fields() {
        let page: ActivityPage = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());

        let page: ActivityPage = serde_json::from_str(
            r#"{"items":[{"id":"e1","kind":"trade","amount":2.5,"timestamp":1700000000}],"next_cursor":"c2"}"#,
        )
        .unwrap();
        assert_eq!(page.items[0].kind, "trade");
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_an_execution_failure() {
        let client = DataApiClient::new(&DataApiConfig {
            // Port 9 (discard) on loopback: refused immediately
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            timeout_secs: 2,
        })
        .unwrap();
        let err = client.price("TOKENX").await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
