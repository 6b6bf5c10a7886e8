//! `get_recent_activity` — a symbol's activity over the last N hours.
//!
//! The feed is newest-first and cursor-paginated, so the tool walks it
//! with [`paginate`] using `now - since_hours` as the horizon.

use async_trait::async_trait;
use quarry_config::RetrievalConfig;
use quarry_core::error::ToolError;
use quarry_core::tool::Tool;
use serde::Serialize;
use std::sync::Arc;

use crate::pagination::{RetrievalParams, StopReason, paginate};
use crate::upstream::{ActivityEvent, DataApi};

const DEFAULT_SINCE_HOURS: f64 = 24.0;

pub struct ActivityFeedTool {
    api: Arc<dyn DataApi>,
    retrieval: RetrievalConfig,
}

impl ActivityFeedTool {
    pub fn new(api: Arc<dyn DataApi>, retrieval: RetrievalConfig) -> Self {
        Self { api, retrieval }
    }
}

#[derive(Serialize)]
struct ActivityReport<'a> {
    symbol: &'a str,
    since: i64,
    count: usize,
    events: Vec<ActivityEvent>,
    /// Every event since the horizon is included. False when the page
    /// budget ran out or the upstream cursor stalled.
    complete: bool,
    stop: StopReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

#[async_trait]
impl Tool for ActivityFeedTool {
    fn name(&self) -> &str {
        "get_recent_activity"
    }

    fn description(&self) -> &str {
        "List recent on-chain activity (trades, transfers, listings) for a token symbol, newest first. \
         Covers the last `since_hours` hours; pass `cursor` from a previous result to continue further back."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Token symbol, e.g. ETH or TOKENX"
                },
                "since_hours": {
                    "type": "number",
                    "minimum": 0,
                    "maximum": 720,
                    "description": "How far back to look, in hours (default: 24)"
                },
                "max_pages": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 50,
                    "description": "Upper bound on pages to read"
                },
                "cursor": {
                    "type": "string",
                    "description": "Continuation cursor from a previous call"
                }
            },
            "required": ["symbol"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let symbol = arguments["symbol"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'symbol' argument".into()))?
            .to_uppercase();
        let since_hours = arguments["since_hours"]
            .as_f64()
            .unwrap_or(DEFAULT_SINCE_HOURS);
        let lower_bound = chrono::Utc::now().timestamp() - (since_hours * 3600.0) as i64;

        let mut params = RetrievalParams::from_config(&self.retrieval).with_lower_bound(lower_bound);
        if let Some(max_pages) = arguments["max_pages"].as_u64() {
            params = params.with_max_pages(max_pages as usize);
        }
        if let Some(cursor) = arguments["cursor"].as_str() {
            params = params.with_cursor(cursor);
        }

        let api = &self.api;
        let sym = symbol.as_str();
        let window = paginate(
            params,
            move |cursor| api.activity_page(sym, cursor),
            |event: &ActivityEvent| event.timestamp,
        )
        .await?;

        let complete = matches!(
            window.stop,
            StopReason::Empty | StopReason::EndOfData | StopReason::Horizon
        );
        // A stalled cursor cannot be resumed from
        let next_cursor = match window.stop {
            StopReason::MaxPages => window.cursor,
            _ => None,
        };
        let report = ActivityReport {
            symbol: &symbol,
            since: lower_bound,
            count: window.collected.len(),
            events: window.collected,
            complete,
            stop: window.stop,
            next_cursor,
        };

        serde_json::to_string(&report).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}
