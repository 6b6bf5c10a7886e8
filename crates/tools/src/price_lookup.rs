//! `get_price` — spot price of a token symbol from the data API.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::Tool;
use std::sync::Arc;

use crate::upstream::DataApi;

pub struct PriceLookupTool {
    api: Arc<dyn DataApi>,
}

impl PriceLookupTool {
    pub fn new(api: Arc<dyn DataApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for PriceLookupTool {
    fn name(&self) -> &str {
        "get_price"
    }

    fn description(&self) -> &str {
        "Get the current spot price in USD for a token symbol, with its 24h change when known."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "symbol": {
                    "type": "string",
                    "description": "Token symbol, e.g. ETH or TOKENX"
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

        let quote = self.api.price(&symbol).await?;
        serde_json::to_string(&quote).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: e.to_string(),
        })
    }
}
