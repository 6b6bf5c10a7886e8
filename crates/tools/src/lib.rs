//! Built-in data-provider tools for quarry.
//!
//! Tools give the agent read access to the market data API: spot prices
//! and recent on-chain activity. Feed-style endpoints are walked through
//! the shared [`pagination`] engine.

pub mod activity_feed;
pub mod pagination;
pub mod price_lookup;
pub mod upstream;

use std::sync::Arc;

use quarry_config::AppConfig;
use quarry_core::error::ToolError;
use quarry_core::tool::ToolRegistry;

pub use pagination::{Page, RetrievalParams, RetrievalWindow, StopReason, paginate};
pub use upstream::{DataApi, DataApiClient};

/// Create the tool registry with all built-in tools against the
/// configured data API.
pub fn default_registry(config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let api: Arc<dyn DataApi> = Arc::new(DataApiClient::new(&config.data_api)?);
    registry_with(api, config)
}

/// Same as [`default_registry`] with a caller-supplied upstream.
pub fn registry_with(api: Arc<dyn DataApi>, config: &AppConfig) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(price_lookup::PriceLookupTool::new(api.clone())))?;
    registry.register(Box::new(activity_feed::ActivityFeedTool::new(
        api,
        config.retrieval.clone(),
    )))?;
    Ok(registry)
}
