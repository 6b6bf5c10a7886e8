//! `quarry ask` — Answer one question as a JSON object.

use std::process::ExitCode;
use std::sync::Arc;

use quarry_agent::{AgentLoop, CancellationToken};
use quarry_config::AppConfig;
use quarry_core::error::{Error, Result, RunError};
use quarry_core::event::EventBus;
use quarry_core::shape::{AskRequest, OutputItem};
use quarry_threads::InMemoryThreadStore;
use tracing::{debug, error, warn};

pub async fn run(
    config: AppConfig,
    query: String,
    items: Vec<OutputItem>,
    thread: Option<String>,
    full: bool,
) -> Result<ExitCode> {
    // Fail early with setup instructions
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY   (recommended)");
        eprintln!("    OPENAI_API_KEY       (for OpenAI direct)");
        eprintln!("    QUARRY_API_KEY       (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err(Error::Config {
            message: "no API key found".into(),
        });
    }

    let router = quarry_providers::build_from_config(&config);
    let provider = router.default().ok_or_else(|| Error::Config {
        message: format!("provider '{}' is not configured", config.default_provider),
    })?;

    let tools = Arc::new(quarry_tools::default_registry(&config)?);
    let threads = Arc::new(InMemoryThreadStore::new());
    let event_bus = Arc::new(EventBus::default());
    let agent = AgentLoop::from_config(&config, provider, tools, threads, event_bus);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let mut request = AskRequest::new(query, items);
    request.thread_id = thread;

    match agent.run(request, cancel).await {
        Ok(outcome) => {
            let rendered = if full {
                serde_json::to_string_pretty(&outcome)?
            } else {
                serde_json::to_string_pretty(&outcome.output)?
            };
            println!("{rendered}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            // Upstream detail stays in debug logs; the terminal gets the public message
            debug!(error = %e, "Run failure detail");
            error!(code = e.code(), "Run failed");
            eprintln!("{}", failure_line(&e));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn failure_line(e: &RunError) -> String {
    format!("{}: {}", e.code(), e.public_message())
}
