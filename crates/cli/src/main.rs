//! quarry CLI — the main entry point.
//!
//! Commands:
//! - `ask`     — Answer a question as a JSON object of the requested fields
//! - `tools`   — List the tools the agent can call
//! - `config`  — Show, validate, or generate configuration

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use quarry_config::{AppConfig, LogFormat, LoggingConfig};
use quarry_core::shape::{DataType, OutputItem};

mod commands;

#[derive(Parser)]
#[command(
    name = "quarry",
    about = "Ask questions, get JSON answers backed by live data tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question as JSON
    Ask {
        /// The question
        query: String,

        /// Requested field as `key:type[:description]`; append `[]` to the
        /// type for a list (e.g. `tags:string[]`). Repeatable.
        #[arg(short, long = "item", value_parser = parse_item)]
        items: Vec<OutputItem>,

        /// Requested fields as a JSON array (supports nested objects)
        #[arg(long, conflicts_with = "items")]
        items_json: Option<String>,

        /// Thread id to run on
        #[arg(short, long)]
        thread: Option<String>,

        /// Print the whole run outcome instead of only the JSON answer
        #[arg(long)]
        full: bool,
    },

    /// List available tools
    Tools {
        /// Print the model-facing definitions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration and report warnings
    Validate,
    /// Print a default config file
    Default,
}

/// Parse `key:type[:description]`.
fn parse_item(spec: &str) -> Result<OutputItem, String> {
    let mut parts = spec.splitn(3, ':');
    let key = parts.next().unwrap_or_default().trim();
    if key.is_empty() {
        return Err(format!("missing key in '{spec}'"));
    }
    let raw_type = parts.next().unwrap_or("string").trim();
    let (type_name, is_array) = match raw_type.strip_suffix("[]") {
        Some(inner) => (inner, true),
        None => (raw_type, false),
    };
    let data_type: DataType = serde_json::from_value(serde_json::json!(type_name))
        .map_err(|_| format!("unknown type '{type_name}' in '{spec}'"))?;

    let mut item = OutputItem::new(key, data_type);
    if is_array {
        item = item.array();
    }
    if let Some(description) = parts.next().map(str::trim).filter(|d| !d.is_empty()) {
        item = item.described(description);
    }
    Ok(item)
}

fn init_tracing(verbose: bool, log_json: bool, logging: &LoggingConfig) {
    let filter = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if log_json || logging.format == LogFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(cli.verbose, cli.log_json, &config.logging);

    match cli.command {
        Commands::Ask {
            query,
            items,
            items_json,
            thread,
            full,
        } => {
            let items = match items_json {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| format!("--items-json is not a valid item list: {e}"))?,
                None => items,
            };
            return Ok(commands::ask::run(config, query, items, thread, full).await?);
        }
        Commands::Tools { json } => commands::tools::run(&config, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config).await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate(&config).await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
        },
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_item_variants() {
        let item = parse_item("price:number:Spot price in USD").unwrap();
        assert_eq!(item.key, "price");
        assert_eq!(item.data_type, DataType::Number);
        assert_eq!(item.description.as_deref(), Some("Spot price in USD"));
        assert!(!item.is_array);

        let item = parse_item("tags:string[]").unwrap();
        assert!(item.is_array);
        assert_eq!(item.data_type, DataType::String);

        let item = parse_item("name").unwrap();
        assert_eq!(item.data_type, DataType::String);

        let item = parse_item("count:int").unwrap();
        assert_eq!(item.data_type, DataType::Integer);
    }

    #[test]
    fn parse_item_rejects_bad_specs() {
        assert!(parse_item(":number").is_err());
        assert!(parse_item("x:decimal").unwrap_err().contains("unknown type"));
    }

    #[test]
    fn cli_parses_ask() {
        let cli = Cli::try_parse_from([
            "quarry",
            "ask",
            "price of TOKENX?",
            "-i",
            "price:number",
            "--item",
            "change:number:24h change in percent",
            "--thread",
            "t1",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                query,
                items,
                thread,
                ..
            } => {
                assert_eq!(query, "price of TOKENX?");
                assert_eq!(items.len(), 2);
                assert_eq!(thread.as_deref(), Some("t1"));
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn items_and_items_json_conflict() {
        let result = Cli::try_parse_from([
            "quarry",
            "ask",
            "q",
            "-i",
            "a:string",
            "--items-json",
            "[]",
        ]);
        assert!(result.is_err());
    }
}
