//! `quarry tools` — List the tools bound to the agent.

use quarry_config::AppConfig;
use quarry_core::error::Result;
use quarry_core::tool::ToolRegistry;

pub async fn run(config: &AppConfig, json: bool) -> Result<()> {
    let registry = quarry_tools::default_registry(config)?;
    println!("{}", render(&registry, json)?);
    Ok(())
}

fn render(registry: &ToolRegistry, json: bool) -> std::result::Result<String, serde_json::Error> {
    if json {
        return serde_json::to_string_pretty(&registry.definitions());
    }

    let mut out = format!("🔧 {} tool(s) available\n", registry.len());
    for tool in registry.list() {
        out.push_str(&format!("\n  {}\n    {}\n", tool.name(), tool.description()));
    }
    Ok(out)
}
