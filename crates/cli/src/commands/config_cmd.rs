//! `quarry config` — Configuration management commands.

use quarry_config::AppConfig;

pub async fn validate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    if let Err(e) = config.validate() {
        println!("   ❌ Config error: {e}");
        return Err(e.into());
    }
    println!("   ✅ Config parsed successfully");

    let warnings = warnings(config);
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.default_model);
    println!("   Formatter:  {}", config.formatter_model());
    println!("   Data API:   {}", config.data_api.base_url);
    println!("   Max turns:  {}", config.agent.max_turns);

    Ok(())
}

fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set OPENROUTER_API_KEY, OPENAI_API_KEY or QUARRY_API_KEY)");
    }
    if config.data_api.api_key.is_none() {
        warnings.push("No data API key set (set QUARRY_DATA_API_KEY)");
    }
    if config.agent.model_retries == 0 {
        warnings.push("agent.model_retries = 0: a single transient error fails the run");
    }
    if config.retrieval.page_delay_ms == 0 {
        warnings.push("retrieval.page_delay_ms = 0: paginated tools will not throttle");
    }
    warnings
}

/// Print the effective configuration with secrets masked.
pub async fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&masked(config))?;
    println!("{toml_str}");
    Ok(())
}

fn masked(config: &AppConfig) -> AppConfig {
    fn mask(secret: &mut Option<String>) {
        if secret.is_some() {
            *secret = Some("***".into());
        }
    }

    let mut copy = config.clone();
    mask(&mut copy.api_key);
    mask(&mut copy.data_api.api_key);
    for provider in copy.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    copy
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", AppConfig::default_toml());
    Ok(())
}
