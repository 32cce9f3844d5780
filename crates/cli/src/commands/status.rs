//! `dexter status`: show the effective configuration.

use dexter_config::AppConfig;
use dexter_providers::openai_compat::OPENAI_BASE_URL;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    println!("Dexter Status");
    println!("=============");
    println!("  Config dir:         {}", AppConfig::config_dir().display());
    println!("  Model:              {}", config.model);
    println!(
        "  Endpoint:           {}",
        config.api_base.as_deref().unwrap_or(OPENAI_BASE_URL)
    );
    println!("  Structured output:  {:?}", config.llm.structured_output());
    println!("  Tool binding:       {:?}", config.llm.tool_bind());
    println!("  Server:             {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "  Step limits:        {} total, {} per task",
        config.runs.max_steps, config.runs.max_steps_per_task
    );

    if config.has_api_key() {
        println!("\n  ✅ API key configured");
    } else {
        println!("\n  ⚠️  OPENAI_API_KEY is not set; runs will fail at the first LLM call");
    }

    Ok(())
}
