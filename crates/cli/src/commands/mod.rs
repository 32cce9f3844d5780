pub mod ask;
pub mod serve;
pub mod status;

use dexter_agent::{DirectExecutorFactory, ExecutorFactory};
use dexter_config::AppConfig;
use std::sync::Arc;

/// Load configuration, mapping failures to a readable message.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The executor factory used by the binary.
pub fn executor_factory(config: &AppConfig) -> Arc<dyn ExecutorFactory> {
    let invoker = dexter_providers::build_from_config(config, tokio::runtime::Handle::current());
    Arc::new(DirectExecutorFactory::new(invoker))
}
