use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::HostConfig;
use crate::error::{HostError, Result};

/// Installs the global tracing subscriber. Call once, from the binary.
pub fn init_logging(config: &HostConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&config.log_level).map_err(|e| HostError::Logging(e.to_string()))?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| HostError::Logging(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| HostError::Logging(e.to_string()))?;
    }

    tracing::info!(level = %config.log_level, json = config.json_logs, "Logging initialised");
    Ok(())
}
