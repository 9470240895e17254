use tracing_appender::non_blocking::WorkerGuard;

use crate::config::Config;
use crate::logging;

pub fn setup(config: &Config) -> Option<WorkerGuard> {
    let guard = logging::init(&config.logging);

    tracing::info!("Starting Copier Status Relay...");
    tracing::info!("Server Version: {}", env!("BUILD_INFO"));

    if config.logging.enabled {
        tracing::info!(
            "File logging enabled: directory={}, prefix={}, rotation={}, json={}",
            config.logging.directory,
            config.logging.file_prefix,
            config.logging.rotation,
            config.logging.json
        );
    }

    guard
}
