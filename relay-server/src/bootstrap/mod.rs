use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;

pub mod logging;
pub mod server;
pub mod services;

pub struct Application {
    pub router: Router,
    pub bind_address: String,
    pub socket_addr: SocketAddr,
    /// Flip to true to stop the poll loop after its in-flight cycle and
    /// close open event streams
    pub shutdown_tx: watch::Sender<bool>,
    pub monitor_task: JoinHandle<()>,
    pub log_guard: Option<WorkerGuard>,
}

pub async fn setup() -> Result<Application> {
    // 1. Load Configuration
    let config = load_config()?;

    // 2. Setup Logging
    let log_guard = logging::setup(&config);

    // 3. Setup Services & Background Tasks
    let service_registry = services::setup(&config).await?;

    // 4. Setup Server (API)
    server::setup(config, service_registry, log_guard).await
}

fn load_config() -> Result<crate::config::Config> {
    use crate::config::Config;

    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_string())
    });
    let config_base = format!("{}/config", config_dir);

    eprintln!(
        "Config directory: {}, config base: {}",
        config_dir, config_base
    );

    // A missing base file means defaults; a present but invalid one is fatal
    if !std::path::Path::new(&format!("{}.toml", config_base)).exists() {
        eprintln!("No configuration at {}.toml, using defaults", config_base);
        return Ok(Config::default());
    }

    let config = Config::from_file(&config_base)
        .with_context(|| format!("Failed to load configuration from {}", config_base))?;
    eprintln!("Configuration loaded successfully from {}", config_base);
    Ok(config)
}
