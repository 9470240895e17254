use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapters::infrastructure::FsStatusFileReader;
use crate::adapters::outbound::messaging::ChangeBroadcaster;
use crate::adapters::outbound::persistence::JsonRegistryStore;
use crate::application::AccountMonitor;
use crate::config::Config;
use crate::ports;
use copier_status_file::DecoderRegistry;

pub struct ServiceRegistry {
    pub monitor: Arc<AccountMonitor>,
    pub broadcaster: ChangeBroadcaster,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub monitor_task: JoinHandle<()>,
}

pub async fn setup(config: &Config) -> Result<ServiceRegistry> {
    let reader = Arc::new(FsStatusFileReader::new(
        DecoderRegistry::default(),
        config.monitor.read_timeout(),
    ));

    tokio::fs::create_dir_all(&config.registry.directory).await?;
    let registry = Arc::new(JsonRegistryStore::new(&config.registry.directory));
    tracing::info!("Registry store initialized: {}", config.registry.directory);

    let broadcaster = ChangeBroadcaster::default();

    let monitor = Arc::new(AccountMonitor::new(
        config.sources.clone(),
        reader as Arc<dyn ports::StatusFileSource>,
        registry as Arc<dyn ports::RegistryRepository>,
        Arc::new(broadcaster.clone()) as Arc<dyn ports::ChangePublisher>,
        config.monitor.clone(),
    ));

    if config.sources.is_empty() {
        tracing::warn!("No status file sources configured, the monitor will stay idle");
    }
    for source in &config.sources {
        tracing::info!(
            paths = source.paths.len(),
            directories = source.directories.len(),
            platform = ?source.platform,
            "Status file source configured"
        );
    }

    // Spawn poll loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = tokio::spawn(monitor.clone().run(shutdown_rx.clone()));
    tracing::info!("Account monitor task spawned");

    Ok(ServiceRegistry {
        monitor,
        broadcaster,
        shutdown_tx,
        shutdown_rx,
        monitor_task,
    })
}
