use async_trait::async_trait;
use copier_status_file::Platform;
use std::path::{Path, PathBuf};

use crate::domain::models::{ChangeEvent, RegistryEntry};
use crate::errors::{ReadError, RegistryError};

/// Read access to terminal status files
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusFileSource: Send + Sync {
    /// Decoded text of one status file
    async fn read(&self, path: &Path, hint: Option<Platform>) -> Result<String, ReadError>;

    /// Status files currently present in a directory
    async fn list(&self, directory: &Path, extensions: &[String]) -> Vec<PathBuf>;
}

/// Mutation applied by `RegistryRepository::update`; returns whether it
/// changed the document
pub type RegistryUpdate = Box<dyn for<'a> FnOnce(&'a mut RegistryEntry) -> bool + Send>;

/// Persisted account registry, one document per API key
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    async fn load(&self, api_key: &str) -> Result<RegistryEntry, RegistryError>;

    /// Replace the whole document
    async fn save(&self, api_key: &str, entry: &RegistryEntry) -> Result<(), RegistryError>;

    /// Read-modify-write under the per-key lock. `apply` returns whether it
    /// changed anything; unchanged documents are not rewritten. A missing
    /// document starts from `RegistryEntry::default()`.
    async fn update(
        &self,
        api_key: &str,
        apply: RegistryUpdate,
    ) -> Result<RegistryEntry, RegistryError>;

    async fn set_master_enabled(
        &self,
        api_key: &str,
        master_id: &str,
        enabled: bool,
    ) -> Result<(), RegistryError>;

    async fn set_slave_enabled(
        &self,
        api_key: &str,
        slave_id: &str,
        enabled: bool,
    ) -> Result<(), RegistryError>;
}

/// Delivery of change events to subscribers (SSE, callbacks)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    async fn publish(&self, event: ChangeEvent);
}
