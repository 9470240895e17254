//! JSON document store for the account registry.
//!
//! One pretty-printed document per API key. Within this process every
//! read-modify-write on a key is serialized by a per-key lock; separate
//! processes writing the same directory are last-writer-wins and can lose
//! each other's updates.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::models::RegistryEntry;
use crate::errors::RegistryError;
use crate::ports::{RegistryRepository, RegistryUpdate};

pub struct JsonRegistryStore {
    directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonRegistryStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Document path for an API key (hex-encoded, so any key is a safe file name)
    pub fn path_for(&self, api_key: &str) -> PathBuf {
        let encoded: String = api_key.bytes().map(|b| format!("{:02x}", b)).collect();
        self.directory.join(format!("{}.json", encoded))
    }

    async fn key_lock(&self, api_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(api_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_document(path: &Path) -> Result<RegistryEntry, RegistryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound)
            }
            Err(e) => {
                return Err(RegistryError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    async fn write_document(&self, path: &Path, entry: &RegistryEntry) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(io_err)?;

        let json = serde_json::to_string_pretty(entry)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;
        Ok(())
    }

    async fn modify(
        &self,
        api_key: &str,
        apply: impl FnOnce(&mut RegistryEntry) -> bool,
    ) -> Result<RegistryEntry, RegistryError> {
        let lock = self.key_lock(api_key).await;
        let _guard = lock.lock().await;

        let path = self.path_for(api_key);
        let mut entry = match Self::read_document(&path).await {
            Ok(entry) => entry,
            Err(RegistryError::NotFound) => RegistryEntry::default(),
            Err(e) => return Err(e),
        };

        if apply(&mut entry) {
            entry.updated_at = Some(Utc::now());
            self.write_document(&path, &entry).await?;
            tracing::debug!(path = %path.display(), "Registry document written");
        }
        Ok(entry)
    }
}

#[async_trait]
impl RegistryRepository for JsonRegistryStore {
    async fn load(&self, api_key: &str) -> Result<RegistryEntry, RegistryError> {
        let lock = self.key_lock(api_key).await;
        let _guard = lock.lock().await;
        Self::read_document(&self.path_for(api_key)).await
    }

    async fn save(&self, api_key: &str, entry: &RegistryEntry) -> Result<(), RegistryError> {
        let lock = self.key_lock(api_key).await;
        let _guard = lock.lock().await;

        let mut entry = entry.clone();
        entry.updated_at = Some(Utc::now());
        self.write_document(&self.path_for(api_key), &entry).await
    }

    async fn update(
        &self,
        api_key: &str,
        apply: RegistryUpdate,
    ) -> Result<RegistryEntry, RegistryError> {
        self.modify(api_key, apply).await
    }

    async fn set_master_enabled(
        &self,
        api_key: &str,
        master_id: &str,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        self.modify(api_key, |entry| {
            entry
                .copier_status
                .master_accounts
                .insert(master_id.to_string(), enabled);
            true
        })
        .await
        .map(|_| ())
    }

    async fn set_slave_enabled(
        &self,
        api_key: &str,
        slave_id: &str,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        self.modify(api_key, |entry| {
            entry
                .copier_status
                .slave_accounts
                .insert(slave_id.to_string(), enabled);
            true
        })
        .await
        .map(|_| ())
    }
}
