use copier_status_file::DecodeError;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::models::{AccountKey, Role};

/// Failure to obtain the text of a status file for this cycle
#[derive(Debug, Error)]
pub enum ReadError {
    /// Missing, unreadable or timed out. Expected and frequent: the terminal
    /// may simply not have started yet.
    #[error("status file unavailable: {path}: {reason}")]
    FileUnavailable { path: PathBuf, reason: String },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no registry document for this API key")]
    NotFound,

    /// The stored document does not parse. Operations for this key stay
    /// blocked until the file is repaired by hand.
    #[error("registry document {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("registry I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize registry document: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RegistryError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, RegistryError::Corrupt { .. })
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("unknown API key")]
    UnknownApiKey,

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("copy enablement cannot be set for {0} accounts")]
    InvalidRole(Role),

    #[error("cannot merge {0} into itself")]
    SelfMerge(AccountKey),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
