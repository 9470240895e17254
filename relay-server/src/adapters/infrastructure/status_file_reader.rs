use async_trait::async_trait;
use copier_status_file::{DecoderRegistry, Platform};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ReadError;
use crate::ports::StatusFileSource;

/// Reads status files from the local filesystem with a per-read timeout
pub struct FsStatusFileReader {
    decoders: DecoderRegistry,
    read_timeout: Duration,
}

impl FsStatusFileReader {
    pub fn new(decoders: DecoderRegistry, read_timeout: Duration) -> Self {
        Self {
            decoders,
            read_timeout,
        }
    }
}

#[async_trait]
impl StatusFileSource for FsStatusFileReader {
    async fn read(&self, path: &Path, hint: Option<Platform>) -> Result<String, ReadError> {
        let bytes = match tokio::time::timeout(self.read_timeout, tokio::fs::read(path)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                return Err(ReadError::FileUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ReadError::FileUnavailable {
                    path: path.to_path_buf(),
                    reason: format!("read timed out after {:?}", self.read_timeout),
                })
            }
        };

        self.decoders
            .decode(&bytes, hint.as_ref())
            .map_err(|source| ReadError::Decode {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn list(&self, directory: &Path, extensions: &[String]) -> Vec<PathBuf> {
        match tokio::time::timeout(self.read_timeout, scan_directory(directory, extensions)).await {
            Ok(files) => files,
            Err(_) => {
                tracing::warn!(
                    directory = %directory.display(),
                    timeout = ?self.read_timeout,
                    "Status directory scan timed out"
                );
                Vec::new()
            }
        }
    }
}

async fn scan_directory(directory: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(directory = %directory.display(), error = %e, "Status directory not readable");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file && has_extension(&path, extensions) {
                    files.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(directory = %directory.display(), error = %e, "Stopped scanning status directory");
                break;
            }
        }
    }

    files.sort();
    files
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}
