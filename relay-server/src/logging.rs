use crate::config::LoggingConfig;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Initialize console logging plus optional rolling file output.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    // Default to info level for all modules; can be overridden via RUST_LOG env var
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if !config.enabled {
        subscriber.init();
        return None;
    }

    use std::fs;
    use tracing_appender::rolling;

    if let Err(e) = fs::create_dir_all(&config.directory) {
        eprintln!("Failed to create log directory {}: {}", config.directory, e);
    }

    cleanup_old_logs(config);

    let file_appender = match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.directory, &config.file_prefix),
        "never" => rolling::never(&config.directory, &config.file_prefix),
        _ => rolling::daily(&config.directory, &config.file_prefix), // default to daily
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // No ANSI colors in file output
    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .boxed()
    };

    subscriber.with(file_layer).init();
    Some(guard)
}

/// Clean up old log files based on retention policy
pub fn cleanup_old_logs(logging_config: &LoggingConfig) {
    use std::fs;
    use std::time::SystemTime;

    // Skip cleanup if both max_files and max_age_days are 0 (unlimited)
    if logging_config.max_files == 0 && logging_config.max_age_days == 0 {
        return;
    }

    let log_dir = std::path::Path::new(&logging_config.directory);
    if !log_dir.exists() {
        return;
    }

    // Read all files in the log directory
    let mut log_files: Vec<_> = match fs::read_dir(log_dir) {
        Ok(entries) => entries
            .filter_map(|entry_res| {
                let entry = entry_res.ok()?;
                let metadata = entry.metadata().ok()?;

                // Ensure it's a file, not a directory
                if !metadata.is_file() {
                    return None;
                }

                let file_name = entry.file_name();
                let name = file_name.to_str()?;

                // Check prefix matches
                if !name.starts_with(&logging_config.file_prefix) {
                    return None;
                }

                let modified = metadata.modified().ok()?;
                Some((entry.path(), modified))
            })
            .collect(),
        Err(e) => {
            eprintln!("Failed to read log directory: {}", e);
            return;
        }
    };

    // Sort by modified time (newest first)
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let now = SystemTime::now();
    let max_age_duration = Duration::from_secs((logging_config.max_age_days as u64) * 24 * 60 * 60);
    let mut deleted_count = 0;

    // Delete old files based on retention policy
    for (idx, (path, modified)) in log_files.iter().enumerate() {
        let mut should_delete = false;

        // Check if exceeds max file count
        if logging_config.max_files > 0 && idx >= logging_config.max_files as usize {
            should_delete = true;
        }

        // Check if exceeds max age
        if logging_config.max_age_days > 0 {
            if let Ok(age) = now.duration_since(*modified) {
                if age > max_age_duration {
                    should_delete = true;
                }
            }
        }

        if should_delete {
            match fs::remove_file(path) {
                Ok(_) => {
                    deleted_count += 1;
                    eprintln!("Deleted old log file: {:?}", path);
                }
                Err(e) => {
                    eprintln!("Failed to delete log file {:?}: {}", path, e);
                }
            }
        }
    }

    if deleted_count > 0 {
        eprintln!("Cleaned up {} old log file(s)", deleted_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_for(dir: &std::path::Path, max_files: u32) -> LoggingConfig {
        LoggingConfig {
            directory: dir.to_string_lossy().into_owned(),
            max_files,
            max_age_days: 0,
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            let path = dir.path().join(format!("copier-status-relay.2026-01-0{}", i + 1));
            fs::write(&path, "log").unwrap();
            let modified = std::time::SystemTime::now() - Duration::from_secs(3600 * (4 - i));
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(modified)
                .unwrap();
        }
        fs::write(dir.path().join("other.log"), "keep").unwrap();

        cleanup_old_logs(&config_for(dir.path(), 2));

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "copier-status-relay.2026-01-03",
                "copier-status-relay.2026-01-04",
                "other.log"
            ]
        );
    }

    #[test]
    fn test_cleanup_unlimited_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("copier-status-relay.1"), "log").unwrap();
        cleanup_old_logs(&config_for(dir.path(), 0));
        assert!(dir.path().join("copier-status-relay.1").exists());
    }
}
