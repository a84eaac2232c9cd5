//! Logging initialization for the TV client.

use crate::{CoreResult, Paths};

const SERVICE_NAME: &str = "pixlme-tv";

/// Initialize logging for the client.
///
/// Compact lines go to stderr; structured JSONL is appended to
/// `~/.pixlme-tv/logs/client.jsonl`. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str, paths: &Paths) -> CoreResult<()> {
    paths.ensure_dirs()?;
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("tv"));

        init_logging("debug", &paths).unwrap();
        tracing::info!(device_id = "tv-1", "logging ready");

        assert!(paths.logs_dir().is_dir());
    }
}
