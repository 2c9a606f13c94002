//! Log subscriber setup for the plugin binary.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::LogFormat;

#[derive(Debug, Error)]
#[error("failed to install log subscriber: {0}")]
pub struct LoggingError(String);

/// `RUST_LOG` when set, otherwise `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Open `path` for appending, creating parent directories as needed.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber writing to `log_file`, or to stderr if
/// the file cannot be opened.
pub fn init(log_file: &Path, level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let (writer, open_error) = match open_log_file(log_file) {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
        Err(e) => (BoxMakeWriter::new(io::stderr), Some(e)),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(writer)
        .with_target(true);
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(false).try_init(),
    };
    installed.map_err(|e| LoggingError(e.to_string()))?;

    if let Some(error) = open_error {
        warn!(path = %log_file.display(), %error, "cannot open log file, logging to stderr");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_parents_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/s3csi.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn log_file_is_appended() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s3csi.log");
        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn unopenable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_log_file(dir.path()).is_err());
    }
}
