//! Shared logging utilities for QRForge binaries.
//!
//! Initializes `tracing` with two layers: a size-capped rotating file writer
//! under the QRForge home directory and a stderr layer. The MCP transport
//! owns stdout, so nothing here may ever write there.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "qrforge=info,qrforge_mcp=info";
const MAX_ROTATED_FILES: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Logging configuration shared by QRForge binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = LogWriter::open(log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let stderr_filter = if config.verbose {
        file_filter.to_string()
    } else {
        "warn".to_string()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(stderr_filter)),
        )
        .init();

    Ok(())
}

/// QRForge home directory: QRFORGE_HOME override, else ~/.qrforge
pub fn qrforge_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("QRFORGE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".qrforge")
}

/// Logs directory: <home>/logs
pub fn logs_dir() -> PathBuf {
    qrforge_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-capped log file with numbered rotations (`app.log`, `app.log.1`, ...).
struct LogFile {
    dir: PathBuf,
    base: String,
    file: File,
    written: u64,
}

impl LogFile {
    fn open(dir: PathBuf, base: &str) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let base: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{}.log", base));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            base,
            file,
            written,
        })
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = self.rotated_path(MAX_ROTATED_FILES);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..MAX_ROTATED_FILES).rev() {
            let src = self.rotated_path(index);
            if src.exists() {
                fs::rename(&src, self.rotated_path(index + 1))?;
            }
        }
        fs::rename(self.active_path(), self.rotated_path(1))?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Clonable `MakeWriter` over the shared log file.
#[derive(Clone)]
struct LogWriter {
    inner: Arc<Mutex<LogFile>>,
}

impl LogWriter {
    fn open(dir: PathBuf, base: &str) -> Result<Self> {
        let file = LogFile::open(dir, base)
            .with_context(|| format!("Failed to open log file for {}", base))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct LogWriterGuard {
    inner: Arc<Mutex<LogFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_file_appends_and_tracks_size() {
        let temp = TempDir::new().unwrap();
        let mut log = LogFile::open(temp.path().to_path_buf(), "test-app").unwrap();

        log.write_all(b"hello\n").unwrap();
        log.flush().unwrap();

        let content = fs::read_to_string(temp.path().join("test-app.log")).unwrap();
        assert_eq!(content, "hello\n");
        assert_eq!(log.written, 6);
    }

    #[test]
    fn test_base_name_sanitized() {
        let temp = TempDir::new().unwrap();
        let mut log = LogFile::open(temp.path().to_path_buf(), "bad/name app").unwrap();
        log.write_all(b"x").unwrap();
        log.flush().unwrap();

        assert!(temp.path().join("bad_name_app.log").exists());
    }

    #[test]
    fn test_rotation_moves_active_file() {
        let temp = TempDir::new().unwrap();
        let mut log = LogFile::open(temp.path().to_path_buf(), "rotate").unwrap();

        log.write_all(b"old content\n").unwrap();
        log.rotate().unwrap();
        log.write_all(b"new content\n").unwrap();
        log.flush().unwrap();

        let rotated = fs::read_to_string(temp.path().join("rotate.log.1")).unwrap();
        assert_eq!(rotated, "old content\n");
        let active = fs::read_to_string(temp.path().join("rotate.log")).unwrap();
        assert_eq!(active, "new content\n");
    }
}
