//! QR File Writer
//!
//! Consumer side of the configuration subsystem. The writer re-reads the
//! effective directory from the provider immediately before every write and
//! never caches it, since a roots announcement may change it between calls.
//! Pixel encoding is behind the `QrEncoder` seam and out of scope here.

use crate::config::ConfigProvider;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Errors surfaced to the writer's caller; a failed write never crashes the
/// server even when the fallback default directory itself is unusable
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("QR encoding failed: {0}")]
    Encode(String),

    #[error("failed to write QR file: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque encoder seam: data in, image bytes out
pub trait QrEncoder: Send + Sync {
    fn encode(&self, data: &str) -> Result<Vec<u8>, WriteError>;

    fn file_extension(&self) -> &'static str {
        "png"
    }
}

/// Writes encoded QR images into the currently effective directory
pub struct QrFileWriter {
    provider: Arc<ConfigProvider>,
    encoder: Box<dyn QrEncoder>,
}

impl QrFileWriter {
    pub fn new(provider: Arc<ConfigProvider>, encoder: Box<dyn QrEncoder>) -> Self {
        Self { provider, encoder }
    }

    /// Encode `data` and write it; returns the full path of the new file
    pub fn write(&self, data: &str) -> Result<PathBuf, WriteError> {
        // Effective directory is re-read per write, never cached
        let dir = self.provider.get_current_directory();
        std::fs::create_dir_all(&dir)?;

        let bytes = self.encoder.encode(data)?;

        let name = format!(
            "qr_{}_{}.{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8],
            self.encoder.file_extension()
        );
        let path = dir.join(name);
        std::fs::write(&path, bytes)?;

        info!(path = %path.display(), "QR image written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct StubEncoder;

    impl QrEncoder for StubEncoder {
        fn encode(&self, data: &str) -> Result<Vec<u8>, WriteError> {
            if data.is_empty() {
                return Err(WriteError::Encode("empty payload".to_string()));
            }
            Ok(data.as_bytes().to_vec())
        }
    }

    #[test]
    fn test_write_lands_in_current_directory() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(ConfigProvider::new(temp.path().join("default")));
        let writer = QrFileWriter::new(Arc::clone(&provider), Box::new(StubEncoder));

        let path = writer.write("wc:session@2").unwrap();
        assert!(path.starts_with(temp.path().join("default")));
        assert_eq!(std::fs::read(&path).unwrap(), b"wc:session@2");
    }

    #[test]
    fn test_write_follows_directory_change() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(ConfigProvider::new(temp.path().join("default")));
        let writer = QrFileWriter::new(Arc::clone(&provider), Box::new(StubEncoder));

        writer.write("first").unwrap();

        let moved = temp.path().join("moved");
        provider.update_from_external(moved.clone());

        let path = writer.write("second").unwrap();
        assert!(path.starts_with(&moved));
    }

    #[test]
    fn test_encoder_failure_surfaces() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(ConfigProvider::new(temp.path().join("default")));
        let writer = QrFileWriter::new(provider, Box::new(StubEncoder));

        let err = writer.write("").unwrap_err();
        assert!(matches!(err, WriteError::Encode(_)));
    }
}
