use super::{CompressError, CompressResult, CompressedImage, CompressionService, ImageKind};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Records every path it is asked to compress without touching the disk.
#[derive(Clone)]
pub struct MockCompressor {
    calls: Arc<Mutex<Vec<PathBuf>>>,
    failing: Arc<Mutex<HashSet<PathBuf>>>,
    unsupported: Arc<Mutex<HashSet<PathBuf>>>,
    unwritable: Arc<Mutex<HashSet<PathBuf>>>,
}

impl MockCompressor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            unsupported: Arc::new(Mutex::new(HashSet::new())),
            unwritable: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Paths that fail with a decode error.
    pub fn with_failure(self, path: impl Into<PathBuf>) -> Self {
        self.failing.lock().unwrap().insert(path.into());
        self
    }

    /// Paths reported as neither JPEG nor PNG.
    pub fn with_unsupported(self, path: impl Into<PathBuf>) -> Self {
        self.unsupported.lock().unwrap().insert(path.into());
        self
    }

    /// Paths that encode fine but cannot be overwritten.
    pub fn with_write_failure(self, path: impl Into<PathBuf>) -> Self {
        self.unwritable.lock().unwrap().insert(path.into());
        self
    }

    pub fn get_calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_count_for(&self, path: &Path) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_path() == path)
            .count()
    }
}

impl Default for MockCompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompressionService for MockCompressor {
    async fn try_compress(&self, path: &Path) -> CompressResult {
        self.calls.lock().unwrap().push(path.to_path_buf());

        if self.unsupported.lock().unwrap().contains(path) {
            return Err(CompressError::UnsupportedFormat);
        }
        if self.failing.lock().unwrap().contains(path) {
            return Err(CompressError::DecodeFailed(image::ImageError::IoError(
                std::io::Error::other("Mock failure"),
            )));
        }
        if self.unwritable.lock().unwrap().contains(path) {
            return Err(CompressError::WriteFailed(std::io::Error::other(
                "Mock write failure",
            )));
        }

        Ok(CompressedImage {
            kind: ImageKind::Jpeg,
            original_size: 0,
            compressed_size: 0,
        })
    }
}
