//! Image re-encoding
//!
//! Detects JPEG and PNG files by their header bytes and re-encodes them in
//! place with the configured [`CompressionPolicy`](crate::models::CompressionPolicy).

pub mod mime;
pub mod mock;
pub mod processor;

pub use mime::{detect_image_kind, mime_from_filename};
pub use mock::MockCompressor;
pub use processor::ImageCompressor;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Raster formats the encoder knows about. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Other,
}

impl ImageKind {
    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            ImageKind::Jpeg => Some(crate::models::MIME_JPEG),
            ImageKind::Png => Some(crate::models::MIME_PNG),
            ImageKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub kind: ImageKind,
    pub original_size: u64,
    pub compressed_size: u64,
}

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("failed to decode image: {0}")]
    DecodeFailed(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    EncodeFailed(#[source] image::ImageError),

    #[error("failed to write image: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompressError {
    /// True when the file was a JPEG or PNG, i.e. encoding was attempted.
    pub fn format_recognized(&self) -> bool {
        matches!(
            self,
            CompressError::DecodeFailed(_)
                | CompressError::EncodeFailed(_)
                | CompressError::WriteFailed(_)
        )
    }
}

pub type CompressResult = std::result::Result<CompressedImage, CompressError>;

#[async_trait]
pub trait CompressionService: Send + Sync {
    async fn try_compress(&self, path: &Path) -> CompressResult;

    /// Best-effort form: `true` only if the file was overwritten.
    async fn compress(&self, path: &Path) -> bool {
        match self.try_compress(path).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Left {} untouched: {}", path.display(), e);
                false
            }
        }
    }
}
