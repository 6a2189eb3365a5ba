//! Upload pipeline hooks
//!
//! Compresses a file as soon as it is uploaded and, once the library has
//! generated its size variants, compresses those too.

use crate::image::CompressionService;
use crate::models::{AttachmentId, AttachmentMetadata, UploadedFile};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct UploadHook {
    compressor: Arc<dyn CompressionService>,
    basedir: PathBuf,
    /// Primary files whose variants are still owed a compression pass.
    armed: Mutex<HashSet<PathBuf>>,
}

impl UploadHook {
    pub fn new(compressor: Arc<dyn CompressionService>, basedir: PathBuf) -> Self {
        Self {
            compressor,
            basedir,
            armed: Mutex::new(HashSet::new()),
        }
    }

    /// Compresses the primary file and hands the record back unchanged.
    pub async fn handle_upload(&self, file: UploadedFile) -> UploadedFile {
        match self.compressor.try_compress(&file.file).await {
            Ok(done) => {
                info!(
                    "Compressed upload {}: {} -> {} bytes",
                    file.file.display(),
                    done.original_size,
                    done.compressed_size
                );
                self.arm_variant_pass(&file.file).await;
            }
            Err(e) if e.format_recognized() => {
                debug!("Upload {} was not recompressed: {}", file.file.display(), e);
                self.arm_variant_pass(&file.file).await;
            }
            Err(e) => debug!("Upload {} left as-is: {}", file.file.display(), e),
        }

        file
    }

    /// Variant-metadata hook: compresses every generated size of an armed upload, once.
    pub async fn on_attachment_metadata(
        &self,
        metadata: AttachmentMetadata,
        attachment_id: AttachmentId,
    ) -> AttachmentMetadata {
        let primary = self.basedir.join(&metadata.file);
        if !self.armed.lock().await.remove(&primary) {
            return metadata;
        }

        let compressed =
            compress_variants(self.compressor.as_ref(), &metadata, &self.basedir).await;
        debug!(
            "Compressed {} of {} variants of attachment {}",
            compressed,
            metadata.sizes.len(),
            attachment_id
        );

        metadata
    }

    pub async fn is_armed(&self, primary: &Path) -> bool {
        self.armed.lock().await.contains(primary)
    }

    async fn arm_variant_pass(&self, primary: &Path) {
        self.armed.lock().await.insert(primary.to_path_buf());
    }
}

/// Runs the encoder over every size variant in `metadata`; returns how many were rewritten.
pub async fn compress_variants(
    compressor: &dyn CompressionService,
    metadata: &AttachmentMetadata,
    basedir: &Path,
) -> usize {
    let mut compressed = 0;
    for path in metadata.variant_paths(basedir) {
        if compressor.compress(&path).await {
            compressed += 1;
        }
    }
    compressed
}
