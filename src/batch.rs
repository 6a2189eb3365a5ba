//! Library-wide recompression
//!
//! Walks every JPEG and PNG attachment, recompresses the primary file and
//! its stored variants, then has the library regenerate the variants from
//! the recompressed original. Progress is checkpointed per attachment so an
//! interrupted pass can pick up where it stopped.

use crate::hooks::compress_variants;
use crate::image::CompressionService;
use crate::library::MediaLibrary;
use crate::models::{AttachmentId, SUPPORTED_MIME_TYPES};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Attachments whose primary file was recompressed, including earlier resumed runs.
    pub compressed: usize,
    /// Attachments visited in this run.
    pub processed: usize,
    /// Attachments skipped because a checkpoint marked them done.
    pub resumed: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn message(&self) -> String {
        format!("已壓縮 {} 張圖片，包括所有尺寸的版本。", self.compressed)
    }
}

/// Shared stop switch, checked between attachments.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub completed: BTreeSet<AttachmentId>,
    pub compressed: usize,
}

impl BatchCheckpoint {
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

pub struct BatchCompressor {
    library: Arc<dyn MediaLibrary>,
    compressor: Arc<dyn CompressionService>,
    checkpoint: Option<PathBuf>,
}

impl BatchCompressor {
    pub fn new(library: Arc<dyn MediaLibrary>, compressor: Arc<dyn CompressionService>) -> Self {
        Self {
            library,
            compressor,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, path: PathBuf) -> Self {
        self.checkpoint = Some(path);
        self
    }

    pub async fn run(&self, cancel: &CancelFlag) -> Result<BatchReport> {
        let ids = self.library.query_images(&SUPPORTED_MIME_TYPES).await?;
        let basedir = self.library.upload_dir().await?.basedir;

        let mut checkpoint = match &self.checkpoint {
            Some(path) => BatchCheckpoint::load(path).await?,
            None => BatchCheckpoint::default(),
        };
        if !checkpoint.completed.is_empty() {
            info!(
                "Resuming batch compression: {} of {} attachments already done",
                checkpoint.completed.len(),
                ids.len()
            );
        } else {
            info!("Starting batch compression of {} attachments", ids.len());
        }

        let mut report = BatchReport {
            compressed: checkpoint.compressed,
            ..Default::default()
        };

        for id in ids {
            if checkpoint.completed.contains(&id) {
                report.resumed += 1;
                continue;
            }
            if cancel.is_cancelled() {
                warn!(
                    "Batch compression cancelled after {} attachments",
                    report.processed
                );
                report.cancelled = true;
                break;
            }

            match self.compress_attachment(id, &basedir).await {
                Ok(true) => {
                    report.compressed += 1;
                    checkpoint.compressed += 1;
                }
                Ok(false) => debug!("Attachment {} was not recompressed", id),
                Err(e) => warn!("Skipping attachment {}: {}", id, e),
            }
            report.processed += 1;

            checkpoint.completed.insert(id);
            if let Some(path) = &self.checkpoint {
                checkpoint.save(path).await?;
            }
        }

        if !report.cancelled {
            if let Some(path) = &self.checkpoint {
                if tokio::fs::try_exists(path).await? {
                    tokio::fs::remove_file(path).await?;
                }
            }
        }

        info!("{}", report.message());
        Ok(report)
    }

    /// Returns whether the primary file was recompressed.
    async fn compress_attachment(&self, id: AttachmentId, basedir: &Path) -> Result<bool> {
        let path = self.library.attached_file(id).await?;
        if !self.compressor.compress(&path).await {
            return Ok(false);
        }

        if let Some(metadata) = self.library.metadata(id).await? {
            compress_variants(self.compressor.as_ref(), &metadata, basedir).await;
        }

        let metadata = self.library.generate_metadata(id, &path).await?;
        self.library.update_metadata(id, metadata).await?;

        Ok(true)
    }
}
