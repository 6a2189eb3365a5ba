//! Media library integration
//!
//! The attachment store owned by the hosting platform: where uploads live,
//! which attachments exist, and how their size variants are generated.

pub mod fs;
pub mod mock;

pub use fs::FsMediaLibrary;
pub use mock::MockMediaLibrary;

use crate::models::{Attachment, AttachmentId, AttachmentMetadata, NewAttachment, UploadDir};
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Current upload target. The directory exists once this returns.
    async fn upload_dir(&self) -> Result<UploadDir>;

    /// Ids of every attachment whose mime type is in `mime_types`, any status.
    async fn query_images(&self, mime_types: &[&str]) -> Result<Vec<AttachmentId>>;

    async fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>>;

    async fn attached_file(&self, id: AttachmentId) -> Result<PathBuf>;

    async fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMetadata>>;

    /// (Re)generates every size variant from the primary file. Does not persist.
    async fn generate_metadata(&self, id: AttachmentId, path: &Path)
        -> Result<AttachmentMetadata>;

    async fn update_metadata(&self, id: AttachmentId, metadata: AttachmentMetadata)
        -> Result<()>;

    async fn insert_attachment(&self, attachment: NewAttachment, path: &Path)
        -> Result<AttachmentId>;

    async fn attachment_url(&self, id: AttachmentId) -> Result<String>;
}

/// Returns `filename`, or `stem-N.ext` for the first N not already present in `dir`.
pub fn unique_filename(dir: &Path, filename: &str) -> String {
    if !dir.join(filename).exists() {
        return filename.to_string();
    }

    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let ext = path.extension().and_then(|e| e.to_str());

    let mut n: u32 = 1;
    loop {
        let candidate = match ext {
            Some(ext) => format!("{}-{}.{}", stem, n, ext),
            None => format!("{}-{}", stem, n),
        };
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Strips everything but ASCII alphanumerics, `.`, `-` and `_`; whitespace becomes `-`.
pub fn sanitize_file_name(name: &str) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let stem = match clean_segment(stem) {
        s if s.is_empty() => "image".to_string(),
        s => s,
    };
    match ext.map(clean_segment).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

fn clean_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_') {
            Some(c)
        } else if c == '-' || c.is_whitespace() {
            Some('-')
        } else {
            None
        };

        if let Some(c) = mapped {
            if c == '-' && out.ends_with('-') {
                continue;
            }
            out.push(c);
        }
    }

    out.trim_matches(|c| matches!(c, '.' | '-' | '_')).to_string()
}
