//! External image localization
//!
//! Finds `<img>` tags pointing outside the site, re-hosts each image in the
//! media library and rewrites the content to reference the local copy.

use crate::fetch::ImageFetcher;
use crate::hooks::compress_variants;
use crate::image::{mime_from_filename, CompressionService};
use crate::library::{sanitize_file_name, unique_filename, MediaLibrary};
use crate::models::{AttachmentId, NewAttachment, Post};
use crate::Result;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const IMG_SRC_PATTERN: &str = r#"(?i)<img[^>]+src=['"]([^'"]+)['"][^>]*>"#;

pub struct ExternalImageLocalizer {
    site_url: String,
    library: Arc<dyn MediaLibrary>,
    fetcher: Arc<dyn ImageFetcher>,
    compressor: Arc<dyn CompressionService>,
    img_src: Regex,
}

impl ExternalImageLocalizer {
    pub fn new(
        site_url: String,
        library: Arc<dyn MediaLibrary>,
        fetcher: Arc<dyn ImageFetcher>,
        compressor: Arc<dyn CompressionService>,
    ) -> Result<Self> {
        Ok(Self {
            site_url,
            library,
            fetcher,
            compressor,
            img_src: Regex::new(IMG_SRC_PATTERN)?,
        })
    }

    /// Content-save filter.
    pub async fn localize(&self, content: String) -> String {
        if content.is_empty() {
            return content;
        }

        let mut content = content;
        for url in self.extract_image_urls(&content) {
            if self.is_local(&url) {
                debug!("Keeping local image {}", url);
                continue;
            }

            match self.localize_image(&url).await {
                Ok(local_url) => {
                    info!("Localized {} -> {}", url, local_url);
                    content = content.replace(&url, &local_url);
                }
                Err(e) => warn!("Leaving external image {} in place: {}", url, e),
            }
        }

        content
    }

    /// Structured-editor pre-insert filter.
    pub async fn localize_post(&self, mut post: Post) -> Post {
        if !post.content.is_empty() {
            post.content = self.localize(std::mem::take(&mut post.content)).await;
        }
        post
    }

    /// Every distinct `src` of an `<img>` tag, in document order.
    pub fn extract_image_urls(&self, content: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for captures in self.img_src.captures_iter(content) {
            let url = &captures[1];
            if !urls.iter().any(|seen| seen == url) {
                urls.push(url.to_string());
            }
        }
        urls
    }

    pub fn is_local(&self, url: &str) -> bool {
        url.contains(&self.site_url)
    }

    async fn localize_image(&self, url: &str) -> Result<String> {
        let bytes = self.fetcher.fetch(url).await?;

        let upload = self.library.upload_dir().await?;
        let filename = filename_from_url(url);
        let unique = unique_filename(&upload.path, &filename);
        let path = upload.path.join(&unique);

        let attachment = NewAttachment::new(
            filename.clone(),
            mime_from_filename(&filename).map(str::to_string),
        );
        let id = match self.store(&path, &bytes, attachment).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove {}: {}", path.display(), cleanup);
                    }
                }
                return Err(e);
            }
        };

        // Registered from here on; missing variants do not undo the attachment.
        match self.library.generate_metadata(id, &path).await {
            Ok(metadata) => {
                compress_variants(self.compressor.as_ref(), &metadata, &upload.basedir).await;
                if let Err(e) = self.library.update_metadata(id, metadata).await {
                    warn!("Failed to save variants of attachment {}: {}", id, e);
                }
            }
            Err(e) => warn!("Failed to generate variants of attachment {}: {}", id, e),
        }

        self.library.attachment_url(id).await
    }

    /// Writes, encodes and registers the download. The caller removes `path` on error.
    async fn store(
        &self,
        path: &Path,
        bytes: &[u8],
        attachment: NewAttachment,
    ) -> Result<AttachmentId> {
        tokio::fs::write(path, bytes).await?;
        self.compressor.compress(path).await;
        self.library.insert_attachment(attachment, path).await
    }
}

/// Last path segment of `url`, stripped of query and fragment, sanitized.
pub fn filename_from_url(url: &str) -> String {
    let name = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            path.rsplit('/').next().unwrap_or_default().to_string()
        }
    };

    sanitize_file_name(&name)
}
