//! Application wiring for the host entry points.

use crate::batch::{BatchCompressor, BatchReport, CancelFlag};
use crate::fetch::{HttpFetcher, ImageFetcher};
use crate::hooks::UploadHook;
use crate::image::{mime_from_filename, CompressionService, ImageCompressor};
use crate::library::{sanitize_file_name, unique_filename, FsMediaLibrary, MediaLibrary};
use crate::localizer::ExternalImageLocalizer;
use crate::models::{AttachmentId, AttachmentMetadata, Config, NewAttachment, Post, UploadedFile};
use crate::nonce::{NonceGuard, BATCH_COMPRESS_ACTION};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Connects the encoder, upload hooks, batch walker and localizer to one media library.
pub struct App {
    library: Arc<dyn MediaLibrary>,
    compressor: Arc<dyn CompressionService>,
    upload_hook: UploadHook,
    localizer: ExternalImageLocalizer,
    nonce: NonceGuard,
    config: Config,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub library: Arc<dyn MediaLibrary>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub compressor: Arc<dyn CompressionService>,
}

impl App {
    pub fn with_services(services: AppServices, config: Config) -> Result<Self> {
        let upload_hook =
            UploadHook::new(services.compressor.clone(), config.upload_basedir.clone());
        let localizer = ExternalImageLocalizer::new(
            config.site_url.clone(),
            services.library.clone(),
            services.fetcher,
            services.compressor.clone(),
        )?;

        Ok(Self {
            library: services.library,
            compressor: services.compressor,
            upload_hook,
            localizer,
            nonce: NonceGuard::new(config.nonce_secret.clone()),
            config,
        })
    }

    /// Construct an app backed by the on-disk media library described by `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let library = FsMediaLibrary::open(&config.upload_basedir, &config.upload_baseurl).await?;
        info!(
            "Media library at {} (served from {})",
            config.upload_basedir.display(),
            config.upload_baseurl
        );

        let services = AppServices {
            library: Arc::new(library),
            fetcher: Arc::new(HttpFetcher::new(config.fetch_timeout)?),
            compressor: Arc::new(ImageCompressor::new(config.policy)),
        };

        Self::with_services(services, config)
    }

    pub fn library(&self) -> &Arc<dyn MediaLibrary> {
        &self.library
    }

    pub async fn handle_upload(&self, file: UploadedFile) -> UploadedFile {
        self.upload_hook.handle_upload(file).await
    }

    pub async fn on_attachment_metadata(
        &self,
        metadata: AttachmentMetadata,
        attachment_id: AttachmentId,
    ) -> AttachmentMetadata {
        self.upload_hook
            .on_attachment_metadata(metadata, attachment_id)
            .await
    }

    /// Runs a local file through the whole upload pipeline and returns the new attachment.
    pub async fn import_upload(&self, source: &Path) -> Result<AttachmentId> {
        let original_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Generic(format!("Invalid upload path: {}", source.display())))?;
        let filename = sanitize_file_name(original_name);

        let upload = self.library.upload_dir().await?;
        let target = upload.path.join(unique_filename(&upload.path, &filename));
        tokio::fs::copy(source, &target).await?;

        let mime_type = mime_from_filename(&filename).map(str::to_string);
        let uploaded = self
            .handle_upload(UploadedFile {
                file: target,
                mime_type: mime_type.clone().unwrap_or_default(),
            })
            .await;

        let id = self
            .library
            .insert_attachment(NewAttachment::new(filename, mime_type), &uploaded.file)
            .await?;
        let metadata = self.library.generate_metadata(id, &uploaded.file).await?;
        let metadata = self.on_attachment_metadata(metadata, id).await;
        self.library.update_metadata(id, metadata).await?;

        info!("Imported {} as attachment {}", source.display(), id);
        Ok(id)
    }

    pub fn issue_batch_token(&self) -> String {
        self.nonce.create(BATCH_COMPRESS_ACTION)
    }

    /// Admin action: verifies `token` before touching a single file.
    pub async fn batch_compress_images(
        &self,
        token: Option<&str>,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        self.nonce.verify(BATCH_COMPRESS_ACTION, token)?;

        let mut batch = BatchCompressor::new(self.library.clone(), self.compressor.clone());
        if let Some(path) = &self.config.batch_checkpoint {
            batch = batch.with_checkpoint(path.clone());
        }
        batch.run(cancel).await
    }

    /// Content-save filter.
    pub async fn save_content(&self, content: String) -> String {
        self.localizer.localize(content).await
    }

    /// Structured-editor pre-insert filter.
    pub async fn save_post(&self, post: Post) -> Post {
        self.localizer.localize_post(post).await
    }
}
