use super::MediaLibrary;
use crate::models::{
    Attachment, AttachmentId, AttachmentMetadata, NewAttachment, SizeVariant, UploadDir,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Local;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const INDEX_FILE: &str = "library.json";

/// A named variant size; `crop` fills the box exactly instead of fitting inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSize {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub crop: bool,
}

impl ImageSize {
    pub fn new(name: &str, width: u32, height: u32, crop: bool) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            crop,
        }
    }
}

pub fn default_image_sizes() -> Vec<ImageSize> {
    vec![
        ImageSize::new("thumbnail", 150, 150, true),
        ImageSize::new("medium", 300, 300, false),
        ImageSize::new("large", 1024, 1024, false),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryIndex {
    next_id: AttachmentId,
    attachments: Vec<Attachment>,
}

impl LibraryIndex {
    fn find(&self, id: AttachmentId) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == id)
    }

    fn find_mut(&mut self, id: AttachmentId) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.id == id)
    }
}

/// Media library kept on local disk, indexed by a JSON file in the base directory.
pub struct FsMediaLibrary {
    basedir: PathBuf,
    baseurl: String,
    sizes: Vec<ImageSize>,
    fixed_subdir: Option<String>,
    index: Mutex<LibraryIndex>,
}

impl FsMediaLibrary {
    pub async fn open(basedir: &Path, baseurl: &str) -> Result<Self> {
        tokio::fs::create_dir_all(basedir).await?;

        let index_path = basedir.join(INDEX_FILE);
        let index = if tokio::fs::try_exists(&index_path).await? {
            let raw = tokio::fs::read_to_string(&index_path).await?;
            let index: LibraryIndex = serde_json::from_str(&raw)?;
            info!(
                "Loaded media library with {} attachments from {}",
                index.attachments.len(),
                index_path.display()
            );
            index
        } else {
            LibraryIndex {
                next_id: 1,
                attachments: Vec::new(),
            }
        };

        Ok(Self {
            basedir: basedir.to_path_buf(),
            baseurl: baseurl.trim_end_matches('/').to_string(),
            sizes: default_image_sizes(),
            fixed_subdir: None,
            index: Mutex::new(index),
        })
    }

    /// Pins the upload subdirectory instead of deriving `YYYY/MM` from the clock.
    pub fn with_fixed_subdir(mut self, subdir: &str) -> Self {
        self.fixed_subdir = Some(subdir.trim_matches('/').to_string());
        self
    }

    fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.basedir).map_err(|_| {
            Error::Library(format!(
                "{} is outside the upload directory {}",
                path.display(),
                self.basedir.display()
            ))
        })?;

        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    async fn persist(&self, index: &LibraryIndex) -> Result<()> {
        let json = serde_json::to_string_pretty(index)?;
        tokio::fs::write(self.basedir.join(INDEX_FILE), json).await?;
        Ok(())
    }

    fn generate_variants_sync(
        path: PathBuf,
        relative: String,
        sizes: Vec<ImageSize>,
    ) -> Result<AttachmentMetadata> {
        let reader = ImageReader::open(&path)?.with_guessed_format()?;
        let format = reader.format();

        let image = match reader.decode() {
            Ok(image) => image,
            Err(e) => {
                debug!("{} is not a decodable image: {}", path.display(), e);
                return Ok(AttachmentMetadata {
                    file: relative,
                    ..Default::default()
                });
            }
        };

        let mut metadata = AttachmentMetadata {
            file: relative,
            width: image.width(),
            height: image.height(),
            sizes: BTreeMap::new(),
        };

        let Some(format) = format else {
            return Ok(metadata);
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .or_else(|| format.extensions_str().first().map(|e| e.to_string()))
            .unwrap_or_default();

        for size in &sizes {
            let Some(resized) = resize_for(&image, size) else {
                continue;
            };

            let file = format!("{}-{}x{}.{}", stem, resized.width(), resized.height(), ext);
            let variant_path = dir.join(&file);
            if let Err(e) = save_variant(&resized, &variant_path, format) {
                warn!("Failed to write {} variant {}: {}", size.name, file, e);
                continue;
            }

            metadata.sizes.insert(
                size.name.clone(),
                SizeVariant {
                    file,
                    width: resized.width(),
                    height: resized.height(),
                    mime_type: Some(format.to_mime_type().to_string()),
                },
            );
        }

        Ok(metadata)
    }
}

fn resize_for(image: &DynamicImage, size: &ImageSize) -> Option<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    if width <= size.width && height <= size.height {
        return None;
    }

    let resized = if size.crop {
        image.resize_to_fill(
            size.width.min(width),
            size.height.min(height),
            FilterType::Lanczos3,
        )
    } else {
        image.resize(size.width, size.height, FilterType::Lanczos3)
    };

    if resized.width() == width && resized.height() == height {
        None
    } else {
        Some(resized)
    }
}

fn save_variant(image: &DynamicImage, path: &Path, format: ImageFormat) -> Result<()> {
    match format {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, format)?,
        _ => image.save_with_format(path, format)?,
    }
    Ok(())
}

#[async_trait]
impl MediaLibrary for FsMediaLibrary {
    async fn upload_dir(&self) -> Result<UploadDir> {
        let subdir = match &self.fixed_subdir {
            Some(subdir) => subdir.clone(),
            None => Local::now().format("%Y/%m").to_string(),
        };

        let path = self.basedir.join(&subdir);
        tokio::fs::create_dir_all(&path).await?;

        Ok(UploadDir {
            path,
            url: format!("{}/{}", self.baseurl, subdir),
            subdir: format!("/{}", subdir),
            basedir: self.basedir.clone(),
            baseurl: self.baseurl.clone(),
        })
    }

    async fn query_images(&self, mime_types: &[&str]) -> Result<Vec<AttachmentId>> {
        let index = self.index.lock().await;
        Ok(index
            .attachments
            .iter()
            .filter(|a| {
                a.mime_type
                    .as_deref()
                    .is_some_and(|mime| mime_types.contains(&mime))
            })
            .map(|a| a.id)
            .collect())
    }

    async fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        Ok(self.index.lock().await.find(id).cloned())
    }

    async fn attached_file(&self, id: AttachmentId) -> Result<PathBuf> {
        let index = self.index.lock().await;
        let attachment = index
            .find(id)
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))?;
        Ok(self.basedir.join(&attachment.file))
    }

    async fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMetadata>> {
        Ok(self
            .index
            .lock()
            .await
            .find(id)
            .and_then(|a| a.metadata.clone()))
    }

    async fn generate_metadata(
        &self,
        id: AttachmentId,
        path: &Path,
    ) -> Result<AttachmentMetadata> {
        let relative = self.relative_path(path)?;

        let metadata = tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            let sizes = self.sizes.clone();
            move || Self::generate_variants_sync(path, relative, sizes)
        })
        .await
        .map_err(|e| Error::Generic(format!("Variant generation task join error: {}", e)))??;

        info!(
            "Generated {} size variants for attachment {}",
            metadata.sizes.len(),
            id
        );
        Ok(metadata)
    }

    async fn update_metadata(&self, id: AttachmentId, metadata: AttachmentMetadata) -> Result<()> {
        let mut index = self.index.lock().await;
        let mut updated = index.clone();
        let attachment = updated
            .find_mut(id)
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))?;
        attachment.metadata = Some(metadata);

        self.persist(&updated).await?;
        *index = updated;
        Ok(())
    }

    async fn insert_attachment(&self, attachment: NewAttachment, path: &Path) -> Result<AttachmentId> {
        let file = self.relative_path(path)?;

        let mut index = self.index.lock().await;
        let mut updated = index.clone();
        let id = updated.next_id.max(1);
        updated.next_id = id + 1;
        updated.attachments.push(Attachment {
            id,
            file,
            mime_type: attachment.mime_type,
            title: attachment.title,
            status: attachment.status,
            metadata: None,
        });

        // The in-memory index only changes once library.json has it.
        self.persist(&updated).await?;
        *index = updated;

        debug!("Registered attachment {} for {}", id, path.display());
        Ok(id)
    }

    async fn attachment_url(&self, id: AttachmentId) -> Result<String> {
        let index = self.index.lock().await;
        let attachment = index
            .find(id)
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))?;
        Ok(format!("{}/{}", self.baseurl, attachment.file))
    }
}
