use super::MediaLibrary;
use crate::models::{
    Attachment, AttachmentId, AttachmentMetadata, NewAttachment, SizeVariant, UploadDir,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// In-memory media library. Variant generation only reports, never writes files.
#[derive(Clone)]
pub struct MockMediaLibrary {
    basedir: PathBuf,
    baseurl: String,
    subdir: String,
    attachments: Arc<Mutex<BTreeMap<AttachmentId, Attachment>>>,
    generated_sizes: Arc<Mutex<BTreeMap<String, SizeVariant>>>,
    generate_calls: Arc<Mutex<Vec<AttachmentId>>>,
    update_calls: Arc<Mutex<Vec<AttachmentId>>>,
    failing_inserts: bool,
}

impl MockMediaLibrary {
    pub fn new(basedir: &Path) -> Self {
        Self {
            basedir: basedir.to_path_buf(),
            baseurl: "http://mysite.test/uploads".to_string(),
            subdir: "2024/05".to_string(),
            attachments: Arc::new(Mutex::new(BTreeMap::new())),
            generated_sizes: Arc::new(Mutex::new(BTreeMap::new())),
            generate_calls: Arc::new(Mutex::new(Vec::new())),
            update_calls: Arc::new(Mutex::new(Vec::new())),
            failing_inserts: false,
        }
    }

    pub fn with_baseurl(mut self, baseurl: String) -> Self {
        self.baseurl = baseurl.trim_end_matches('/').to_string();
        self
    }

    /// Every `insert_attachment` call fails.
    pub fn with_failing_inserts(mut self) -> Self {
        self.failing_inserts = true;
        self
    }

    pub fn with_attachment(self, attachment: Attachment) -> Self {
        self.attachments
            .lock()
            .unwrap()
            .insert(attachment.id, attachment);
        self
    }

    /// Variant reported by every `generate_metadata` call, named after the primary file's stem.
    pub fn with_generated_size(self, name: &str, width: u32, height: u32) -> Self {
        self.generated_sizes.lock().unwrap().insert(
            name.to_string(),
            SizeVariant {
                file: format!("{{stem}}-{}x{}.jpg", width, height),
                width,
                height,
                mime_type: Some("image/jpeg".to_string()),
            },
        );
        self
    }

    pub fn get_attachments(&self) -> Vec<Attachment> {
        self.attachments.lock().unwrap().values().cloned().collect()
    }

    pub fn get_generate_calls(&self) -> Vec<AttachmentId> {
        self.generate_calls.lock().unwrap().clone()
    }

    pub fn get_update_calls(&self) -> Vec<AttachmentId> {
        self.update_calls.lock().unwrap().clone()
    }

    fn relative_path(&self, path: &Path) -> Result<String> {
        path.strip_prefix(&self.basedir)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| Error::Library(format!("{} is outside the library", path.display())))
    }
}

#[async_trait]
impl MediaLibrary for MockMediaLibrary {
    async fn upload_dir(&self) -> Result<UploadDir> {
        let path = self.basedir.join(&self.subdir);
        std::fs::create_dir_all(&path)?;

        Ok(UploadDir {
            path,
            url: format!("{}/{}", self.baseurl, self.subdir),
            subdir: format!("/{}", self.subdir),
            basedir: self.basedir.clone(),
            baseurl: self.baseurl.clone(),
        })
    }

    async fn query_images(&self, mime_types: &[&str]) -> Result<Vec<AttachmentId>> {
        Ok(self
            .attachments
            .lock()
            .unwrap()
            .values()
            .filter(|a| {
                a.mime_type
                    .as_deref()
                    .is_some_and(|mime| mime_types.contains(&mime))
            })
            .map(|a| a.id)
            .collect())
    }

    async fn get_attachment(&self, id: AttachmentId) -> Result<Option<Attachment>> {
        Ok(self.attachments.lock().unwrap().get(&id).cloned())
    }

    async fn attached_file(&self, id: AttachmentId) -> Result<PathBuf> {
        self.attachments
            .lock()
            .unwrap()
            .get(&id)
            .map(|a| self.basedir.join(&a.file))
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))
    }

    async fn metadata(&self, id: AttachmentId) -> Result<Option<AttachmentMetadata>> {
        Ok(self
            .attachments
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|a| a.metadata.clone()))
    }

    async fn generate_metadata(
        &self,
        id: AttachmentId,
        path: &Path,
    ) -> Result<AttachmentMetadata> {
        self.generate_calls.lock().unwrap().push(id);

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let sizes = self
            .generated_sizes
            .lock()
            .unwrap()
            .iter()
            .map(|(name, variant)| {
                let mut variant = variant.clone();
                variant.file = variant.file.replace("{stem}", &stem);
                (name.clone(), variant)
            })
            .collect();

        Ok(AttachmentMetadata {
            file: self.relative_path(path)?,
            width: 0,
            height: 0,
            sizes,
        })
    }

    async fn update_metadata(&self, id: AttachmentId, metadata: AttachmentMetadata) -> Result<()> {
        self.update_calls.lock().unwrap().push(id);

        let mut attachments = self.attachments.lock().unwrap();
        let attachment = attachments
            .get_mut(&id)
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))?;
        attachment.metadata = Some(metadata);
        Ok(())
    }

    async fn insert_attachment(&self, attachment: NewAttachment, path: &Path) -> Result<AttachmentId> {
        if self.failing_inserts {
            return Err(Error::Library(format!("Mock insert failure for {}", path.display())));
        }
        let file = self.relative_path(path)?;

        let mut attachments = self.attachments.lock().unwrap();
        let id = attachments.keys().next_back().map_or(1, |last| last + 1);
        attachments.insert(
            id,
            Attachment {
                id,
                file,
                mime_type: attachment.mime_type,
                title: attachment.title,
                status: attachment.status,
                metadata: None,
            },
        );
        Ok(id)
    }

    async fn attachment_url(&self, id: AttachmentId) -> Result<String> {
        self.attachments
            .lock()
            .unwrap()
            .get(&id)
            .map(|a| format!("{}/{}", self.baseurl, a.file))
            .ok_or_else(|| Error::Library(format!("Attachment {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_library_insert_and_url() {
        let library = MockMediaLibrary::new(Path::new("/srv/uploads"));

        let id = library
            .insert_attachment(
                NewAttachment::new("a.jpg".to_string(), Some("image/jpeg".to_string())),
                Path::new("/srv/uploads/2024/05/a.jpg"),
            )
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(
            library.attachment_url(id).await.unwrap(),
            "http://mysite.test/uploads/2024/05/a.jpg"
        );
        assert_eq!(library.query_images(&["image/jpeg"]).await.unwrap(), vec![1]);
        assert!(library.query_images(&["image/png"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_library_generated_sizes() {
        let library =
            MockMediaLibrary::new(Path::new("/srv/uploads")).with_generated_size("thumbnail", 150, 150);

        let metadata = library
            .generate_metadata(3, Path::new("/srv/uploads/2024/05/cat.jpg"))
            .await
            .unwrap();

        assert_eq!(metadata.file, "2024/05/cat.jpg");
        assert_eq!(metadata.sizes["thumbnail"].file, "cat-150x150.jpg");
        assert_eq!(library.get_generate_calls(), vec![3]);
    }

    #[tokio::test]
    async fn test_mock_library_update_missing_attachment() {
        let library = MockMediaLibrary::new(Path::new("/srv/uploads"));
        let err = library
            .update_metadata(9, AttachmentMetadata::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
