//! Data models and structures
//!
//! Defines attachments, size variants, posts, the compression policy and
//! the runtime configuration shared by every component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub type AttachmentId = u64;

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// Mime types the batch walker and the encoder operate on.
pub const SUPPORTED_MIME_TYPES: [&str; 2] = [MIME_JPEG, MIME_PNG];

/// Fixed re-encoding parameters, immutable once handed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    /// 0-100, higher keeps more detail.
    pub jpeg_quality: u8,
    /// 0-9, higher compresses harder. Lossless.
    pub png_compression: u8,
}

impl CompressionPolicy {
    pub const DEFAULT_JPEG_QUALITY: u8 = 80;
    pub const DEFAULT_PNG_COMPRESSION: u8 = 9;

    pub fn new(jpeg_quality: u8, png_compression: u8) -> crate::Result<Self> {
        if jpeg_quality > 100 {
            return Err(crate::Error::Config(format!(
                "JPEG quality must be within 0-100, got {}",
                jpeg_quality
            )));
        }
        if png_compression > 9 {
            return Err(crate::Error::Config(format!(
                "PNG compression level must be within 0-9, got {}",
                png_compression
            )));
        }

        Ok(Self {
            jpeg_quality,
            png_compression,
        })
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
            png_compression: Self::DEFAULT_PNG_COMPRESSION,
        }
    }
}

/// Record handed over by the upload pipeline: `{file, type}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file: PathBuf,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Post object produced by the structured editor before it is inserted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<u64>,
    pub title: String,
    pub content: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeVariant {
    /// File name relative to the directory of the primary file.
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Primary file relative to the upload base directory, e.g. `2024/05/cat.jpg`.
    pub file: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub sizes: BTreeMap<String, SizeVariant>,
}

impl AttachmentMetadata {
    /// Absolute paths of every size variant, resolved against `basedir`.
    pub fn variant_paths(&self, basedir: &std::path::Path) -> Vec<PathBuf> {
        let dir = match std::path::Path::new(&self.file).parent() {
            Some(parent) => basedir.join(parent),
            None => basedir.to_path_buf(),
        };

        self.sizes
            .values()
            .map(|variant| dir.join(&variant.file))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    /// Primary file relative to the upload base directory.
    pub file: String,
    pub mime_type: Option<String>,
    pub title: String,
    pub status: String,
    pub metadata: Option<AttachmentMetadata>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAttachment {
    pub mime_type: Option<String>,
    pub title: String,
    pub status: String,
}

impl NewAttachment {
    pub fn new(title: String, mime_type: Option<String>) -> Self {
        Self {
            mime_type,
            title,
            status: "inherit".to_string(),
        }
    }
}

/// Where new uploads land right now.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadDir {
    pub path: PathBuf,
    pub url: String,
    pub subdir: String,
    pub basedir: PathBuf,
    pub baseurl: String,
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub site_url: String,
    pub upload_basedir: PathBuf,
    pub upload_baseurl: String,
    pub nonce_secret: String,
    pub policy: CompressionPolicy,
    pub fetch_timeout: Duration,
    pub batch_checkpoint: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> crate::Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(get: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let site_url = get("SITE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .ok_or_else(|| crate::Error::Config("SITE_URL not set".to_string()))?;
        // An empty site URL is a substring of every URL and would mark all images local.
        if site_url.is_empty() {
            return Err(crate::Error::Config("SITE_URL is empty".to_string()));
        }
        let nonce_secret = get("NONCE_SECRET")
            .ok_or_else(|| crate::Error::Config("NONCE_SECRET not set".to_string()))?;

        let upload_baseurl = get("UPLOAD_BASEURL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("{}/uploads", site_url));

        let policy = CompressionPolicy::new(
            parse_var(&get, "JPEG_QUALITY", CompressionPolicy::DEFAULT_JPEG_QUALITY)?,
            parse_var(
                &get,
                "PNG_COMPRESSION",
                CompressionPolicy::DEFAULT_PNG_COMPRESSION,
            )?,
        )?;

        Ok(Self {
            site_url,
            upload_basedir: get("UPLOAD_BASEDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            upload_baseurl,
            nonce_secret,
            policy,
            fetch_timeout: Duration::from_secs(parse_var(&get, "FETCH_TIMEOUT_SECS", 30u64)?),
            batch_checkpoint: get("BATCH_CHECKPOINT").map(PathBuf::from),
        })
    }
}

fn parse_var<F, T>(get: &F, key: &str, default: T) -> crate::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| crate::Error::Config(format!("Invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}
