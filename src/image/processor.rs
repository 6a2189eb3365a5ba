use super::{
    detect_image_kind, CompressError, CompressResult, CompressedImage, CompressionService,
    ImageKind,
};
use crate::models::CompressionPolicy;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ImageCompressor {
    policy: CompressionPolicy,
}

impl ImageCompressor {
    pub fn new(policy: CompressionPolicy) -> Self {
        Self { policy }
    }

    fn compress_sync(path: &Path, policy: CompressionPolicy) -> CompressResult {
        let original = fs::read(path)?;
        let kind = detect_image_kind(&original);

        let encoded = match kind {
            ImageKind::Jpeg => encode_jpeg(&original, policy.jpeg_quality)?,
            ImageKind::Png => encode_png(&original, policy.png_compression)?,
            ImageKind::Other => return Err(CompressError::UnsupportedFormat),
        };

        // Lossless PNG output can grow, e.g. when a palette is expanded to truecolor.
        if kind == ImageKind::Png && encoded.len() >= original.len() {
            tracing::debug!(
                "Keeping {}: re-encoded PNG is not smaller ({} >= {} bytes)",
                path.display(),
                encoded.len(),
                original.len()
            );
            return Ok(CompressedImage {
                kind,
                original_size: original.len() as u64,
                compressed_size: original.len() as u64,
            });
        }

        replace_file(path, &encoded).map_err(CompressError::WriteFailed)?;

        Ok(CompressedImage {
            kind,
            original_size: original.len() as u64,
            compressed_size: encoded.len() as u64,
        })
    }
}

impl Default for ImageCompressor {
    fn default() -> Self {
        Self::new(CompressionPolicy::default())
    }
}

#[async_trait]
impl CompressionService for ImageCompressor {
    async fn try_compress(&self, path: &Path) -> CompressResult {
        let result = tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            let policy = self.policy;
            move || Self::compress_sync(&path, policy)
        })
        .await
        .map_err(|e| {
            CompressError::Io(std::io::Error::other(format!(
                "Image compression task join error: {}",
                e
            )))
        })?;

        match &result {
            Ok(done) => tracing::debug!(
                "Compressed {} ({:?}): {} -> {} bytes",
                path.display(),
                done.kind,
                done.original_size,
                done.compressed_size
            ),
            Err(CompressError::UnsupportedFormat) => {
                tracing::debug!("Skipping {}: not a JPEG or PNG", path.display())
            }
            Err(e) => tracing::warn!("Failed to compress {}: {}", path.display(), e),
        }

        result
    }
}

fn encode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, CompressError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map_err(CompressError::DecodeFailed)?;

    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.max(1));
        match image {
            DynamicImage::ImageLuma8(gray) => encoder.encode(
                gray.as_raw(),
                gray.width(),
                gray.height(),
                ExtendedColorType::L8,
            ),
            other => {
                let rgb = other.to_rgb8();
                encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            }
        }
        .map_err(CompressError::EncodeFailed)?;
    }

    Ok(buf)
}

fn encode_png(bytes: &[u8], level: u8) -> Result<Vec<u8>, CompressError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
        .map_err(CompressError::DecodeFailed)?;

    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buf, png_compression_type(level), FilterType::Adaptive);
    encoder
        .write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )
        .map_err(CompressError::EncodeFailed)?;

    Ok(buf)
}

/// Maps the 0-9 zlib-style level onto the encoder's presets.
fn png_compression_type(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

/// Swaps `encoded` in for the file at `path` without ever leaving it half written.
fn replace_file(path: &Path, encoded: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let permissions = fs::metadata(path)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(encoded)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), permissions)?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn detailed_rgb(width: u32, height: u32) -> image::RgbImage {
        image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([
                ((x * 7 + y * 13) % 256) as u8,
                ((x * x + y) % 256) as u8,
                ((x ^ y) % 256) as u8,
            ])
        })
    }

    fn write_jpeg(dir: &TempDir, name: &str, quality: u8) -> PathBuf {
        let img = detailed_rgb(128, 96);
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode(img.as_raw(), 128, 96, ExtendedColorType::Rgb8)
            .unwrap();
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn write_png(dir: &TempDir, name: &str) -> PathBuf {
        let img = image::RgbaImage::from_fn(40, 30, |x, y| {
            image::Rgba([(x * 6) as u8, (y * 8) as u8, 128, if x % 2 == 0 { 255 } else { 90 }])
        });
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Fast, FilterType::NoFilter)
            .write_image(img.as_raw(), 40, 30, ExtendedColorType::Rgba8)
            .unwrap();
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn test_jpeg_is_recompressed_in_place() {
        let dir = TempDir::new().unwrap();
        let path = write_jpeg(&dir, "photo.jpg", 100);
        let before = fs::read(&path).unwrap();

        let compressor = ImageCompressor::default();
        let done = compressor.try_compress(&path).await.unwrap();

        let after = fs::read(&path).unwrap();
        assert_eq!(done.kind, ImageKind::Jpeg);
        assert_eq!(done.original_size, before.len() as u64);
        assert_eq!(done.compressed_size, after.len() as u64);
        assert!(after.len() < before.len());
        assert_eq!(image::guess_format(&after).unwrap(), ImageFormat::Jpeg);

        let decoded = image::load_from_memory(&after).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (128, 96));
    }

    #[tokio::test]
    async fn test_png_stays_lossless() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "logo.png");
        let original_pixels = image::open(&path).unwrap().to_rgba8();

        let compressor = ImageCompressor::default();
        assert!(compressor.compress(&path).await);

        let after = fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&after).unwrap(), ImageFormat::Png);
        let pixels = image::load_from_memory(&after).unwrap().to_rgba8();
        assert_eq!(pixels, original_pixels);
    }

    #[tokio::test]
    async fn test_png_that_would_grow_is_kept() {
        let dir = TempDir::new().unwrap();
        let img = image::RgbaImage::from_fn(32, 32, |x, y| {
            image::Rgba([(x * 8) as u8, (y * 8) as u8, 40, 255])
        });
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, FilterType::Adaptive)
            .write_image(img.as_raw(), 32, 32, ExtendedColorType::Rgba8)
            .unwrap();
        let path = dir.path().join("already-small.png");
        fs::write(&path, &bytes).unwrap();

        let done = ImageCompressor::default()
            .try_compress(&path)
            .await
            .unwrap();

        assert_eq!(done.kind, ImageKind::Png);
        assert_eq!(done.compressed_size, done.original_size);
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_format_comes_from_header_not_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_jpeg(&dir, "misnamed.png", 95);

        let done = ImageCompressor::default()
            .try_compress(&path)
            .await
            .unwrap();
        assert_eq!(done.kind, ImageKind::Jpeg);
        assert_eq!(
            image::guess_format(&fs::read(&path).unwrap()).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_unsupported_file_is_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"just some text, not an image").unwrap();

        let compressor = ImageCompressor::default();
        let err = compressor.try_compress(&path).await.unwrap_err();
        assert!(matches!(err, CompressError::UnsupportedFormat));
        assert!(!err.format_recognized());
        assert!(!compressor.compress(&path).await);
        assert_eq!(fs::read(&path).unwrap(), b"just some text, not an image");
    }

    #[tokio::test]
    async fn test_corrupt_jpeg_reports_decode_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.jpg");
        let garbage = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x01, 0x02, 0x03];
        fs::write(&path, garbage).unwrap();

        let err = ImageCompressor::default()
            .try_compress(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::DecodeFailed(_)));
        assert!(err.format_recognized());
        assert_eq!(fs::read(&path).unwrap(), garbage);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.jpg");

        let err = ImageCompressor::default()
            .try_compress(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::Io(_)));
    }

    #[tokio::test]
    async fn test_repeated_jpeg_compression_is_lossy() {
        let dir = TempDir::new().unwrap();
        let path = write_jpeg(&dir, "twice.jpg", 100);
        let original = fs::read(&path).unwrap();

        let compressor = ImageCompressor::default();
        assert!(compressor.compress(&path).await);
        let first = fs::read(&path).unwrap();
        assert!(image::load_from_memory_with_format(&first, ImageFormat::Jpeg).is_ok());

        assert!(compressor.compress(&path).await);
        let second = fs::read(&path).unwrap();
        assert!(image::load_from_memory_with_format(&second, ImageFormat::Jpeg).is_ok());

        assert_ne!(second, original);
    }

    #[test]
    fn test_png_levels_map_to_presets() {
        assert!(matches!(png_compression_type(0), CompressionType::Fast));
        assert!(matches!(png_compression_type(5), CompressionType::Default));
        assert!(matches!(png_compression_type(9), CompressionType::Best));
    }
}
