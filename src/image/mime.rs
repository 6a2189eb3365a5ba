use super::ImageKind;
use std::path::Path;

pub fn detect_image_kind(bytes: &[u8]) -> ImageKind {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => ImageKind::Jpeg,
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => ImageKind::Png,
        _ => {
            tracing::debug!(
                "Unrecognized image header (first 4 bytes: {:02X?})",
                &bytes[..bytes.len().min(4)]
            );
            ImageKind::Other
        }
    }
}

/// Mime type implied by a file name's extension.
pub fn mime_from_filename(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())?
        .to_ascii_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" | "jpe" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_png() {
        assert_eq!(
            detect_image_kind(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00]),
            ImageKind::Png
        );
    }

    #[test]
    fn test_detect_jpeg() {
        assert_eq!(detect_image_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageKind::Jpeg);
    }

    #[test]
    fn test_webp_is_other() {
        assert_eq!(
            detect_image_kind(&[
                0x52, 0x49, 0x46, 0x46, 0x00, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50
            ]),
            ImageKind::Other
        );
    }

    #[test]
    fn test_empty_is_other() {
        assert_eq!(detect_image_kind(&[]), ImageKind::Other);
    }

    #[test]
    fn test_mime_from_filename() {
        assert_eq!(mime_from_filename("photo.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_filename("photo.jpeg"), Some("image/jpeg"));
        assert_eq!(mime_from_filename("logo.png"), Some("image/png"));
        assert_eq!(mime_from_filename("anim.gif"), Some("image/gif"));
        assert_eq!(mime_from_filename("notes.txt"), None);
        assert_eq!(mime_from_filename("no-extension"), None);
    }
}
