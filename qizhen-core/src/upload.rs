//! Validation and staging of uploaded images.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{ImageFormat, ImageReader};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::ImageError;

#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_bytes: usize,
    pub max_side: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1024 * 1024,
            max_side: 4096,
        }
    }
}

/// A validated upload, written to a temporary file that is removed on drop.
#[derive(Debug)]
pub struct StagedImage {
    file: NamedTempFile,
    bytes: Arc<Vec<u8>>,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

impl StagedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn bytes(&self) -> Arc<Vec<u8>> {
        self.bytes.clone()
    }
}

/// File extension for accepted formats; anything else is rejected.
pub fn extension_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Gif => Some("gif"),
        _ => None,
    }
}

/// Decode a data URI or bare base64 payload.
pub fn decode_payload(raw: &str) -> Result<Vec<u8>, ImageError> {
    let raw = raw.trim();
    let data = match raw.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ImageError::Encoding("data URI without payload".to_string()))?,
        None => raw,
    };
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| ImageError::Encoding(e.to_string()))
}

/// Check size, format and resolution, then fully decode to prove the image is intact.
pub fn validate(bytes: &[u8], limits: ImageLimits) -> Result<(ImageFormat, u32, u32), ImageError> {
    if bytes.len() > limits.max_bytes {
        return Err(ImageError::TooLarge {
            limit: limits.max_bytes,
            actual: bytes.len(),
        });
    }

    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ImageError::Unreadable("unrecognised image data".to_string()))?;
    if extension_for(format).is_none() {
        return Err(ImageError::UnsupportedFormat(format!("{format:?}")));
    }

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ImageError::Unreadable(e.to_string()))?;
    if width > limits.max_side || height > limits.max_side {
        return Err(ImageError::TooManyPixels {
            width,
            height,
            limit: limits.max_side,
        });
    }

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::Unreadable(e.to_string()))?;
    Ok((format, width, height))
}

/// Decode, validate and write an uploaded image into `upload_dir`.
pub fn stage_image(raw: &str, upload_dir: &Path, limits: ImageLimits) -> Result<StagedImage, ImageError> {
    let bytes = decode_payload(raw)?;
    let (format, width, height) = validate(&bytes, limits)?;
    let extension = extension_for(format).unwrap_or("jpg");

    std::fs::create_dir_all(upload_dir)?;
    let mut file = tempfile::Builder::new()
        .prefix("qizhen-upload-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(upload_dir)?;
    file.write_all(&bytes)?;
    file.flush()?;

    debug!(path = %file.path().display(), width, height, "staged uploaded image");
    Ok(StagedImage {
        file,
        bytes: Arc::new(bytes),
        format,
        width,
        height,
    })
}
