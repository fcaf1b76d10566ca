//! Base64 / data-URI image payload decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder as _, ImageReader, RgbImage};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Default ceiling on decoded image bytes (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image payload is not valid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("decoded image is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),
    #[error("failed to read image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Turns client payloads into colour rasters.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    max_bytes: usize,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_BYTES)
    }
}

impl ImageDecoder {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Decode a raw base64 string or a `data:<mime>;base64,<data>` URI.
    ///
    /// When a comma is present only the text after the first comma is decoded.
    /// ASCII whitespace inside the payload is ignored.
    pub fn decode(&self, payload: &str) -> Result<RgbImage, DecodeError> {
        let encoded = match payload.split_once(',') {
            Some((_, data)) => data,
            None => payload,
        };
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        // Reject obviously oversized payloads before allocating the decode buffer.
        let estimate = cleaned.len() / 4 * 3;
        if estimate > self.max_bytes + 3 {
            return Err(DecodeError::PayloadTooLarge {
                size: estimate,
                limit: self.max_bytes,
            });
        }

        let bytes = STANDARD.decode(cleaned.as_bytes())?;
        self.decode_bytes(&bytes)
    }

    /// Decode already-binary image bytes (PNG, JPEG, ...).
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        if bytes.len() > self.max_bytes {
            return Err(DecodeError::PayloadTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let unsupported = |e: image::ImageError| DecodeError::UnsupportedImageFormat(e.to_string());
        let mut decoder = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::UnsupportedImageFormat(e.to_string()))?
            .into_decoder()
            .map_err(unsupported)?;
        // Honour the EXIF Orientation tag.
        let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
        let mut img = DynamicImage::from_decoder(decoder).map_err(unsupported)?;
        img.apply_orientation(orientation);
        let img = img.to_rgb8();

        if img.width() == 0 || img.height() == 0 {
            return Err(DecodeError::UnsupportedImageFormat(
                "image has zero width or height".into(),
            ));
        }

        tracing::debug!(
            bytes = bytes.len(),
            width = img.width(),
            height = img.height(),
            "decoded image"
        );
        Ok(img)
    }

    /// Read and decode an image file from disk, applying the same size limit.
    pub fn decode_file(&self, path: &Path) -> Result<RgbImage, DecodeError> {
        let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.decode_bytes(&bytes)
    }
}
