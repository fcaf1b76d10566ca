//! Feature vector construction: resized colour crop + resized wavelet detail image.

use crate::error::ProcessingError;
use crate::imaging;
use crate::types::{FeatureVector, ValidatedFace, FEATURE_LEN, IMG_SIZE};
use crate::wavelet::{self, Wavelet};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default decomposition depth.
pub const WAVELET_LEVEL: usize = 5;

/// Which crop the wavelet detail image is computed from.
///
/// The two choices produce different vectors; a trained model only accepts
/// the one it was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveletSource {
    /// Full-resolution face crop, resized afterwards.
    #[default]
    Original,
    /// The already-resized `IMG_SIZE`×`IMG_SIZE` crop.
    Resized,
}

impl FromStr for WaveletSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "resized" => Ok(Self::Resized),
            other => Err(format!("unknown wavelet source {other:?} (expected original|resized)")),
        }
    }
}

impl fmt::Display for WaveletSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Original => "original",
            Self::Resized => "resized",
        })
    }
}

/// Builds the fixed 4096-value classifier input for a face crop.
///
/// Layout: `IMG_SIZE²` pixels × (B, G, R), row-major, then `IMG_SIZE²`
/// wavelet-detail intensities, row-major. The trained classifier depends on
/// this exact order.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    wavelet: Wavelet,
    level: usize,
    source: WaveletSource,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(Wavelet::Db1, WAVELET_LEVEL, WaveletSource::Original)
    }
}

impl FeatureExtractor {
    pub fn new(wavelet: Wavelet, level: usize, source: WaveletSource) -> Self {
        Self { wavelet, level, source }
    }

    pub fn extract(&self, face: &ValidatedFace) -> Result<FeatureVector, ProcessingError> {
        self.extract_crop(&face.crop)
    }

    pub fn extract_crop(&self, crop: &RgbImage) -> Result<FeatureVector, ProcessingError> {
        let (width, height) = crop.dimensions();
        if width == 0 || height == 0 {
            return Err(ProcessingError::EmptyRaster { width, height });
        }

        let resized = imaging::resize_bilinear(crop, IMG_SIZE, IMG_SIZE);
        let detail = match self.source {
            WaveletSource::Original => wavelet::detail_image(crop, self.wavelet, self.level)?,
            WaveletSource::Resized => wavelet::detail_image(&resized, self.wavelet, self.level)?,
        };
        let detail = imaging::resize_bilinear(&detail, IMG_SIZE, IMG_SIZE);

        let mut values = Vec::with_capacity(FEATURE_LEN);
        for px in resized.pixels() {
            let [r, g, b] = px.0;
            values.extend([b as f32, g as f32, r as f32]);
        }
        values.extend(detail.pixels().map(|p| p.0[0] as f32));

        FeatureVector::from_values(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use image::Rgb;

    fn face(crop: RgbImage) -> ValidatedFace {
        let (w, h) = crop.dimensions();
        ValidatedFace { region: Rect::new(0, 0, w, h), eyes: 2, crop }
    }

    fn textured(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8]))
    }

    #[test]
    fn test_vector_length_for_any_crop_size() {
        let extractor = FeatureExtractor::default();
        for (w, h) in [(2, 2), (17, 40), (32, 32), (150, 120), (301, 77)] {
            let v = extractor.extract(&face(textured(w, h))).unwrap();
            assert_eq!(v.len(), 4096, "crop {w}x{h}");
        }
    }

    #[test]
    fn test_colour_plane_is_bgr() {
        let crop = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
        let v = FeatureExtractor::default().extract(&face(crop)).unwrap();
        assert_eq!(&v.as_slice()[..6], &[30.0, 20.0, 10.0, 30.0, 20.0, 10.0]);
    }

    #[test]
    fn test_wavelet_plane_follows_colour_plane() {
        // Flat crop: detail plane is all zero, colour plane is not.
        let crop = RgbImage::from_pixel(48, 48, Rgb([100, 100, 100]));
        let v = FeatureExtractor::default().extract(&face(crop)).unwrap();
        let (colour, detail) = v.as_slice().split_at(3072);
        assert!(colour.iter().all(|&x| x == 100.0));
        assert!(detail.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = FeatureExtractor::default();
        let f = face(textured(93, 110));
        assert_eq!(extractor.extract(&f).unwrap(), extractor.extract(&f).unwrap());
    }

    #[test]
    fn test_wavelet_source_changes_vector() {
        let f = face(textured(90, 90));
        let original = FeatureExtractor::new(Wavelet::Db1, 5, WaveletSource::Original)
            .extract(&f)
            .unwrap();
        let resized = FeatureExtractor::new(Wavelet::Db1, 5, WaveletSource::Resized)
            .extract(&f)
            .unwrap();
        assert_eq!(original.as_slice()[..3072], resized.as_slice()[..3072]);
        assert_ne!(original.as_slice()[3072..], resized.as_slice()[3072..]);
    }

    #[test]
    fn test_too_small_crop_fails() {
        let err = FeatureExtractor::default().extract(&face(textured(1, 1))).unwrap_err();
        assert!(matches!(err, ProcessingError::ImageTooSmall { .. }));
    }

    #[test]
    fn test_wavelet_source_parse() {
        assert_eq!("Original".parse::<WaveletSource>().unwrap(), WaveletSource::Original);
        assert_eq!("resized".parse::<WaveletSource>().unwrap(), WaveletSource::Resized);
        assert!("both".parse::<WaveletSource>().is_err());
    }
}
