use crate::error::ProcessingError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Side length of the square crops fed to the classifier.
pub const IMG_SIZE: u32 = 32;

/// Length of every feature vector: the colour plane followed by the wavelet plane.
pub const FEATURE_LEN: usize = (IMG_SIZE * IMG_SIZE * 3 + IMG_SIZE * IMG_SIZE) as usize;

/// Axis-aligned integer region within a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clip to a `width` × `height` raster. Returns `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clipped = Rect {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        };
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// A face region that passed the eye-count quality gate, with its colour crop.
#[derive(Debug, Clone)]
pub struct ValidatedFace {
    /// Region in source raster coordinates.
    pub region: Rect,
    /// Number of eye candidates found inside the region.
    pub eyes: usize,
    /// Colour crop of `region`.
    pub crop: RgbImage,
}

/// Fixed-length classifier input (always [`FEATURE_LEN`] values).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    /// Wrap raw values, rejecting anything that is not exactly [`FEATURE_LEN`] long.
    pub fn from_values(values: Vec<f32>) -> Result<Self, ProcessingError> {
        if values.len() != FEATURE_LEN {
            return Err(ProcessingError::FeatureLength {
                expected: FEATURE_LEN,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One entry of a ranked class distribution. `probability` is a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassProbability {
    pub name: String,
    pub probability: f64,
}

/// Classification outcome for one validated face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceResult {
    /// Position of the face in detector output order.
    pub face_index: usize,
    pub predicted_class: String,
    /// Highest class probability, as a percentage rounded to two decimals.
    pub confidence: f64,
    /// Every known class, sorted by descending probability.
    pub all_probabilities: Vec<ClassProbability>,
    pub top_3: Vec<ClassProbability>,
}
