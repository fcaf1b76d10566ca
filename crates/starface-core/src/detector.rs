//! Face detection with an eye-count quality gate.
//!
//! A face-region detector proposes candidate rectangles on the grayscale
//! raster; an eye detector then runs inside each candidate, and only
//! candidates with at least two eyes are kept (as colour crops).

use crate::cascade::{DetectParams, HaarCascade};
use crate::error::ProcessingError;
use crate::imaging::{self, BT601};
use crate::types::{Rect, ValidatedFace};
use image::{GrayImage, RgbImage};

/// Minimum eye candidates a face region needs to pass the gate.
pub const MIN_EYES: usize = 2;

/// Scale factor for the face-region search.
pub const FACE_SCALE_FACTOR: f64 = 1.3;

/// Neighbour threshold for the face-region search.
pub const FACE_MIN_NEIGHBORS: usize = 5;

/// A cascade-style region detector over single-channel rasters.
///
/// The order of returned rectangles is implementation-defined; callers must
/// not rely on any geometric ordering.
pub trait RegionDetector: Send + Sync {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Rect>, ProcessingError>;
}

/// [`RegionDetector`] backed by a Haar cascade and fixed search parameters.
pub struct CascadeDetector {
    cascade: HaarCascade,
    params: DetectParams,
}

impl CascadeDetector {
    pub fn new(cascade: HaarCascade, params: DetectParams) -> Self {
        Self { cascade, params }
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<Rect>, ProcessingError> {
        Ok(self.cascade.detect_multi_scale(gray, &self.params))
    }
}

/// Per-candidate outcome, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub region: Rect,
    pub eyes: usize,
}

impl Candidate {
    pub fn passes_gate(&self) -> bool {
        self.eyes >= MIN_EYES
    }
}

/// Two-stage detector: face regions, then eyes within each region.
pub struct FaceEyeDetector {
    faces: Box<dyn RegionDetector>,
    eyes: Box<dyn RegionDetector>,
}

impl FaceEyeDetector {
    pub fn new(faces: Box<dyn RegionDetector>, eyes: Box<dyn RegionDetector>) -> Self {
        Self { faces, eyes }
    }

    /// Build from loaded cascades with the standard search parameters
    /// (faces: `scale_factor`/`min_neighbors`; eyes: library defaults).
    pub fn from_cascades(
        face_cascade: HaarCascade,
        eye_cascade: HaarCascade,
        scale_factor: f64,
        min_neighbors: usize,
    ) -> Self {
        let face_params = DetectParams {
            scale_factor,
            min_neighbors,
            ..DetectParams::default()
        };
        Self::new(
            Box::new(CascadeDetector::new(face_cascade, face_params)),
            Box::new(CascadeDetector::new(eye_cascade, DetectParams::default())),
        )
    }

    /// Every face candidate with its eye count, in detector order.
    pub fn candidates(&self, raster: &RgbImage) -> Result<Vec<Candidate>, ProcessingError> {
        let gray = imaging::to_grayscale(raster, BT601)?;
        self.candidates_gray(&gray)
    }

    fn candidates_gray(&self, gray: &GrayImage) -> Result<Vec<Candidate>, ProcessingError> {
        let (width, height) = gray.dimensions();
        let regions = self.faces.detect(gray)?;
        tracing::debug!(candidates = regions.len(), "face regions detected");

        let mut out = Vec::with_capacity(regions.len());
        for region in regions {
            let Some(region) = region.clamp_to(width, height) else {
                tracing::debug!(?region, "face region outside raster; skipped");
                continue;
            };
            let roi = imaging::crop(gray, region);
            let eyes = self.eyes.detect(&roi)?.len();
            tracing::debug!(?region, eyes, "eye check");
            out.push(Candidate { region, eyes });
        }
        Ok(out)
    }

    /// Faces that pass the eye gate, with colour crops, in detector order.
    pub fn detect(&self, raster: &RgbImage) -> Result<Vec<ValidatedFace>, ProcessingError> {
        let gray = imaging::to_grayscale(raster, BT601)?;
        let faces: Vec<ValidatedFace> = self
            .candidates_gray(&gray)?
            .into_iter()
            .filter(Candidate::passes_gate)
            .map(|c| ValidatedFace {
                region: c.region,
                eyes: c.eyes,
                crop: imaging::crop(raster, c.region),
            })
            .collect();
        tracing::debug!(validated = faces.len(), "faces passed eye gate");
        Ok(faces)
    }
}
