//! Decode -> detect -> extract -> classify, with per-face failure isolation.

use crate::classifier::{Classifier, ClassifierError, Prediction};
use crate::config::{ConfigError, PipelineConfig, DEFAULT_MAX_FACES};
use crate::decoder::{DecodeError, ImageDecoder};
use crate::detector::FaceEyeDetector;
use crate::error::ProcessingError;
use crate::features::FeatureExtractor;
use crate::labels::LabelDictionary;
use crate::types::{ClassProbability, FaceResult, ValidatedFace};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// Entries kept in [`FaceResult::top_3`].
const TOP_K: usize = 3;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("image processing failed: {0}")]
    Processing(#[from] ProcessingError),
}

/// Failure confined to a single face.
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("feature extraction: {0}")]
    Extraction(#[from] ProcessingError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Read-only model state: label dictionary plus trained classifier.
///
/// Built once at startup and shared by every request.
pub struct ModelContext {
    labels: LabelDictionary,
    classifier: Box<dyn Classifier>,
}

impl ModelContext {
    pub fn new(labels: LabelDictionary, classifier: Box<dyn Classifier>) -> Self {
        Self { labels, classifier }
    }

    pub fn labels(&self) -> &LabelDictionary {
        &self.labels
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}

/// The classification pipeline. Stateless between calls.
pub struct ClassificationPipeline {
    decoder: ImageDecoder,
    detector: FaceEyeDetector,
    extractor: FeatureExtractor,
    max_faces: usize,
}

impl ClassificationPipeline {
    pub fn new(decoder: ImageDecoder, detector: FaceEyeDetector, extractor: FeatureExtractor) -> Self {
        Self {
            decoder,
            detector,
            extractor,
            max_faces: DEFAULT_MAX_FACES,
        }
    }

    /// Build decoder and extractor from configuration around a ready detector.
    pub fn from_config(config: &PipelineConfig, detector: FaceEyeDetector) -> Result<Self, ConfigError> {
        config.validate()?;
        let extractor = FeatureExtractor::new(config.wavelet()?, config.wavelet_level, config.wavelet_source);
        Ok(Self::new(ImageDecoder::new(config.max_image_bytes), detector, extractor)
            .with_max_faces(config.max_faces))
    }

    /// Cap faces classified per image (0 disables the cap).
    pub fn with_max_faces(mut self, max_faces: usize) -> Self {
        self.max_faces = max_faces;
        self
    }

    /// Classify every qualifying face in a base64 / data-URI payload.
    ///
    /// An image with no qualifying faces yields an empty list.
    pub fn classify(&self, ctx: &ModelContext, payload: &str) -> Result<Vec<FaceResult>, ClassifyError> {
        let raster = self.decoder.decode(payload)?;
        self.classify_raster(ctx, &raster)
    }

    /// Classify an image file on disk.
    pub fn classify_file(&self, ctx: &ModelContext, path: &Path) -> Result<Vec<FaceResult>, ClassifyError> {
        let raster = self.decoder.decode_file(path)?;
        self.classify_raster(ctx, &raster)
    }

    pub fn classify_raster(&self, ctx: &ModelContext, raster: &RgbImage) -> Result<Vec<FaceResult>, ClassifyError> {
        let mut faces = self.detector.detect(raster)?;
        if self.max_faces > 0 && faces.len() > self.max_faces {
            tracing::warn!(
                detected = faces.len(),
                max_faces = self.max_faces,
                "too many faces; classifying the first ones only"
            );
            faces.truncate(self.max_faces);
        }
        Ok(self.classify_faces(ctx, &faces))
    }

    /// Classify validated faces in order. A face that fails is logged and
    /// skipped; `face_index` keeps its detection position.
    pub fn classify_faces(&self, ctx: &ModelContext, faces: &[ValidatedFace]) -> Vec<FaceResult> {
        let results: Vec<FaceResult> = faces
            .iter()
            .enumerate()
            .filter_map(|(index, face)| match self.classify_face(ctx, index, face) {
                Ok(result) => Some(result),
                Err(err) => {
                    tracing::warn!(face_index = index, region = ?face.region, error = %err, "face skipped");
                    None
                }
            })
            .collect();

        tracing::debug!(faces = faces.len(), classified = results.len(), "classification done");
        results
    }

    fn classify_face(&self, ctx: &ModelContext, index: usize, face: &ValidatedFace) -> Result<FaceResult, FaceError> {
        let features = self.extractor.extract(face)?;
        let prediction = ctx.classifier().classify(&features)?;
        Ok(build_face_result(index, &prediction, ctx.labels()))
    }
}

/// Probability in [0, 1] as a percentage rounded to two decimals.
fn to_percent(p: f32) -> f64 {
    (p as f64 * 100.0 * 100.0).round() / 100.0
}

/// Name every class in the distribution and sort by descending percentage.
///
/// Equal percentages keep ascending class-id order.
pub fn rank_probabilities(probabilities: &[f32], labels: &LabelDictionary) -> Vec<ClassProbability> {
    let mut ranked: Vec<ClassProbability> = probabilities
        .iter()
        .enumerate()
        .map(|(id, &p)| ClassProbability {
            name: labels.resolve(id).to_string(),
            probability: to_percent(p),
        })
        .collect();
    // Stable sort: ties stay in id order.
    ranked.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    ranked
}

/// Assemble the result for one face from a model prediction.
pub fn build_face_result(index: usize, prediction: &Prediction, labels: &LabelDictionary) -> FaceResult {
    let all_probabilities = rank_probabilities(&prediction.probabilities, labels);
    let predicted_class = labels.resolve(prediction.class_id).to_string();
    let confidence = all_probabilities.first().map(|c| c.probability).unwrap_or(0.0);

    if let Some(top) = all_probabilities.first() {
        if top.name != predicted_class {
            tracing::warn!(
                face_index = index,
                predicted = %predicted_class,
                most_probable = %top.name,
                "model label disagrees with its most probable class"
            );
        }
    }

    FaceResult {
        face_index: index,
        predicted_class,
        confidence,
        top_3: all_probabilities.iter().take(TOP_K).cloned().collect(),
        all_probabilities,
    }
}
