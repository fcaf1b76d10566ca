//! Startup loading of every trained artifact the pipeline needs.

use crate::cascade::{CascadeError, HaarCascade};
use crate::classifier::{ClassifierError, OnnxClassifier};
use crate::config::{ConfigError, PipelineConfig};
use crate::detector::FaceEyeDetector;
use crate::labels::{LabelDictionary, LabelError};
use crate::pipeline::{ClassificationPipeline, ModelContext};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("class dictionary: {0}")]
    Labels(#[from] LabelError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("{role} cascade: {source}")]
    Cascade {
        role: &'static str,
        #[source]
        source: CascadeError,
    },
}

/// Everything needed to serve classifications.
pub struct LoadedArtifacts {
    pub context: ModelContext,
    pub pipeline: ClassificationPipeline,
}

/// Loads the label dictionary, classifier and both cascades.
pub struct ArtifactStore;

impl ArtifactStore {
    pub fn load(config: &PipelineConfig) -> Result<LoadedArtifacts, ArtifactError> {
        config.validate()?;

        let labels = LabelDictionary::load(&config.class_dictionary_path())?;
        let classifier = OnnxClassifier::load(&config.model_path())?;
        let detector = Self::load_detector(config)?;

        tracing::info!(
            classes = labels.len(),
            artifacts_dir = %config.artifacts_dir.display(),
            "artifacts loaded"
        );

        Ok(LoadedArtifacts {
            context: ModelContext::new(labels, Box::new(classifier)),
            pipeline: ClassificationPipeline::from_config(config, detector)?,
        })
    }

    /// Face and eye cascades only, for detection without a classifier.
    pub fn load_detector(config: &PipelineConfig) -> Result<FaceEyeDetector, ArtifactError> {
        let face = load_cascade("face", &config.face_cascade_path)?;
        let eye = load_cascade("eye", &config.eye_cascade_path)?;
        Ok(FaceEyeDetector::from_cascades(
            face,
            eye,
            config.scale_factor,
            config.min_neighbors,
        ))
    }
}

fn load_cascade(role: &'static str, path: &Path) -> Result<HaarCascade, ArtifactError> {
    HaarCascade::load(path).map_err(|source| ArtifactError::Cascade { role, source })
}
