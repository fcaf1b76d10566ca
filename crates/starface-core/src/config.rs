use crate::decoder::DEFAULT_MAX_IMAGE_BYTES;
use crate::detector::{FACE_MIN_NEIGHBORS, FACE_SCALE_FACTOR};
use crate::features::{WaveletSource, WAVELET_LEVEL};
use crate::wavelet::Wavelet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Default cap on faces classified per image.
pub const DEFAULT_MAX_FACES: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Artifact locations and pipeline tuning shared by the daemon and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the classifier model and class dictionary.
    pub artifacts_dir: PathBuf,
    /// Classifier model file name inside `artifacts_dir`.
    pub model_file: String,
    /// Class dictionary file name inside `artifacts_dir`.
    pub class_dictionary_file: String,
    pub face_cascade_path: PathBuf,
    pub eye_cascade_path: PathBuf,
    /// Ceiling on decoded image bytes.
    pub max_image_bytes: usize,
    /// Faces classified per image; 0 means no cap.
    pub max_faces: usize,
    pub scale_factor: f64,
    pub min_neighbors: usize,
    pub wavelet: String,
    pub wavelet_level: usize,
    pub wavelet_source: WaveletSource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("./artifacts"),
            model_file: "saved_model.onnx".into(),
            class_dictionary_file: "class_dictionary.json".into(),
            face_cascade_path: PathBuf::from(
                "./opencv/haarcascades/haarcascade_frontalface_default.xml",
            ),
            eye_cascade_path: PathBuf::from("./opencv/haarcascades/haarcascade_eye.xml"),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_faces: DEFAULT_MAX_FACES,
            scale_factor: FACE_SCALE_FACTOR,
            min_neighbors: FACE_MIN_NEIGHBORS,
            wavelet: Wavelet::Db1.to_string(),
            wavelet_level: WAVELET_LEVEL,
            wavelet_source: WaveletSource::Original,
        }
    }
}

impl PipelineConfig {
    /// Path to the classifier model.
    pub fn model_path(&self) -> PathBuf {
        self.artifacts_dir.join(&self.model_file)
    }

    /// Path to the class dictionary.
    pub fn class_dictionary_path(&self) -> PathBuf {
        self.artifacts_dir.join(&self.class_dictionary_file)
    }

    pub fn wavelet(&self) -> Result<Wavelet, ConfigError> {
        self.wavelet
            .parse()
            .map_err(|e: crate::wavelet::UnknownWavelet| ConfigError::Invalid(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.scale_factor > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "scale_factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        if self.wavelet_level == 0 {
            return Err(ConfigError::Invalid("wavelet_level must be at least 1".into()));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Invalid("max_image_bytes must be positive".into()));
        }
        self.wavelet()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_service() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_image_bytes, 10 * 1024 * 1024);
        assert_eq!(c.max_faces, 10);
        assert_eq!(c.scale_factor, 1.3);
        assert_eq!(c.min_neighbors, 5);
        assert_eq!(c.wavelet_level, 5);
        assert_eq!(c.wavelet().unwrap(), Wavelet::Db1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_artifact_paths() {
        let c = PipelineConfig {
            artifacts_dir: PathBuf::from("/srv/model"),
            ..Default::default()
        };
        assert_eq!(c.model_path(), PathBuf::from("/srv/model/saved_model.onnx"));
        assert_eq!(
            c.class_dictionary_path(),
            PathBuf::from("/srv/model/class_dictionary.json")
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_scale = PipelineConfig { scale_factor: 1.0, ..Default::default() };
        assert!(bad_scale.validate().is_err());
        let bad_level = PipelineConfig { wavelet_level: 0, ..Default::default() };
        assert!(bad_level.validate().is_err());
        let bad_wavelet = PipelineConfig { wavelet: "coif3".into(), ..Default::default() };
        assert!(bad_wavelet.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let c: PipelineConfig = serde_json::from_str(r#"{"max_faces": 3, "wavelet_source": "resized"}"#).unwrap();
        assert_eq!(c.max_faces, 3);
        assert_eq!(c.wavelet_source, WaveletSource::Resized);
        assert_eq!(c.min_neighbors, 5);
    }
}
