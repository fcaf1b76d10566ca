//! starface-core — Celebrity face recognition engine.
//!
//! Haar cascades find frontal faces and confirm two visible eyes, each face
//! becomes a 4096-value colour + wavelet feature vector, and a pre-trained
//! classifier (ONNX Runtime) ranks the known celebrities for it.

pub mod artifacts;
pub mod cascade;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod error;
pub mod features;
pub mod imaging;
pub mod labels;
pub mod pipeline;
pub mod types;
pub mod wavelet;

pub use artifacts::{ArtifactError, ArtifactStore, LoadedArtifacts};
pub use classifier::{Classifier, ClassifierError, OnnxClassifier, Prediction};
pub use config::PipelineConfig;
pub use decoder::{DecodeError, ImageDecoder};
pub use detector::{FaceEyeDetector, RegionDetector};
pub use error::ProcessingError;
pub use features::{FeatureExtractor, WaveletSource};
pub use labels::LabelDictionary;
pub use pipeline::{ClassificationPipeline, ClassifyError, ModelContext};
pub use types::{ClassProbability, FaceResult, FeatureVector, Rect, ValidatedFace};
