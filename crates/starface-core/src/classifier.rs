//! Classifier capability and its ONNX Runtime backend.
//!
//! The trained model is opaque: a vector of [`FEATURE_LEN`] floats goes in,
//! a best class id and a probability per class come out.

use crate::types::{FeatureVector, FEATURE_LEN};
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("classifier session lock poisoned")]
    Poisoned,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output of one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Best class id as reported by the model.
    pub class_id: usize,
    /// Probability per class id, indexed by id, in [0, 1].
    pub probabilities: Vec<f32>,
}

/// Pre-trained multi-class model. Implementations must be safe to share
/// across worker threads.
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<usize, ClassifierError>;

    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f32>, ClassifierError>;

    /// Best class and full distribution. Backends that produce both in a
    /// single pass should override this.
    fn classify(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        Ok(Prediction {
            class_id: self.predict(features)?,
            probabilities: self.predict_proba(features)?,
        })
    }
}

/// Output tensor positions: (label, probabilities).
type OutputIndices = (usize, usize);

/// Classifier exported to ONNX (e.g. via skl2onnx with zipmap disabled):
/// input `[1, 4096]` f32, outputs an int64 label and a `[1, N]` f32 probability tensor.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    outputs: OutputIndices,
}

impl OnnxClassifier {
    /// Load the ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded classifier model"
        );

        if output_names.len() < 2 {
            return Err(ClassifierError::InferenceFailed(format!(
                "classifier must expose label and probability outputs, got {}",
                output_names.len()
            )));
        }

        let outputs = discover_output_indices(&output_names);
        tracing::debug!(?outputs, "classifier output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            outputs,
        })
    }

    fn run(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        let input = Array2::from_shape_vec((1, FEATURE_LEN), features.as_slice().to_vec())
            .map_err(|e| ClassifierError::InferenceFailed(format!("input shape: {e}")))?;

        let mut session = self.session.lock().map_err(|_| ClassifierError::Poisoned)?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (label_idx, proba_idx) = self.outputs;
        let (_, labels) = outputs[label_idx]
            .try_extract_tensor::<i64>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("label output: {e}")))?;
        let (_, probabilities) = outputs[proba_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("probability output: {e}")))?;

        let label = labels
            .first()
            .copied()
            .ok_or_else(|| ClassifierError::InferenceFailed("empty label output".into()))?;
        let class_id = usize::try_from(label)
            .map_err(|_| ClassifierError::InferenceFailed(format!("negative class id {label}")))?;

        Ok(Prediction {
            class_id,
            probabilities: probabilities.to_vec(),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<usize, ClassifierError> {
        Ok(self.run(features)?.class_id)
    }

    fn predict_proba(&self, features: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
        Ok(self.run(features)?.probabilities)
    }

    fn classify(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        self.run(features)
    }
}

/// Discover (label, probabilities) output positions by name.
///
/// Recognises skl2onnx names (`output_label` / `output_probability`) and the
/// shorter `label` / `probabilities`; otherwise assumes label first,
/// probabilities second.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));

    match (
        find(&["output_label", "label"]),
        find(&["output_probability", "probabilities", "probability"]),
    ) {
        (Some(label), Some(proba)) => (label, proba),
        _ => {
            tracing::info!(?names, "classifier output names not recognized, using positional mapping");
            (0, 1)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a fixed prediction for every input.
    pub struct FixedClassifier {
        pub class_id: usize,
        pub probabilities: Vec<f32>,
    }

    impl Classifier for FixedClassifier {
        fn predict(&self, _features: &FeatureVector) -> Result<usize, ClassifierError> {
            Ok(self.class_id)
        }

        fn predict_proba(&self, _features: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.probabilities.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedClassifier;
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_discover_skl2onnx_names() {
        assert_eq!(discover_output_indices(&names(&["output_label", "output_probability"])), (0, 1));
    }

    #[test]
    fn test_discover_swapped_names() {
        assert_eq!(discover_output_indices(&names(&["probabilities", "label"])), (1, 0));
    }

    #[test]
    fn test_discover_positional_fallback() {
        assert_eq!(discover_output_indices(&names(&["out0", "out1"])), (0, 1));
    }

    #[test]
    fn test_default_classify_combines_both_calls() {
        let clf = FixedClassifier { class_id: 1, probabilities: vec![0.25, 0.75] };
        let v = FeatureVector::from_values(vec![0.0; FEATURE_LEN]).unwrap();
        let p = clf.classify(&v).unwrap();
        assert_eq!(p, Prediction { class_id: 1, probabilities: vec![0.25, 0.75] });
    }

    #[test]
    fn test_load_missing_model() {
        let err = OnnxClassifier::load(Path::new("/nonexistent/model.onnx")).err().unwrap();
        assert!(matches!(err, ClassifierError::ModelNotFound(_)));
    }
}
