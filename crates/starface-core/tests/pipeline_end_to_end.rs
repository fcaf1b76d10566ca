use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, ImageFormat, Rgb, RgbImage};
use starface_core::{
    Classifier, ClassifierError, ClassificationPipeline, FaceEyeDetector, FeatureExtractor,
    FeatureVector, ImageDecoder, LabelDictionary, ModelContext, ProcessingError, Rect,
    RegionDetector,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed face regions; eyes reported for every region.
struct Regions(Vec<Rect>);

impl RegionDetector for Regions {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<Rect>, ProcessingError> {
        Ok(self.0.clone())
    }
}

struct TwoEyes;

impl RegionDetector for TwoEyes {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<Rect>, ProcessingError> {
        Ok(vec![Rect::new(2, 2, 4, 4), Rect::new(10, 2, 4, 4)])
    }
}

struct OneEye;

impl RegionDetector for OneEye {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<Rect>, ProcessingError> {
        Ok(vec![Rect::new(2, 2, 4, 4)])
    }
}

/// Predicts "alice" with 0.91 and counts calls.
struct Alice {
    calls: Arc<AtomicUsize>,
}

impl Classifier for Alice {
    fn predict(&self, features: &FeatureVector) -> Result<usize, ClassifierError> {
        assert_eq!(features.len(), 4096);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn predict_proba(&self, _features: &FeatureVector) -> Result<Vec<f32>, ClassifierError> {
        Ok(vec![0.91, 0.09])
    }
}

fn png_payload(img: &RgbImage) -> String {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(buf.into_inner()))
}

fn portrait() -> RgbImage {
    RgbImage::from_fn(120, 120, |x, y| Rgb([(x * 2) as u8, (y * 2) as u8, ((x + y) % 256) as u8]))
}

fn context(calls: Arc<AtomicUsize>) -> ModelContext {
    let labels = LabelDictionary::from_json(r#"{"alice": 0, "bob": 1}"#).unwrap();
    ModelContext::new(labels, Box::new(Alice { calls }))
}

fn pipeline(eyes: Box<dyn RegionDetector>) -> ClassificationPipeline {
    let detector = FaceEyeDetector::new(Box::new(Regions(vec![Rect::new(20, 20, 60, 60)])), eyes);
    ClassificationPipeline::new(ImageDecoder::default(), detector, FeatureExtractor::default())
}

#[test]
fn single_face_is_ranked_with_percentages() {
    let calls = Arc::new(AtomicUsize::new(0));
    let ctx = context(calls.clone());
    let results = pipeline(Box::new(TwoEyes)).classify(&ctx, &png_payload(&portrait())).unwrap();

    assert_eq!(results.len(), 1);
    let face = &results[0];
    assert_eq!(face.face_index, 0);
    assert_eq!(face.predicted_class, "alice");
    assert_eq!(face.confidence, 91.0);
    assert_eq!(face.all_probabilities[0].name, "alice");
    assert_eq!(face.all_probabilities[0].probability, 91.0);
    assert_eq!(face.all_probabilities[1].name, "bob");
    assert_eq!(face.all_probabilities[1].probability, 9.0);
    assert_eq!(face.top_3.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn one_eye_face_never_reaches_classifier() {
    let calls = Arc::new(AtomicUsize::new(0));
    let ctx = context(calls.clone());
    let results = pipeline(Box::new(OneEye)).classify(&ctx, &png_payload(&portrait())).unwrap();

    assert!(results.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn raw_base64_without_prefix_is_accepted() {
    let ctx = context(Arc::new(AtomicUsize::new(0)));
    let payload = png_payload(&portrait());
    let raw = payload.split_once(',').unwrap().1;
    assert_eq!(pipeline(Box::new(TwoEyes)).classify(&ctx, raw).unwrap().len(), 1);
}

#[test]
fn result_serializes_with_wire_field_names() {
    let ctx = context(Arc::new(AtomicUsize::new(0)));
    let results = pipeline(Box::new(TwoEyes)).classify(&ctx, &png_payload(&portrait())).unwrap();
    let json = serde_json::to_value(&results[0]).unwrap();

    for key in ["face_index", "predicted_class", "confidence", "all_probabilities", "top_3"] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    assert_eq!(json["top_3"][0]["name"], "alice");
    assert_eq!(json["top_3"][0]["probability"], 91.0);
}
