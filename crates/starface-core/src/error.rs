use thiserror::Error;

/// Failure while transforming pixels: grayscale conversion, detection,
/// wavelet decomposition or feature assembly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("raster is empty ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },
    #[error("image {width}x{height} is too small for wavelet decomposition (need at least {min}px per side)")]
    ImageTooSmall { width: u32, height: u32, min: u32 },
    #[error("feature vector has {actual} values, expected {expected}")]
    FeatureLength { expected: usize, actual: usize },
    #[error("detector failed: {0}")]
    Detector(String),
}
