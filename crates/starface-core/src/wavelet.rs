//! Multilevel 2D discrete wavelet transform (Daubechies-1 / Haar).
//!
//! Boundary handling is symmetric extension: an odd-length signal repeats its
//! last sample, so a length-`n` axis yields `ceil(n/2)` coefficients per band.

use crate::error::ProcessingError;
use crate::imaging::{self, BT601_SWAPPED};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, Axis, Zip};
use std::f32::consts::FRAC_1_SQRT_2;
use std::fmt;
use std::str::FromStr;

/// Smallest crop side that can be decomposed.
pub const MIN_SIDE: u32 = 2;

/// Supported wavelet families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wavelet {
    /// Daubechies-1, identical to Haar.
    #[default]
    Db1,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported wavelet {0:?} (expected \"db1\" or \"haar\")")]
pub struct UnknownWavelet(pub String);

impl FromStr for Wavelet {
    type Err = UnknownWavelet;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "db1" | "haar" => Ok(Wavelet::Db1),
            other => Err(UnknownWavelet(other.to_string())),
        }
    }
}

impl fmt::Display for Wavelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wavelet::Db1 => f.write_str("db1"),
        }
    }
}

/// Detail bands of one level: (horizontal, vertical, diagonal).
pub type Details = (Array2<f32>, Array2<f32>, Array2<f32>);

/// Coefficients of a multilevel decomposition.
#[derive(Debug, Clone)]
pub struct Decomposition {
    /// Coarsest approximation band.
    pub approx: Array2<f32>,
    /// Detail bands, coarsest level first.
    pub details: Vec<Details>,
}

/// Single-level analysis along one axis: (low-pass, high-pass).
fn dwt_axis(data: &Array2<f32>, axis: Axis) -> (Array2<f32>, Array2<f32>) {
    let n = data.len_of(axis);
    let half = n.div_ceil(2);
    let mut shape = [data.nrows(), data.ncols()];
    shape[axis.index()] = half;

    let mut lo = Array2::<f32>::zeros(shape);
    let mut hi = Array2::<f32>::zeros(shape);

    Zip::from(data.lanes(axis))
        .and(lo.lanes_mut(axis))
        .and(hi.lanes_mut(axis))
        .for_each(|x, mut lo, mut hi| {
            for i in 0..half {
                let a = x[2 * i];
                let b = if 2 * i + 1 < n { x[2 * i + 1] } else { x[n - 1] };
                lo[i] = (a + b) * FRAC_1_SQRT_2;
                hi[i] = (a - b) * FRAC_1_SQRT_2;
            }
        });

    (lo, hi)
}

/// Single-level synthesis along one axis; output is twice the band length.
fn idwt_axis(lo: &Array2<f32>, hi: &Array2<f32>, axis: Axis) -> Array2<f32> {
    let half = lo.len_of(axis);
    let mut shape = [lo.nrows(), lo.ncols()];
    shape[axis.index()] = half * 2;

    let mut out = Array2::<f32>::zeros(shape);
    Zip::from(out.lanes_mut(axis))
        .and(lo.lanes(axis))
        .and(hi.lanes(axis))
        .for_each(|mut x, lo, hi| {
            for i in 0..half {
                x[2 * i] = (lo[i] + hi[i]) * FRAC_1_SQRT_2;
                x[2 * i + 1] = (lo[i] - hi[i]) * FRAC_1_SQRT_2;
            }
        });
    out
}

fn dwt2(data: &Array2<f32>) -> (Array2<f32>, Details) {
    let (lo_rows, hi_rows) = dwt_axis(data, Axis(0));
    let (aa, ad) = dwt_axis(&lo_rows, Axis(1));
    let (da, dd) = dwt_axis(&hi_rows, Axis(1));
    (aa, (da, ad, dd))
}

fn idwt2(approx: &Array2<f32>, details: &Details) -> Array2<f32> {
    let (da, ad, dd) = details;
    let lo_rows = idwt_axis(approx, ad, Axis(1));
    let hi_rows = idwt_axis(da, dd, Axis(1));
    idwt_axis(&lo_rows, &hi_rows, Axis(0))
}

/// Decompose `data` into `level` levels.
pub fn wavedec2(data: &Array2<f32>, level: usize) -> Decomposition {
    let mut approx = data.clone();
    let mut details = Vec::with_capacity(level);
    for _ in 0..level {
        let (a, d) = dwt2(&approx);
        details.push(d);
        approx = a;
    }
    details.reverse();
    Decomposition { approx, details }
}

/// Reconstruct from a decomposition. The result may be one sample larger than
/// the original along odd-length axes.
pub fn waverec2(coeffs: &Decomposition) -> Array2<f32> {
    let mut approx = coeffs.approx.clone();
    for details in &coeffs.details {
        let (rows, cols) = details.0.dim();
        if approx.dim() != (rows, cols) {
            approx = approx
                .slice(ndarray::s![..rows.min(approx.nrows()), ..cols.min(approx.ncols())])
                .to_owned();
        }
        approx = idwt2(&approx, details);
    }
    approx
}

/// Edge/texture image of a face crop.
///
/// Grayscale, normalise to [0, 1], decompose `level` levels, zero the
/// approximation band, reconstruct, then scale back to 8 bits (clipped,
/// truncated) at the crop's original size.
pub fn detail_image(
    face: &RgbImage,
    wavelet: Wavelet,
    level: usize,
) -> Result<GrayImage, ProcessingError> {
    let (width, height) = face.dimensions();
    if width < MIN_SIDE || height < MIN_SIDE {
        return Err(ProcessingError::ImageTooSmall { width, height, min: MIN_SIDE });
    }

    let gray = imaging::to_grayscale(face, BT601_SWAPPED)?;
    let data = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        gray.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
    });

    let mut coeffs = match wavelet {
        Wavelet::Db1 => wavedec2(&data, level),
    };
    coeffs.approx.fill(0.0);
    let rec = waverec2(&coeffs);

    Ok(GrayImage::from_fn(width, height, |x, y| {
        let v = rec[[y as usize, x as usize]] * 255.0;
        Luma([v.clamp(0.0, 255.0) as u8])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn ramp(rows: usize, cols: usize) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |(r, c)| ((r * 7 + c * 3) % 11) as f32 / 10.0)
    }

    fn max_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_wavelet_names() {
        assert_eq!("db1".parse::<Wavelet>().unwrap(), Wavelet::Db1);
        assert_eq!("HAAR".parse::<Wavelet>().unwrap(), Wavelet::Db1);
        assert!("sym4".parse::<Wavelet>().is_err());
        assert_eq!(Wavelet::Db1.to_string(), "db1");
    }

    #[test]
    fn test_single_level_haar_values() {
        let data = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let (aa, (da, ad, dd)) = dwt2(&data);
        // Approximation is the 2x2 sum scaled by 1/2.
        assert!((aa[[0, 0]] - 5.0).abs() < 1e-5);
        assert!((da[[0, 0]] - -2.0).abs() < 1e-5);
        assert!((ad[[0, 0]] - -1.0).abs() < 1e-5);
        assert!(dd[[0, 0]].abs() < 1e-5);
    }

    #[test]
    fn test_band_lengths_round_up() {
        let dec = wavedec2(&ramp(7, 5), 1);
        assert_eq!(dec.approx.dim(), (4, 3));
        assert_eq!(dec.details[0].0.dim(), (4, 3));
    }

    #[test]
    fn test_perfect_reconstruction_even() {
        let data = ramp(16, 8);
        let rec = waverec2(&wavedec2(&data, 3));
        assert_eq!(rec.dim(), data.dim());
        assert!(max_abs_diff(&rec, &data) < 1e-5);
    }

    #[test]
    fn test_perfect_reconstruction_odd_sizes() {
        let data = ramp(13, 9);
        let rec = waverec2(&wavedec2(&data, 5));
        assert!(rec.nrows() >= 13 && rec.ncols() >= 9);
        let cropped = rec.slice(ndarray::s![..13, ..9]).to_owned();
        assert!(max_abs_diff(&cropped, &data) < 1e-5);
    }

    #[test]
    fn test_levels_beyond_size_keep_unit_bands() {
        let dec = wavedec2(&ramp(4, 4), 5);
        assert_eq!(dec.approx.dim(), (1, 1));
        assert_eq!(dec.details.len(), 5);
    }

    #[test]
    fn test_detail_image_of_flat_crop_is_black() {
        // Zeroing the approximation of a constant image leaves nothing.
        let face = RgbImage::from_pixel(40, 33, Rgb([90, 140, 200]));
        let out = detail_image(&face, Wavelet::Db1, 5).unwrap();
        assert_eq!(out.dimensions(), (40, 33));
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_detail_image_keeps_edges() {
        let face = RgbImage::from_fn(32, 32, |x, _| {
            if x < 16 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) }
        });
        let out = detail_image(&face, Wavelet::Db1, 5).unwrap();
        // The bright half sits above the (removed) mean, the dark half below it.
        assert!(out.get_pixel(24, 10).0[0] > 100);
        assert_eq!(out.get_pixel(4, 10).0[0], 0);
    }

    #[test]
    fn test_detail_image_is_deterministic() {
        let face = RgbImage::from_fn(45, 50, |x, y| Rgb([(x * 5) as u8, (y * 3) as u8, (x ^ y) as u8]));
        let a = detail_image(&face, Wavelet::Db1, 5).unwrap();
        let b = detail_image(&face, Wavelet::Db1, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_detail_image_too_small() {
        let face = RgbImage::new(1, 30);
        assert_eq!(
            detail_image(&face, Wavelet::Db1, 5).unwrap_err(),
            ProcessingError::ImageTooSmall { width: 1, height: 30, min: MIN_SIDE }
        );
    }
}
