//! Pixel helpers — luma conversion, bilinear resize, cropping.

use crate::error::ProcessingError;
use crate::types::Rect;
use image::{GrayImage, ImageBuffer, Luma, Pixel, RgbImage};

/// Channel weights applied to (R, G, B) when collapsing to one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaWeights(pub [f32; 3]);

/// ITU-R BT.601 luma. Used for face and eye detection.
pub const BT601: LumaWeights = LumaWeights([0.299, 0.587, 0.114]);

/// BT.601 with the red and blue weights exchanged.
///
/// The wavelet plane of the trained classifier was produced by an RGB->gray
/// conversion run over BGR-ordered pixels; reproducing that keeps inference
/// vectors in the training distribution.
pub const BT601_SWAPPED: LumaWeights = LumaWeights([0.114, 0.587, 0.299]);

/// Collapse a colour raster to a single channel.
pub fn to_grayscale(img: &RgbImage, weights: LumaWeights) -> Result<GrayImage, ProcessingError> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ProcessingError::EmptyRaster { width, height });
    }
    let [wr, wg, wb] = weights.0;
    Ok(GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let luma = wr * r as f32 + wg * g as f32 + wb * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    }))
}

/// Source taps for one output coordinate: (lower index, upper index, upper weight).
type Tap = (u32, u32, f32);

/// Half-pixel-centred linear taps; samples beyond either edge clamp to the edge pixel.
fn linear_taps(src_len: u32, dst_len: u32) -> Vec<Tap> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len as i64 - 1;
    (0..dst_len)
        .map(|d| {
            let s = (d as f64 + 0.5) * scale - 0.5;
            let mut i0 = s.floor() as i64;
            let mut frac = s - s.floor();
            if i0 < 0 {
                i0 = 0;
                frac = 0.0;
            }
            if i0 >= last {
                i0 = last;
                frac = 0.0;
            }
            let i1 = (i0 + 1).min(last);
            (i0 as u32, i1 as u32, frac as f32)
        })
        .collect()
}

/// Resize with bilinear interpolation.
///
/// Works for any 8-bit pixel type. An empty source yields an all-zero output.
pub fn resize_bilinear<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    new_width: u32,
    new_height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let mut out = ImageBuffer::<P, Vec<u8>>::new(new_width, new_height);
    let (width, height) = src.dimensions();
    if width == 0 || height == 0 || new_width == 0 || new_height == 0 {
        return out;
    }
    if (width, height) == (new_width, new_height) {
        return src.clone();
    }

    let xs = linear_taps(width, new_width);
    let ys = linear_taps(height, new_height);
    let channels = P::CHANNEL_COUNT as usize;

    for (x, y, px) in out.enumerate_pixels_mut() {
        let (x0, x1, fx) = xs[x as usize];
        let (y0, y1, fy) = ys[y as usize];

        let tl = src.get_pixel(x0, y0).channels();
        let tr = src.get_pixel(x1, y0).channels();
        let bl = src.get_pixel(x0, y1).channels();
        let br = src.get_pixel(x1, y1).channels();

        let dst = px.channels_mut();
        for c in 0..channels {
            let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
            let bot = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
            let val = top * (1.0 - fy) + bot * fy;
            dst[c] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Copy `region` out of `src`. The region must already lie inside the image.
pub fn crop<P>(src: &ImageBuffer<P, Vec<u8>>, region: Rect) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    image::imageops::crop_imm(src, region.x, region.y, region.width, region.height).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_grayscale_bt601() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let gray = to_grayscale(&img, BT601).unwrap();
        // 0.299 * 255 = 76.245
        assert!(gray.pixels().all(|p| p.0[0] == 76));
    }

    #[test]
    fn test_grayscale_swapped_weights_use_blue_as_red() {
        let img = RgbImage::from_pixel(1, 1, Rgb([0, 0, 255]));
        let normal = to_grayscale(&img, BT601).unwrap();
        let swapped = to_grayscale(&img, BT601_SWAPPED).unwrap();
        assert_eq!(normal.get_pixel(0, 0).0[0], 29); // 0.114 * 255
        assert_eq!(swapped.get_pixel(0, 0).0[0], 76); // 0.299 * 255
    }

    #[test]
    fn test_grayscale_white_stays_white() {
        let img = RgbImage::from_pixel(3, 1, Rgb([255, 255, 255]));
        let gray = to_grayscale(&img, BT601_SWAPPED).unwrap();
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_grayscale_empty_raster() {
        let img = RgbImage::new(0, 5);
        assert_eq!(
            to_grayscale(&img, BT601),
            Err(ProcessingError::EmptyRaster { width: 0, height: 5 })
        );
    }

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let img = RgbImage::from_pixel(100, 60, Rgb([10, 128, 240]));
        let out = resize_bilinear(&img, 32, 32);
        assert_eq!(out.dimensions(), (32, 32));
        assert!(out.pixels().all(|p| p.0 == [10, 128, 240]));
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let img = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 10 + y) as u8]));
        assert_eq!(resize_bilinear(&img, 7, 5), img);
    }

    #[test]
    fn test_resize_halving_averages_pairs() {
        // 4x1 -> 2x1: sample points fall exactly between source pixels.
        let img = GrayImage::from_raw(4, 1, vec![0, 100, 200, 200]).unwrap();
        let out = resize_bilinear(&img, 2, 1);
        assert_eq!(out.into_raw(), vec![50, 200]);
    }

    #[test]
    fn test_resize_upscale_clamps_edges() {
        let img = GrayImage::from_raw(2, 1, vec![0, 200]).unwrap();
        let out = resize_bilinear(&img, 4, 1).into_raw();
        // Outer samples clamp to the edge pixels; inner ones interpolate.
        assert_eq!(out, vec![0, 50, 150, 200]);
    }

    #[test]
    fn test_crop_copies_region() {
        let img = GrayImage::from_fn(10, 10, |x, y| Luma([(y * 10 + x) as u8]));
        let out = crop(&img, Rect::new(2, 3, 4, 2));
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.get_pixel(0, 0).0[0], 32);
        assert_eq!(out.get_pixel(3, 1).0[0], 45);
    }
}
