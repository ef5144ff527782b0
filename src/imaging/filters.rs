// ============================================================================
// FILTER KERNELS: one pure function per filter property
// ============================================================================
//
// Every kernel maps (input, clamped value, scale) to a new image of the same
// size. Alpha is preserved. Per-pixel work runs row-parallel through rayon on
// whichever pool the caller installed.
// ============================================================================

use super::backend::BackendError;
use super::calculations::{
    kelvin_shift, linear_to_srgb, luma, scaled_sigma, srgb_to_linear, vignette_factor,
};
use super::params::{FilterStage, RenderScale};
use crate::catalog::FilterProperty;
use image::RgbaImage;
use rayon::prelude::*;

/// Unsharp-mask radius at full resolution, in source pixels.
const SHARPEN_SIGMA: f32 = 1.0;
/// Smoothing radius used by noise reduction, in source pixels.
const DENOISE_SIGMA: f32 = 1.5;
/// Below this sigma a Gaussian no longer moves any pixel.
const MIN_SIGMA: f32 = 0.05;
/// Maximum red/blue shift of the temperature filter, in 8-bit levels.
const TEMPERATURE_GAIN: f32 = 40.0;

/// Apply one stage. Dispatches on the stage's property.
pub fn apply_stage(
    image: &RgbaImage,
    stage: FilterStage,
    scale: RenderScale,
) -> Result<RgbaImage, BackendError> {
    let v = stage.value;
    let scale = scale.value();
    match stage.property {
        FilterProperty::Brightness => brightness(image, v),
        FilterProperty::Exposure => exposure(image, v),
        FilterProperty::Contrast => contrast(image, v),
        FilterProperty::Saturation => saturation(image, v),
        FilterProperty::Sharpness => sharpness(image, v, scale),
        FilterProperty::Blur => blur(image, v, scale),
        FilterProperty::Vignette => vignette(image, v),
        FilterProperty::NoiseReduction => noise_reduction(image, v, scale),
        FilterProperty::Highlights => highlights(image, v),
        FilterProperty::Shadows => shadows(image, v),
        FilterProperty::Temperature => temperature(image, v),
        FilterProperty::BlackPoint => black_point(image, v),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Empty buffer with room for a `width × height` RGBA image, reserved
/// fallibly.
fn reserve(width: u32, height: u32) -> Result<(Vec<u8>, usize), BackendError> {
    let err = || BackendError::Allocation { width, height };
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(err)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| err())?;
    Ok((buf, len))
}

/// Zeroed RGBA buffer for a `width × height` image.
pub fn allocate(width: u32, height: u32) -> Result<Vec<u8>, BackendError> {
    let (mut buf, len) = reserve(width, height)?;
    buf.resize(len, 0);
    Ok(buf)
}

fn finish(width: u32, height: u32, raw: Vec<u8>) -> Result<RgbaImage, BackendError> {
    RgbaImage::from_raw(width, height, raw)
        .ok_or_else(|| BackendError::ProcessingFailed("render buffer size mismatch".into()))
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Apply a per-pixel transform that also sees the pixel's coordinates.
/// `transform` receives (x, y, r, g, b, a) with channels as f32 in 0..255.
fn transform_pixels<F>(src: &RgbaImage, transform: F) -> Result<RgbaImage, BackendError>
where
    F: Fn(u32, u32, f32, f32, f32, f32) -> (f32, f32, f32, f32) + Sync,
{
    let (w, h) = src.dimensions();
    let mut dst_raw = allocate(w, h)?;
    if w == 0 || h == 0 {
        return finish(w, h, dst_raw);
    }
    let stride = w as usize * 4;
    let src_raw = src.as_raw();

    dst_raw
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row_out)| {
            let row_in = &src_raw[y * stride..(y + 1) * stride];
            for x in 0..w as usize {
                let pi = x * 4;
                let (nr, ng, nb, na) = transform(
                    x as u32,
                    y as u32,
                    row_in[pi] as f32,
                    row_in[pi + 1] as f32,
                    row_in[pi + 2] as f32,
                    row_in[pi + 3] as f32,
                );
                row_out[pi] = to_u8(nr);
                row_out[pi + 1] = to_u8(ng);
                row_out[pi + 2] = to_u8(nb);
                row_out[pi + 3] = to_u8(na);
            }
        });

    finish(w, h, dst_raw)
}

/// Position-independent form of [`transform_pixels`].
fn map_pixels<F>(src: &RgbaImage, transform: F) -> Result<RgbaImage, BackendError>
where
    F: Fn(f32, f32, f32, f32) -> (f32, f32, f32, f32) + Sync,
{
    transform_pixels(src, |_, _, r, g, b, a| transform(r, g, b, a))
}

/// Per-channel lookup table applied to R, G and B.
fn map_lut(src: &RgbaImage, lut: &[u8; 256]) -> Result<RgbaImage, BackendError> {
    map_pixels(src, |r, g, b, a| {
        (
            lut[r as usize] as f32,
            lut[g as usize] as f32,
            lut[b as usize] as f32,
            a,
        )
    })
}

/// Blend `src` with a same-sized companion image pixel by pixel.
fn combine<F>(src: &RgbaImage, other: &RgbaImage, mix: F) -> Result<RgbaImage, BackendError>
where
    F: Fn(f32, f32) -> f32 + Sync,
{
    let (w, h) = src.dimensions();
    let mut dst_raw = allocate(w, h)?;
    let a = src.as_raw();
    let b = other.as_raw();
    dst_raw
        .par_chunks_mut(4)
        .zip(a.par_chunks(4).zip(b.par_chunks(4)))
        .for_each(|(out, (pa, pb))| {
            for c in 0..3 {
                out[c] = to_u8(mix(pa[c] as f32, pb[c] as f32));
            }
            out[3] = pa[3];
        });
    finish(w, h, dst_raw)
}

/// Gaussian blur that is a copy for negligible radii.
fn gaussian(src: &RgbaImage, sigma: f32) -> Result<RgbaImage, BackendError> {
    if !(sigma >= MIN_SIGMA) {
        let (w, h) = src.dimensions();
        let mut raw = allocate(w, h)?;
        raw.copy_from_slice(src.as_raw());
        return finish(w, h, raw);
    }
    // imageops allocates internally; probe the same size first
    let (w, h) = src.dimensions();
    let _probe = reserve(w, h)?;
    Ok(image::imageops::blur(src, sigma))
}

// ============================================================================
// TONAL FILTERS
// ============================================================================

/// `amount`: -1..1, fraction of full scale added to every channel.
pub fn brightness(src: &RgbaImage, amount: f32) -> Result<RgbaImage, BackendError> {
    let offset = amount * 255.0;
    map_pixels(src, move |r, g, b, a| (r + offset, g + offset, b + offset, a))
}

/// `ev`: -2..2 stops, applied as a gain in linear light.
pub fn exposure(src: &RgbaImage, ev: f32) -> Result<RgbaImage, BackendError> {
    let gain = 2.0f32.powf(ev);
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let linear = srgb_to_linear(i as f32 / 255.0) * gain;
        *slot = to_u8(linear_to_srgb(linear.min(1.0)) * 255.0);
    }
    map_lut(src, &lut)
}

/// `factor`: 0.5..1.5, stretch around mid-grey.
pub fn contrast(src: &RgbaImage, factor: f32) -> Result<RgbaImage, BackendError> {
    let stretch = move |c: f32| (c - 127.5) * factor + 127.5;
    map_pixels(src, move |r, g, b, a| (stretch(r), stretch(g), stretch(b), a))
}

/// `factor`: 0..2, 0 is greyscale.
pub fn saturation(src: &RgbaImage, factor: f32) -> Result<RgbaImage, BackendError> {
    map_pixels(src, move |r, g, b, a| {
        let l = luma(r, g, b);
        (
            l + (r - l) * factor,
            l + (g - l) * factor,
            l + (b - l) * factor,
            a,
        )
    })
}

/// `level`: 0..1. Values below 1 pull bright pixels down.
pub fn highlights(src: &RgbaImage, level: f32) -> Result<RgbaImage, BackendError> {
    let pull = 1.0 - level;
    map_pixels(src, move |r, g, b, a| {
        let lum = luma(r, g, b) / 255.0;
        let gain = 1.0 - pull * lum * lum * 0.5;
        (r * gain, g * gain, b * gain, a)
    })
}

/// `amount`: -1..1, positive lifts dark pixels.
pub fn shadows(src: &RgbaImage, amount: f32) -> Result<RgbaImage, BackendError> {
    map_pixels(src, move |r, g, b, a| {
        let lum = luma(r, g, b) / 255.0;
        let weight = (1.0 - lum) * (1.0 - lum);
        let adjustment = weight * amount * 128.0;
        (r + adjustment, g + adjustment, b + adjustment, a)
    })
}

/// `point`: 0..0.5, the input level mapped to black.
pub fn black_point(src: &RgbaImage, point: f32) -> Result<RgbaImage, BackendError> {
    let black = point * 255.0;
    let range = 255.0 - black;
    let mut lut = [0u8; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = to_u8((i as f32 - black) / range * 255.0);
    }
    map_lut(src, &lut)
}

/// `kelvin`: 2000..10000. Above 6500 warms, below cools.
pub fn temperature(src: &RgbaImage, kelvin: f32) -> Result<RgbaImage, BackendError> {
    let shift = kelvin_shift(kelvin) * TEMPERATURE_GAIN;
    map_pixels(src, move |r, g, b, a| (r + shift, g, b - shift, a))
}

// ============================================================================
// SPATIAL FILTERS
// ============================================================================

/// `radius`: 0..20 source pixels.
pub fn blur(src: &RgbaImage, radius: f32, scale: f32) -> Result<RgbaImage, BackendError> {
    gaussian(src, scaled_sigma(radius, scale))
}

/// `amount`: 0..2 unsharp-mask strength.
pub fn sharpness(src: &RgbaImage, amount: f32, scale: f32) -> Result<RgbaImage, BackendError> {
    let blurred = gaussian(src, scaled_sigma(SHARPEN_SIGMA, scale))?;
    combine(src, &blurred, move |orig, soft| orig + (orig - soft) * amount)
}

/// `strength`: 0..0.1, blend toward a smoothed copy (0.1 is fully smoothed).
pub fn noise_reduction(
    src: &RgbaImage,
    strength: f32,
    scale: f32,
) -> Result<RgbaImage, BackendError> {
    let mix = (strength * 10.0).clamp(0.0, 1.0);
    let smoothed = gaussian(src, scaled_sigma(DENOISE_SIGMA, scale))?;
    combine(src, &smoothed, move |orig, soft| orig + (soft - orig) * mix)
}

// ============================================================================
// EFFECTS
// ============================================================================

/// `amount`: 0..2 corner darkening, in normalized image coordinates.
pub fn vignette(src: &RgbaImage, amount: f32) -> Result<RgbaImage, BackendError> {
    let (w, h) = src.dimensions();
    transform_pixels(src, move |x, y, r, g, b, a| {
        let f = vignette_factor(x, y, w, h, amount);
        (r * f, g * f, b * f, a)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(r: u8, g: u8, b: u8) -> RgbaImage {
        RgbaImage::from_pixel(8, 8, Rgba([r, g, b, 200]))
    }

    /// Left half black, right half white.
    fn edge() -> RgbaImage {
        RgbaImage::from_fn(16, 4, |x, _| {
            if x < 8 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    fn px(img: &RgbaImage, x: u32, y: u32) -> [u8; 4] {
        img.get_pixel(x, y).0
    }

    #[test]
    fn brightness_offsets_channels_and_keeps_alpha() {
        let out = brightness(&solid(100, 100, 100), 0.2).unwrap();
        assert_eq!(px(&out, 0, 0), [151, 151, 151, 200]);
    }

    #[test]
    fn exposure_one_stop_brightens() {
        let src = solid(100, 100, 100);
        let out = exposure(&src, 1.0).unwrap();
        assert!(px(&out, 0, 0)[0] > 100);
        let out = exposure(&src, -1.0).unwrap();
        assert!(px(&out, 0, 0)[0] < 100);
    }

    #[test]
    fn contrast_pushes_away_from_mid_grey() {
        let out = contrast(&solid(200, 50, 128), 1.5).unwrap();
        let [r, g, b, _] = px(&out, 0, 0);
        assert!(r > 200);
        assert!(g < 50);
        assert!((b as i32 - 128).abs() <= 1);
    }

    #[test]
    fn zero_saturation_is_grey() {
        let out = saturation(&solid(200, 40, 90), 0.0).unwrap();
        let [r, g, b, _] = px(&out, 0, 0);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn highlights_pull_bright_pixels_more_than_dark() {
        let bright = highlights(&solid(240, 240, 240), 0.0).unwrap();
        let dark = highlights(&solid(30, 30, 30), 0.0).unwrap();
        assert!(240 - px(&bright, 0, 0)[0] as i32 > 30 - px(&dark, 0, 0)[0] as i32);
    }

    #[test]
    fn shadows_lift_dark_pixels() {
        let out = shadows(&solid(20, 20, 20), 0.5).unwrap();
        assert!(px(&out, 0, 0)[0] > 60);
    }

    #[test]
    fn black_point_crushes_low_levels() {
        let out = black_point(&solid(20, 128, 255), 0.1).unwrap();
        let [r, g, b, _] = px(&out, 0, 0);
        assert_eq!(r, 0);
        assert!(g > 100 && g < 128);
        assert_eq!(b, 255);
    }

    #[test]
    fn temperature_warms_and_cools() {
        let warm = temperature(&solid(128, 128, 128), 10_000.0).unwrap();
        let [r, _, b, _] = px(&warm, 0, 0);
        assert!(r > 128 && b < 128);
        let cool = temperature(&solid(128, 128, 128), 3000.0).unwrap();
        let [r, _, b, _] = px(&cool, 0, 0);
        assert!(r < 128 && b > 128);
    }

    #[test]
    fn blur_softens_an_edge() {
        let out = blur(&edge(), 2.0, 1.0).unwrap();
        let left = px(&out, 7, 1)[0];
        let right = px(&out, 8, 1)[0];
        assert!(left > 0 && right < 255);
    }

    #[test]
    fn blur_radius_follows_scale() {
        let full = blur(&edge(), 2.0, 1.0).unwrap();
        let tiny = blur(&edge(), 2.0, 0.01).unwrap();
        assert_eq!(tiny, edge());
        assert_ne!(full, edge());
    }

    #[test]
    fn sharpness_increases_edge_contrast() {
        let grey_edge = RgbaImage::from_fn(16, 4, |x, _| {
            if x < 8 {
                Rgba([60, 60, 60, 255])
            } else {
                Rgba([190, 190, 190, 255])
            }
        });
        let out = sharpness(&grey_edge, 1.0, 1.0).unwrap();
        assert!(px(&out, 7, 1)[0] < 60);
        assert!(px(&out, 8, 1)[0] > 190);
    }

    #[test]
    fn noise_reduction_smooths_toward_neighbours() {
        let out = noise_reduction(&edge(), 0.1, 1.0).unwrap();
        assert!(px(&out, 7, 1)[0] > 0);
    }

    #[test]
    fn vignette_darkens_corners_only() {
        let src = RgbaImage::from_pixel(33, 33, Rgba([200, 200, 200, 255]));
        let out = vignette(&src, 1.0).unwrap();
        assert_eq!(px(&out, 16, 16)[0], 200);
        assert!(px(&out, 0, 0)[0] < 150);
    }

    #[test]
    fn apply_stage_dispatches_by_property() {
        let src = solid(100, 100, 100);
        let via_stage = apply_stage(
            &src,
            FilterStage::new(FilterProperty::Brightness, 0.2),
            RenderScale::FULL,
        )
        .unwrap();
        assert_eq!(via_stage, brightness(&src, 0.2).unwrap());
    }

    #[test]
    fn allocation_overflow_is_reported() {
        assert!(matches!(
            allocate(u32::MAX, u32::MAX),
            Err(BackendError::Allocation { .. })
        ));
    }

    #[test]
    fn empty_image_passes_through() {
        let out = brightness(&RgbaImage::new(0, 0), 0.5).unwrap();
        assert_eq!(out.dimensions(), (0, 0));
    }
}
