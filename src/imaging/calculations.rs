//! Pure calculation functions for render geometry and colour math.
//!
//! All functions here are pure and testable without any images.

/// Rec. 709 luma of an RGB triple in any consistent unit.
pub fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.2126 * r + 0.7152 * g + 0.0722 * b
}

/// Dimensions of the preview base for a source image.
///
/// The longer edge is reduced to `max_edge`, preserving aspect ratio. Images
/// that already fit are never upscaled. Neither side drops below one pixel.
///
/// # Examples
/// ```
/// # use darkroom::imaging::preview_dimensions;
/// assert_eq!(preview_dimensions((4000, 3000), 1000), (1000, 750));
/// assert_eq!(preview_dimensions((600, 800), 1000), (600, 800));
/// ```
pub fn preview_dimensions(source: (u32, u32), max_edge: u32) -> (u32, u32) {
    let (src_w, src_h) = source;
    let longer_edge = src_w.max(src_h);
    if longer_edge <= max_edge || longer_edge == 0 {
        return source;
    }

    let ratio = max_edge as f64 / longer_edge as f64;
    if src_w >= src_h {
        let h = ((src_h as f64 * ratio).round() as u32).max(1);
        (max_edge, h)
    } else {
        let w = ((src_w as f64 * ratio).round() as u32).max(1);
        (w, max_edge)
    }
}

/// Scale factor between a rendered image and its source, measured on the
/// longer edge.
///
/// # Examples
/// ```
/// # use darkroom::imaging::render_scale;
/// assert_eq!(render_scale((4000, 3000), (1000, 750)), 0.25);
/// ```
pub fn render_scale(source: (u32, u32), target: (u32, u32)) -> f32 {
    let src = source.0.max(source.1);
    let tgt = target.0.max(target.1);
    if src == 0 {
        return 1.0;
    }
    tgt as f32 / src as f32
}

/// Gaussian sigma in target pixels for a radius given in source pixels.
pub fn scaled_sigma(source_sigma: f32, scale: f32) -> f32 {
    source_sigma * scale
}

/// Darkening factor of the vignette at pixel `(x, y)` of a `width × height`
/// image.
///
/// Distance is measured in normalized coordinates so the falloff lands on the
/// same relative position at every resolution. The result is in `[0, 1]`.
pub fn vignette_factor(x: u32, y: u32, width: u32, height: u32, amount: f32) -> f32 {
    let nx = (x as f32 + 0.5) / width as f32 - 0.5;
    let ny = (y as f32 + 0.5) / height as f32 - 0.5;
    // corner distance is sqrt(0.5)
    let d2 = (nx * nx + ny * ny) * 2.0;
    (1.0 - amount * 0.5 * d2).clamp(0.0, 1.0)
}

/// Warm/cool shift for a white-balance temperature in Kelvin.
///
/// `6500` (the neutral default) maps to `0`; warmer settings are positive.
pub fn kelvin_shift(kelvin: f32) -> f32 {
    (kelvin - 6500.0) / 3500.0
}

/// sRGB-encoded `[0, 1]` to linear light.
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Linear light to sRGB-encoded `[0, 1]`.
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}
