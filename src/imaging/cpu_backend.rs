//! Pure Rust CPU render backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Filter stages | [`filters`](super::filters), rayon row-parallel |
//! | Downsample | `image::imageops::resize` with `Lanczos3` filter |
//! | Encode | `image` crate, format from the output extension |

use super::backend::{BackendError, RenderBackend};
use super::calculations::preview_dimensions;
use super::filters;
use super::params::{FilterStage, RenderScale};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use std::path::Path;
use std::sync::LazyLock;

const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// CPU backend using the `image` crate and rayon.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RenderBackend for CpuBackend {
    fn apply(
        &self,
        image: &RgbaImage,
        stage: FilterStage,
        scale: RenderScale,
    ) -> Result<RgbaImage, BackendError> {
        filters::apply_stage(image, stage, scale)
    }

    fn downsample(&self, image: &RgbaImage, max_edge: u32) -> Result<RgbaImage, BackendError> {
        let (w, h) = preview_dimensions(image.dimensions(), max_edge);
        if (w, h) == image.dimensions() {
            let mut raw = filters::allocate(w, h)?;
            raw.copy_from_slice(image.as_raw());
            return RgbaImage::from_raw(w, h, raw).ok_or_else(|| {
                BackendError::ProcessingFailed("preview buffer size mismatch".into())
            });
        }
        // probe before imageops allocates the target
        let _probe = filters::allocate(w, h)?;
        Ok(image::imageops::resize(image, w, h, FilterType::Lanczos3))
    }
}

/// Load and decode an image from disk as 8-bit RGBA.
pub fn load_image(path: &Path) -> Result<RgbaImage, BackendError> {
    let img = ImageReader::open(path)
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })?;
    Ok(img.to_rgba8())
}

/// Save a rendered image, inferring the format from the extension.
///
/// JPEG has no alpha channel, so alpha is dropped for `.jpg`/`.jpeg`.
pub fn save_image(image: &RgbaImage, path: &Path) -> Result<(), BackendError> {
    let format = ImageFormat::from_path(path).map_err(|_| {
        BackendError::ProcessingFailed(format!(
            "Unsupported output format: {}",
            path.display()
        ))
    })?;
    let result = match format {
        ImageFormat::Jpeg => {
            DynamicImage::ImageRgba8(image.clone())
                .to_rgb8()
                .save_with_format(path, format)
        }
        ImageFormat::Png | ImageFormat::Tiff | ImageFormat::WebP => {
            image.save_with_format(path, format)
        }
        other => {
            return Err(BackendError::ProcessingFailed(format!(
                "Unsupported output format: {other:?}"
            )));
        }
    };
    result.map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to encode {}: {}", path.display(), e))
    })
}
