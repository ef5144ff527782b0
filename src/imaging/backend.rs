//! Render backend trait and shared types.
//!
//! The [`RenderBackend`] trait defines the two operations every backend must
//! support: applying one filter stage and downsampling a source into a
//! preview base. The production implementation is
//! [`CpuBackend`](super::cpu_backend::CpuBackend), which runs the pixel math in
//! [`filters`](super::filters) on the calling rayon pool.

use super::params::{FilterStage, RenderScale};
use crate::catalog::FilterProperty;
use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// One filter could not be applied. The pipeline skips the stage.
    #[error("{property} filter failed: {reason}")]
    StageFailed {
        property: FilterProperty,
        reason: String,
    },
    /// An output buffer could not be allocated. Aborts the render.
    #[error("Cannot allocate a {width}x{height} render buffer")]
    Allocation { width: u32, height: u32 },
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Trait for render backends.
///
/// Implementations must be pure: the output depends only on the input image,
/// the stage, and the scale.
pub trait RenderBackend: Send + Sync {
    /// Apply one filter stage, returning a new image of the same size.
    fn apply(
        &self,
        image: &RgbaImage,
        stage: FilterStage,
        scale: RenderScale,
    ) -> Result<RgbaImage, BackendError>;

    /// Reduce `image` so its longer edge is at most `max_edge`.
    fn downsample(&self, image: &RgbaImage, max_edge: u32) -> Result<RgbaImage, BackendError>;
}
