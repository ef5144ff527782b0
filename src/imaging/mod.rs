//! Rendering: pure Rust, CPU only.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Tonal filters** | per-pixel transforms, rayon `par_chunks_mut` |
//! | **Spatial filters** | `image::imageops::blur`, radius × render scale |
//! | **Preview base** | `image::imageops::resize` with `Lanczos3` |
//! | **Decode / encode** | `image` crate (JPEG, PNG, TIFF, WebP) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry and colour math (unit testable)
//! - **Parameters**: [`RenderScale`], [`FilterStage`], [`RenderPlan`]
//! - **Backend**: [`RenderBackend`] trait + [`CpuBackend`]
//! - **Filters**: one kernel per filter property
//! - **Context**: [`RenderContext`], the shared backend + thread pool
//! - **Pipeline**: [`FilterRenderPipeline`], single-filter and chain application
//! - **Preview**: [`PreviewSlot`], last-request-wins preview publication

pub mod backend;
mod calculations;
pub mod context;
pub mod cpu_backend;
pub mod filters;
mod params;
pub mod pipeline;
pub mod preview;

pub use backend::{BackendError, RenderBackend};
pub use calculations::{preview_dimensions, render_scale};
pub use context::{ContextError, RenderContext};
pub use cpu_backend::{CpuBackend, load_image, save_image, supported_input_extensions};
pub use params::{FilterStage, RenderPlan, RenderScale};
pub use pipeline::{FilterRenderPipeline, RenderError, RenderOutput, SkippedStage};
pub use preview::{PreviewSlot, PreviewTicket, PublishedPreview};
