//! Filter application over a shared [`RenderContext`].
//!
//! The pipeline turns a parameter snapshot into a [`RenderPlan`] and runs its
//! stages in order, each consuming the previous output. Preview and final
//! renders go through the same code path; only the base image and the
//! [`RenderScale`] differ.
//!
//! ## Failure handling
//!
//! - A stage that fails with [`BackendError::StageFailed`] (or any other
//!   non-allocation error) is skipped: its input flows on to the next stage,
//!   a warning is logged, and the stage is listed in
//!   [`RenderOutput::skipped`].
//! - [`BackendError::Allocation`] aborts the render with a [`RenderError`].
//!
//! When nothing needs to run (identity plan or a value at its default) the
//! output borrows the input image instead of copying it.

use super::backend::BackendError;
use super::context::{ContextError, RenderContext};
use super::params::{FilterStage, RenderPlan, RenderScale};
use crate::catalog::FilterProperty;
use crate::params::FilterParameterSet;
use image::RgbaImage;
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Render aborted: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Context(#[from] ContextError),
}

/// A stage that failed and was passed through.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStage {
    pub stage: FilterStage,
    pub reason: String,
}

#[derive(Debug)]
pub struct RenderOutput<'a> {
    pub image: Cow<'a, RgbaImage>,
    pub skipped: Vec<SkippedStage>,
}

impl<'a> RenderOutput<'a> {
    fn unchanged(image: &'a RgbaImage) -> Self {
        Self {
            image: Cow::Borrowed(image),
            skipped: Vec::new(),
        }
    }

    /// Every stage ran.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image.into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct FilterRenderPipeline {
    context: Arc<RenderContext>,
}

impl FilterRenderPipeline {
    pub fn new(context: Arc<RenderContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.context
    }

    /// Apply exactly one filter. A value at the property's default returns
    /// the input unchanged.
    pub fn apply_single<'a>(
        &self,
        image: &'a RgbaImage,
        property: FilterProperty,
        value: f32,
        scale: RenderScale,
    ) -> Result<RenderOutput<'a>, RenderError> {
        let stage = FilterStage::new(property, value);
        if stage.is_identity() {
            return Ok(RenderOutput::unchanged(image));
        }
        let mut output = RenderOutput::unchanged(image);
        self.run_stage(&mut output, stage, scale)?;
        Ok(output)
    }

    /// Apply every active filter of `params` in declaration order.
    pub fn apply_chain<'a>(
        &self,
        image: &'a RgbaImage,
        params: &FilterParameterSet,
        scale: RenderScale,
    ) -> Result<RenderOutput<'a>, RenderError> {
        self.apply_plan(image, &RenderPlan::for_parameters(params), scale)
    }

    pub fn apply_plan<'a>(
        &self,
        image: &'a RgbaImage,
        plan: &RenderPlan,
        scale: RenderScale,
    ) -> Result<RenderOutput<'a>, RenderError> {
        let never = AtomicBool::new(false);
        let output = self.apply_plan_cancellable(image, plan, scale, &never)?;
        // an unset flag cannot cancel
        Ok(output.unwrap_or_else(|| RenderOutput::unchanged(image)))
    }

    /// [`apply_chain`](Self::apply_chain) that checks `cancel` between
    /// stages. Returns `Ok(None)` once cancelled; no partial image escapes.
    pub fn apply_chain_cancellable<'a>(
        &self,
        image: &'a RgbaImage,
        params: &FilterParameterSet,
        scale: RenderScale,
        cancel: &AtomicBool,
    ) -> Result<Option<RenderOutput<'a>>, RenderError> {
        self.apply_plan_cancellable(image, &RenderPlan::for_parameters(params), scale, cancel)
    }

    pub fn apply_plan_cancellable<'a>(
        &self,
        image: &'a RgbaImage,
        plan: &RenderPlan,
        scale: RenderScale,
        cancel: &AtomicBool,
    ) -> Result<Option<RenderOutput<'a>>, RenderError> {
        let started = Instant::now();
        let mut output = RenderOutput::unchanged(image);
        for &stage in plan.stages() {
            if cancel.load(Ordering::SeqCst) {
                tracing::debug!(property = %stage.property, "render cancelled");
                return Ok(None);
            }
            self.run_stage(&mut output, stage, scale)?;
        }
        if cancel.load(Ordering::SeqCst) {
            return Ok(None);
        }
        tracing::debug!(
            stages = plan.len(),
            skipped = output.skipped.len(),
            scale = scale.value(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "filter chain rendered"
        );
        Ok(Some(output))
    }

    /// Reduce a source image to a preview base.
    pub fn downsample(&self, image: &RgbaImage, max_edge: u32) -> Result<RgbaImage, RenderError> {
        Ok(self
            .context
            .render(|backend| backend.downsample(image, max_edge))?)
    }

    fn run_stage(
        &self,
        output: &mut RenderOutput<'_>,
        stage: FilterStage,
        scale: RenderScale,
    ) -> Result<(), RenderError> {
        let input: &RgbaImage = &output.image;
        match self
            .context
            .render(|backend| backend.apply(input, stage, scale))
        {
            Ok(next) => output.image = Cow::Owned(next),
            Err(err @ BackendError::Allocation { .. }) => return Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    property = %stage.property,
                    value = stage.value,
                    error = %err,
                    "filter stage failed, passing image through"
                );
                output.skipped.push(SkippedStage {
                    stage,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use FilterProperty::*;
    use image::Rgba;

    fn pipeline_with(backend: MockBackend) -> (FilterRenderPipeline, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let context =
            RenderContext::with_backend(Box::new(Arc::clone(&backend)), 1).unwrap();
        (FilterRenderPipeline::new(Arc::new(context)), backend)
    }

    fn source() -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]))
    }

    #[test]
    fn apply_single_at_default_borrows_input() {
        let (pipeline, _) = pipeline_with(MockBackend::new());
        let image = source();
        for p in FilterProperty::ALL {
            let out = pipeline
                .apply_single(&image, p, p.default_value(), RenderScale::FULL)
                .unwrap();
            assert!(matches!(out.image, Cow::Borrowed(_)), "{p} was not short-circuited");
        }
    }

    #[test]
    fn apply_single_runs_one_stage() {
        let (pipeline, _) = pipeline_with(MockBackend::new());
        let image = source();
        let out = pipeline
            .apply_single(&image, Exposure, 1.0, RenderScale::FULL)
            .unwrap();
        assert_eq!(out.image.get_pixel(0, 0)[0], 11);
        assert!(out.is_complete());
    }

    #[test]
    fn identity_chain_returns_input_unchanged() {
        let (pipeline, _) = pipeline_with(MockBackend::new());
        let image = source();
        let out = pipeline
            .apply_chain(&image, &FilterParameterSet::new(), RenderScale::FULL)
            .unwrap();
        assert!(matches!(out.image, Cow::Borrowed(_)));
        assert_eq!(*out.image, image);
    }

    #[test]
    fn chain_runs_every_active_stage_in_order() {
        let (pipeline, backend) = pipeline_with(MockBackend::new());
        let image = source();
        let params = FilterParameterSet::new()
            .with(BlackPoint, 0.1)
            .with(Brightness, 0.3)
            .with(Blur, 2.0);
        let out = pipeline
            .apply_chain(&image, &params, RenderScale::new(0.5))
            .unwrap();

        assert_eq!(out.image.get_pixel(0, 0)[0], 13);
        assert_eq!(backend.applied_properties(), vec![Brightness, Blur, BlackPoint]);
        assert!(backend.get_operations().iter().all(|op| matches!(
            op,
            RecordedOp::Apply { scale, .. } if *scale == 0.5
        )));
    }

    #[test]
    fn failed_stage_is_passed_through_and_reported() {
        let (pipeline, _) = pipeline_with(MockBackend::failing_on(&[Contrast]));
        let image = source();
        let params = FilterParameterSet::new()
            .with(Brightness, 0.3)
            .with(Contrast, 1.3)
            .with(Saturation, 0.5);
        let out = pipeline
            .apply_chain(&image, &params, RenderScale::FULL)
            .unwrap();

        // two of three stages ran
        assert_eq!(out.image.get_pixel(0, 0)[0], 12);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].stage, FilterStage::new(Contrast, 1.3));
    }

    #[test]
    fn allocation_failure_aborts_the_render() {
        let (pipeline, _) = pipeline_with(MockBackend::out_of_memory());
        let image = source();
        let params = FilterParameterSet::new().with(Vignette, 1.0);
        let result = pipeline.apply_chain(&image, &params, RenderScale::FULL);
        assert!(matches!(
            result,
            Err(RenderError::Backend(BackendError::Allocation { .. }))
        ));
    }

    #[test]
    fn cancelled_chain_yields_nothing() {
        let (pipeline, _) = pipeline_with(MockBackend::new());
        let image = source();
        let cancel = AtomicBool::new(true);
        let params = FilterParameterSet::new().with(Shadows, 0.4);
        let out = pipeline
            .apply_chain_cancellable(&image, &params, RenderScale::FULL, &cancel)
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn uncancelled_chain_completes() {
        let (pipeline, _) = pipeline_with(MockBackend::new());
        let image = source();
        let cancel = AtomicBool::new(false);
        let params = FilterParameterSet::new().with(Shadows, 0.4);
        let out = pipeline
            .apply_chain_cancellable(&image, &params, RenderScale::FULL, &cancel)
            .unwrap()
            .unwrap();
        assert_eq!(out.image.get_pixel(0, 0)[0], 11);
    }
}
