//! Parameter types for render operations.
//!
//! These structs describe *what* to render, not *how*. A [`RenderPlan`] is
//! derived once from a [`FilterParameterSet`] and handed to the pipeline; the
//! backend only ever sees individual [`FilterStage`]s. Preview and
//! full-resolution renders consume the same plan and differ only in the
//! [`RenderScale`] passed alongside it.
//!
//! ## Types
//!
//! - [`RenderScale`]: ratio of target resolution to the source resolution.
//! - [`FilterStage`]: one property and its clamped value.
//! - [`RenderPlan`]: the active stages in render order.

use crate::catalog::FilterProperty;
use crate::params::FilterParameterSet;

/// Ratio of the rendered image's resolution to the full source.
///
/// `1.0` for the final render, below `1.0` for the preview. Spatial filters
/// multiply their pixel radii by this factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderScale(f32);

impl RenderScale {
    pub const FULL: RenderScale = RenderScale(1.0);

    /// Non-finite or non-positive factors fall back to full scale.
    pub fn new(value: f32) -> Self {
        if value.is_finite() && value > 0.0 {
            Self(value)
        } else {
            Self::FULL
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::FULL
    }
}

/// One filter application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterStage {
    pub property: FilterProperty,
    pub value: f32,
}

impl FilterStage {
    /// Clamps `value` into the property's range.
    pub fn new(property: FilterProperty, value: f32) -> Self {
        Self {
            property,
            value: property.info().clamp(value),
        }
    }

    /// Whether applying this stage would leave the image unchanged.
    pub fn is_identity(&self) -> bool {
        self.property.info().is_default(self.value)
    }
}

/// The active filter set of a parameter snapshot, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPlan {
    stages: Vec<FilterStage>,
}

impl RenderPlan {
    pub fn for_parameters(params: &FilterParameterSet) -> Self {
        let stages = params
            .active_properties()
            .into_iter()
            .map(|p| FilterStage::new(p, params.get(p)))
            .collect();
        Self { stages }
    }

    /// The same plan with `property` dropped, used as the base under a
    /// slider drag.
    pub fn without(&self, property: FilterProperty) -> Self {
        Self {
            stages: self
                .stages
                .iter()
                .copied()
                .filter(|s| s.property != property)
                .collect(),
        }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn is_identity(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
