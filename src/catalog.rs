//! Filter property catalog.
//!
//! The closed set of adjustable properties and their static metadata. Every
//! property has a numeric range, a default that is the identity for its
//! filter, and a quantization step used while dragging a slider.
//!
//! | Property | Range | Default | Step | Group |
//! |---|---|---|---|---|
//! | `brightness` | −1 … 1 | 0 | 0.01 | light |
//! | `exposure` | −2 … 2 EV | 0 | 0.01 | light |
//! | `contrast` | 0.5 … 1.5 | 1 | 0.01 | light |
//! | `saturation` | 0 … 2 | 1 | 0.01 | color |
//! | `sharpness` | 0 … 2 | 0 | 0.01 | detail |
//! | `blur` | 0 … 20 px | 0 | 0.1 | detail |
//! | `vignette` | 0 … 2 | 0 | 0.01 | effects |
//! | `noise_reduction` | 0 … 0.1 | 0 | 0.001 | detail |
//! | `highlights` | 0 … 1 | 1 | 0.01 | light |
//! | `shadows` | −1 … 1 | 0 | 0.01 | light |
//! | `temperature` | 2000 … 10000 K | 6500 | 50 | color |
//! | `black_point` | 0 … 0.5 | 0 | 0.01 | light |
//!
//! Declaration order is also the render order of the filter chain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown filter property: {0}")]
pub struct UnknownProperty(pub String);

/// One independently adjustable filter parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FilterProperty {
    Brightness,
    Exposure,
    Contrast,
    Saturation,
    Sharpness,
    Blur,
    Vignette,
    NoiseReduction,
    Highlights,
    Shadows,
    Temperature,
    BlackPoint,
}

/// Display grouping for editor panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyGroup {
    Light,
    Color,
    Detail,
    Effects,
}

/// Static metadata for a [`FilterProperty`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyInfo {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub step: f32,
    pub label: &'static str,
    pub group: PropertyGroup,
}

const fn info(
    min: f32,
    max: f32,
    default: f32,
    step: f32,
    label: &'static str,
    group: PropertyGroup,
) -> PropertyInfo {
    PropertyInfo {
        min,
        max,
        default,
        step,
        label,
        group,
    }
}

/// Indexed by `FilterProperty as usize`.
static CATALOG: [PropertyInfo; FilterProperty::COUNT] = [
    info(-1.0, 1.0, 0.0, 0.01, "Brightness", PropertyGroup::Light),
    info(-2.0, 2.0, 0.0, 0.01, "Exposure", PropertyGroup::Light),
    info(0.5, 1.5, 1.0, 0.01, "Contrast", PropertyGroup::Light),
    info(0.0, 2.0, 1.0, 0.01, "Saturation", PropertyGroup::Color),
    info(0.0, 2.0, 0.0, 0.01, "Sharpness", PropertyGroup::Detail),
    info(0.0, 20.0, 0.0, 0.1, "Blur", PropertyGroup::Detail),
    info(0.0, 2.0, 0.0, 0.01, "Vignette", PropertyGroup::Effects),
    info(0.0, 0.1, 0.0, 0.001, "Noise Reduction", PropertyGroup::Detail),
    info(0.0, 1.0, 1.0, 0.01, "Highlights", PropertyGroup::Light),
    info(-1.0, 1.0, 0.0, 0.01, "Shadows", PropertyGroup::Light),
    info(2000.0, 10000.0, 6500.0, 50.0, "Temperature", PropertyGroup::Color),
    info(0.0, 0.5, 0.0, 0.01, "Black Point", PropertyGroup::Light),
];

impl FilterProperty {
    pub const COUNT: usize = 12;

    /// All properties in declaration (and render) order.
    pub const ALL: [FilterProperty; Self::COUNT] = [
        Self::Brightness,
        Self::Exposure,
        Self::Contrast,
        Self::Saturation,
        Self::Sharpness,
        Self::Blur,
        Self::Vignette,
        Self::NoiseReduction,
        Self::Highlights,
        Self::Shadows,
        Self::Temperature,
        Self::BlackPoint,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn info(self) -> &'static PropertyInfo {
        &CATALOG[self.index()]
    }

    pub fn default_value(self) -> f32 {
        self.info().default
    }

    /// Serialized name, e.g. `noise_reduction`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Brightness => "brightness",
            Self::Exposure => "exposure",
            Self::Contrast => "contrast",
            Self::Saturation => "saturation",
            Self::Sharpness => "sharpness",
            Self::Blur => "blur",
            Self::Vignette => "vignette",
            Self::NoiseReduction => "noise_reduction",
            Self::Highlights => "highlights",
            Self::Shadows => "shadows",
            Self::Temperature => "temperature",
            Self::BlackPoint => "black_point",
        }
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }

    /// Whether the filter samples neighbouring pixels and therefore scales
    /// its radius with render resolution.
    pub fn is_spatial(self) -> bool {
        matches!(self, Self::Sharpness | Self::Blur | Self::NoiseReduction)
    }
}

impl fmt::Display for FilterProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterProperty {
    type Err = UnknownProperty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownProperty(s.to_string()))
    }
}

impl PropertyGroup {
    pub const ALL: [PropertyGroup; 4] = [Self::Light, Self::Color, Self::Detail, Self::Effects];

    /// Members of this group in declaration order.
    pub fn properties(self) -> Vec<FilterProperty> {
        FilterProperty::ALL
            .into_iter()
            .filter(|p| p.info().group == self)
            .collect()
    }
}

impl PropertyInfo {
    /// Clamp into `[min, max]`. NaN maps to the default, infinities to the
    /// nearest bound.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }

    /// Round to the nearest multiple of `step`, then clamp.
    pub fn quantize(&self, value: f32) -> f32 {
        if !value.is_finite() {
            return self.clamp(value);
        }
        let steps = (value / self.step).round();
        self.clamp(steps * self.step)
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_default(&self, value: f32) -> bool {
        value == self.default
    }
}

/// Clamp `value` into the range of `property`.
pub fn clamp(property: FilterProperty, value: f32) -> f32 {
    property.info().clamp(value)
}

/// Quantize `value` to the step of `property`, within range.
pub fn quantize(property: FilterProperty, value: f32) -> f32 {
    property.info().quantize(value)
}
