//! The live adjustment state: one value per [`FilterProperty`].
//!
//! A [`FilterParameterSet`] is always fully populated and every stored value
//! lies within its property's range: [`set`](FilterParameterSet::set) clamps
//! through the catalog. History recording is not this type's concern; callers
//! build [`FilterOperation`](crate::operation::FilterOperation)s around their
//! mutations.
//!
//! ## Serialized form
//!
//! The externally visible schema is a flat map of the twelve property names
//! to floats:
//!
//! ```json
//! { "brightness": 0.0, "exposure": 0.0, "contrast": 1.0, ... }
//! ```
//!
//! Reading is lenient: absent keys take their defaults, out-of-range values are
//! clamped, non-finite values fall back to the default, and unknown keys are
//! skipped with a warning.

use crate::catalog::FilterProperty;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One property whose value differs between two parameter sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub property: FilterProperty,
    pub old_value: f32,
    pub new_value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParameterSet {
    values: [f32; FilterProperty::COUNT],
}

impl Default for FilterParameterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterParameterSet {
    /// Every property at its default.
    pub fn new() -> Self {
        let mut values = [0.0; FilterProperty::COUNT];
        for p in FilterProperty::ALL {
            values[p.index()] = p.default_value();
        }
        Self { values }
    }

    pub fn get(&self, property: FilterProperty) -> f32 {
        self.values[property.index()]
    }

    /// Store `value` clamped into the property's range.
    pub fn set(&mut self, property: FilterProperty, value: f32) {
        self.values[property.index()] = property.info().clamp(value);
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, property: FilterProperty, value: f32) -> Self {
        self.set(property, value);
        self
    }

    pub fn reset(&mut self, property: FilterProperty) {
        self.values[property.index()] = property.default_value();
    }

    pub fn reset_all(&mut self) {
        *self = Self::new();
    }

    /// Set every property present in `values`, leaving the rest untouched.
    pub fn overlay(&mut self, values: &BTreeMap<FilterProperty, f32>) {
        for (&property, &value) in values {
            self.set(property, value);
        }
    }

    /// Properties whose values differ from `other` by more than `epsilon`,
    /// in declaration order. `old_value` is taken from `self`.
    pub fn diff(&self, other: &FilterParameterSet, epsilon: f32) -> Vec<ParameterChange> {
        FilterProperty::ALL
            .into_iter()
            .filter_map(|property| {
                let old_value = self.get(property);
                let new_value = other.get(property);
                ((new_value - old_value).abs() > epsilon).then_some(ParameterChange {
                    property,
                    old_value,
                    new_value,
                })
            })
            .collect()
    }

    /// Properties not at their default, in declaration order.
    pub fn active_properties(&self) -> Vec<FilterProperty> {
        FilterProperty::ALL
            .into_iter()
            .filter(|p| !p.info().is_default(self.get(*p)))
            .collect()
    }

    pub fn is_default(&self) -> bool {
        self.active_properties().is_empty()
    }

    pub fn approx_eq(&self, other: &FilterParameterSet, epsilon: f32) -> bool {
        self.diff(other, epsilon).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterProperty, f32)> + '_ {
        FilterProperty::ALL.into_iter().map(|p| (p, self.get(p)))
    }

    /// SHA-256 of the canonical value bytes, as lowercase hex.
    ///
    /// Two sets with identical values always share a fingerprint; used to
    /// key cached full-resolution renders.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"filter-params\0");
        for (_, value) in self.iter() {
            // -0.0 and 0.0 render identically
            let value = if value == 0.0 { 0.0f32 } else { value };
            hasher.update(value.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Build from the flat name → value schema. See the [module docs](self).
    pub fn from_flat_map<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f32)>,
    {
        let mut params = Self::new();
        for (key, value) in entries {
            let Ok(property) = key.parse::<FilterProperty>() else {
                tracing::warn!(key, "ignoring unknown filter property");
                continue;
            };
            if value.is_finite() {
                params.set(property, value);
            } else {
                tracing::warn!(%property, value, "non-finite value replaced by default");
            }
        }
        params
    }

    pub fn to_flat_map(&self) -> BTreeMap<String, f32> {
        self.iter()
            .map(|(p, v)| (p.name().to_string(), v))
            .collect()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for FilterParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FilterProperty::COUNT))?;
        for (property, value) in self.iter() {
            map.serialize_entry(property.name(), &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FilterParameterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, f32>::deserialize(deserializer)?;
        Ok(Self::from_flat_map(raw.iter().map(|(k, v)| (k.as_str(), *v))))
    }
}
