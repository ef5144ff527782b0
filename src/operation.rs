//! Invertible parameter-state transitions.
//!
//! A [`FilterOperation`] describes one committed change to a
//! [`FilterParameterSet`]. Every variant carries the values it overwrote, so
//! its [`inverse`](FilterOperation::inverse) is computed from the operation
//! alone, never from the live state or the catalog defaults.
//! Snapshot variants (`ResetAll`, `ApplyPreset`) capture the full "before"
//! set when they are created and invert into a [`RestoreSnapshot`].
//!
//! [`RestoreSnapshot`]: FilterOperation::RestoreSnapshot

use crate::catalog::FilterProperty;
use crate::params::FilterParameterSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterOperation {
    SetValue {
        property: FilterProperty,
        new_value: f32,
        previous_value: f32,
    },
    AdjustValue {
        property: FilterProperty,
        delta: f32,
        base_value: f32,
    },
    ResetToDefault {
        property: FilterProperty,
        previous_value: f32,
    },
    ResetAll {
        previous_values: FilterParameterSet,
    },
    ApplyPreset {
        name: String,
        values: BTreeMap<FilterProperty, f32>,
        previous_values: FilterParameterSet,
    },
    RestoreSnapshot {
        values: FilterParameterSet,
        previous_values: FilterParameterSet,
    },
}

/// One `{property, new_value, previous_value}` triple, the wire form of a
/// change for sync and persistence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub property: FilterProperty,
    pub new_value: f32,
    pub previous_value: f32,
}

impl FilterOperation {
    /// `SetValue` from the current state of `params`.
    pub fn set_value(params: &FilterParameterSet, property: FilterProperty, value: f32) -> Self {
        Self::SetValue {
            property,
            new_value: property.info().clamp(value),
            previous_value: params.get(property),
        }
    }

    pub fn adjust_value(params: &FilterParameterSet, property: FilterProperty, delta: f32) -> Self {
        Self::AdjustValue {
            property,
            delta,
            base_value: params.get(property),
        }
    }

    pub fn reset_to_default(params: &FilterParameterSet, property: FilterProperty) -> Self {
        Self::ResetToDefault {
            property,
            previous_value: params.get(property),
        }
    }

    pub fn reset_all(params: &FilterParameterSet) -> Self {
        Self::ResetAll {
            previous_values: *params,
        }
    }

    pub fn apply_preset(
        params: &FilterParameterSet,
        name: impl Into<String>,
        values: BTreeMap<FilterProperty, f32>,
    ) -> Self {
        Self::ApplyPreset {
            name: name.into(),
            values,
            previous_values: *params,
        }
    }

    /// Apply in the forward direction.
    pub fn apply(&self, params: &mut FilterParameterSet) {
        match self {
            Self::SetValue {
                property,
                new_value,
                ..
            } => params.set(*property, *new_value),
            Self::AdjustValue {
                property,
                delta,
                base_value,
            } => params.set(*property, base_value + delta),
            Self::ResetToDefault { property, .. } => params.reset(*property),
            Self::ResetAll { .. } => params.reset_all(),
            Self::ApplyPreset { values, .. } => params.overlay(values),
            Self::RestoreSnapshot { values, .. } => *params = *values,
        }
    }

    /// The operation that undoes `self` when applied to the state `self`
    /// produced.
    pub fn inverse(&self) -> FilterOperation {
        match self {
            Self::SetValue {
                property,
                new_value,
                previous_value,
            } => Self::SetValue {
                property: *property,
                new_value: *previous_value,
                previous_value: *new_value,
            },
            Self::AdjustValue {
                property,
                delta,
                base_value,
            } => Self::AdjustValue {
                property: *property,
                delta: -delta,
                base_value: base_value + delta,
            },
            Self::ResetToDefault {
                property,
                previous_value,
            } => Self::SetValue {
                property: *property,
                new_value: *previous_value,
                previous_value: property.default_value(),
            },
            Self::ResetAll { previous_values } => Self::RestoreSnapshot {
                values: *previous_values,
                previous_values: FilterParameterSet::new(),
            },
            Self::ApplyPreset {
                values,
                previous_values,
                ..
            } => {
                let mut after = *previous_values;
                after.overlay(values);
                Self::RestoreSnapshot {
                    values: *previous_values,
                    previous_values: after,
                }
            }
            Self::RestoreSnapshot {
                values,
                previous_values,
            } => Self::RestoreSnapshot {
                values: *previous_values,
                previous_values: *values,
            },
        }
    }

    /// Properties whose values this operation may change.
    pub fn affected_properties(&self) -> BTreeSet<FilterProperty> {
        match self {
            Self::SetValue { property, .. }
            | Self::AdjustValue { property, .. }
            | Self::ResetToDefault { property, .. } => BTreeSet::from([*property]),
            Self::ResetAll { .. } | Self::ApplyPreset { .. } | Self::RestoreSnapshot { .. } => {
                FilterProperty::ALL.into_iter().collect()
            }
        }
    }

    /// The single property touched, if this is a single-property operation.
    pub fn target(&self) -> Option<FilterProperty> {
        match self {
            Self::SetValue { property, .. }
            | Self::AdjustValue { property, .. }
            | Self::ResetToDefault { property, .. } => Some(*property),
            _ => None,
        }
    }

    /// Expand into `{property, new_value, previous_value}` triples.
    ///
    /// Snapshot variants list only the properties that actually change.
    pub fn value_changes(&self) -> Vec<ValueChange> {
        match self {
            Self::SetValue {
                property,
                new_value,
                previous_value,
            } => vec![ValueChange {
                property: *property,
                new_value: *new_value,
                previous_value: *previous_value,
            }],
            Self::AdjustValue {
                property,
                delta,
                base_value,
            } => vec![ValueChange {
                property: *property,
                new_value: property.info().clamp(base_value + delta),
                previous_value: *base_value,
            }],
            Self::ResetToDefault {
                property,
                previous_value,
            } => vec![ValueChange {
                property: *property,
                new_value: property.default_value(),
                previous_value: *previous_value,
            }],
            Self::ResetAll { previous_values } => {
                snapshot_changes(previous_values, &FilterParameterSet::new())
            }
            Self::ApplyPreset {
                values,
                previous_values,
                ..
            } => {
                let mut after = *previous_values;
                after.overlay(values);
                snapshot_changes(previous_values, &after)
            }
            Self::RestoreSnapshot {
                values,
                previous_values,
            } => snapshot_changes(previous_values, values),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::SetValue {
                property,
                new_value,
                ..
            } => format!("Set {} to {:.2}", property.label(), new_value),
            Self::AdjustValue {
                property, delta, ..
            } => format!("Adjust {} by {:+.2}", property.label(), delta),
            Self::ResetToDefault { property, .. } => format!("Reset {}", property.label()),
            Self::ResetAll { .. } => "Reset all".to_string(),
            Self::ApplyPreset { name, .. } => format!("Apply preset '{name}'"),
            Self::RestoreSnapshot { .. } => "Restore adjustments".to_string(),
        }
    }
}

fn snapshot_changes(before: &FilterParameterSet, after: &FilterParameterSet) -> Vec<ValueChange> {
    before
        .diff(after, 0.0)
        .into_iter()
        .map(|c| ValueChange {
            property: c.property,
            new_value: c.new_value,
            previous_value: c.old_value,
        })
        .collect()
}

/// Merge runs of consecutive operations on the same property.
///
/// - consecutive `SetValue`s collapse into one spanning the first previous
///   value to the last new value;
/// - consecutive `AdjustValue`s sum their deltas and keep the first base,
///   as long as each one starts where the previous one ended unclamped.
///
/// Operations are never reordered and non-adjacent operations are never
/// merged. `optimize(&optimize(ops)) == optimize(ops)`.
pub fn optimize(operations: &[FilterOperation]) -> Vec<FilterOperation> {
    let mut out: Vec<FilterOperation> = Vec::with_capacity(operations.len());
    for op in operations {
        if let Some(last) = out.last_mut()
            && let Some(merged) = merge(last, op)
        {
            *last = merged;
            continue;
        }
        out.push(op.clone());
    }
    out
}

fn merge(first: &FilterOperation, second: &FilterOperation) -> Option<FilterOperation> {
    use FilterOperation::{AdjustValue, SetValue};
    match (first, second) {
        (
            SetValue {
                property: a,
                previous_value,
                ..
            },
            SetValue {
                property: b,
                new_value,
                ..
            },
        ) if a == b => Some(SetValue {
            property: *a,
            new_value: *new_value,
            previous_value: *previous_value,
        }),
        (
            AdjustValue {
                property: a,
                delta: first_delta,
                base_value,
            },
            AdjustValue {
                property: b,
                delta: second_delta,
                base_value: second_base,
            },
        ) if a == b && continues_unclamped(*a, base_value + first_delta, *second_base) => {
            Some(AdjustValue {
                property: *a,
                delta: first_delta + second_delta,
                base_value: *base_value,
            })
        }
        _ => None,
    }
}

/// The first adjustment landed inside the range and the second one started
/// from where it landed. A clamped step cannot be folded into a sum.
fn continues_unclamped(property: FilterProperty, reached: f32, next_base: f32) -> bool {
    property.info().contains(reached)
        && (next_base - reached).abs() <= 1e-6 * reached.abs().max(1.0)
}
