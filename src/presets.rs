//! Named looks.
//!
//! A [`Preset`] is a sparse property → value overlay. Applying one touches
//! only the properties it names; everything else keeps its current value.
//! The session copies the overlay into the recorded
//! [`ApplyPreset`](crate::operation::FilterOperation::ApplyPreset) operation,
//! so undo and redo never consult the library again.
//!
//! Preset files are JSON objects mapping preset names to flat value maps:
//!
//! ```json
//! { "faded": { "black_point": 0.1, "contrast": 0.85 } }
//! ```

use crate::catalog::FilterProperty;
use crate::params::FilterParameterSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Invalid preset name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("Preset '{0}' sets no adjustments")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Preset file parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reject names that would be awkward as file names or menu entries.
pub fn validate_preset_name(name: &str) -> Result<(), PresetError> {
    let reason = if name.trim().is_empty() {
        "name cannot be empty"
    } else if name.contains('/') || name.contains('\\') {
        "name cannot contain path separators"
    } else if name.contains("..") {
        "name cannot contain '..'"
    } else if name.starts_with('.') {
        "name cannot start with '.'"
    } else if name.chars().any(char::is_control) {
        "name cannot contain control characters"
    } else {
        return Ok(());
    };
    Err(PresetError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    name: String,
    values: BTreeMap<FilterProperty, f32>,
}

impl Preset {
    /// Values are clamped into their property ranges.
    pub fn new(
        name: impl Into<String>,
        values: BTreeMap<FilterProperty, f32>,
    ) -> Result<Self, PresetError> {
        let name = name.into();
        validate_preset_name(&name)?;
        if values.is_empty() {
            return Err(PresetError::Empty(name));
        }
        let values = values
            .into_iter()
            .map(|(p, v)| (p, p.info().clamp(v)))
            .collect();
        Ok(Self { name, values })
    }

    /// Capture every non-default property of `params` as a new look.
    pub fn from_parameters(
        name: impl Into<String>,
        params: &FilterParameterSet,
    ) -> Result<Self, PresetError> {
        let values = params
            .active_properties()
            .into_iter()
            .map(|p| (p, params.get(p)))
            .collect();
        Self::new(name, values)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &BTreeMap<FilterProperty, f32> {
        &self.values
    }

    /// The state `params` would have after applying this preset.
    pub fn applied_to(&self, params: &FilterParameterSet) -> FilterParameterSet {
        let mut out = *params;
        out.overlay(&self.values);
        out
    }
}

fn builtin(name: &str, values: &[(FilterProperty, f32)]) -> Preset {
    Preset {
        name: name.to_string(),
        values: values.iter().copied().collect(),
    }
}

fn builtin_presets() -> Vec<Preset> {
    use FilterProperty::*;
    vec![
        builtin(
            "vivid",
            &[
                (Saturation, 1.4),
                (Contrast, 1.15),
                (Vignette, 0.3),
                (Sharpness, 0.4),
            ],
        ),
        builtin(
            "noir",
            &[
                (Saturation, 0.0),
                (Contrast, 1.3),
                (BlackPoint, 0.05),
                (Vignette, 0.6),
            ],
        ),
        builtin(
            "warm",
            &[(Temperature, 7500.0), (Saturation, 1.1), (Highlights, 0.9)],
        ),
        builtin(
            "matte",
            &[(BlackPoint, 0.08), (Contrast, 0.9), (Shadows, 0.15)],
        ),
        builtin(
            "soft",
            &[(NoiseReduction, 0.03), (Highlights, 0.85), (Sharpness, 0.0)],
        ),
    ]
}

/// Registry of presets by name.
#[derive(Debug, Clone, Default)]
pub struct PresetLibrary {
    presets: BTreeMap<String, Preset>,
}

impl PresetLibrary {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Library pre-populated with the built-in looks.
    pub fn builtin() -> Self {
        let mut library = Self::empty();
        for preset in builtin_presets() {
            library.presets.insert(preset.name.clone(), preset);
        }
        library
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Add or replace a preset. Returns the replaced one, if any.
    pub fn insert(&mut self, preset: Preset) -> Option<Preset> {
        self.presets.insert(preset.name.clone(), preset)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Merge every preset of a JSON document into the library.
    ///
    /// Unknown property names are skipped with a warning, matching how
    /// parameter snapshots are read. Returns the number of presets added.
    pub fn merge_json(&mut self, json: &str) -> Result<usize, PresetError> {
        let raw: BTreeMap<String, BTreeMap<String, f32>> = serde_json::from_str(json)?;
        let mut added = 0;
        for (name, entries) in raw {
            let mut values = BTreeMap::new();
            for (key, value) in entries {
                match key.parse::<FilterProperty>() {
                    Ok(property) => {
                        values.insert(property, value);
                    }
                    Err(_) => tracing::warn!(preset = %name, key = %key, "ignoring unknown filter property"),
                }
            }
            self.insert(Preset::new(name, values)?);
            added += 1;
        }
        Ok(added)
    }

    /// Load a JSON preset file, see [`merge_json`](Self::merge_json).
    pub fn load_file(&mut self, path: &Path) -> Result<usize, PresetError> {
        let content = fs::read_to_string(path)?;
        let added = self.merge_json(&content)?;
        tracing::info!(path = %path.display(), added, "preset library loaded");
        Ok(added)
    }

    /// Serialize as the same name → flat map document `merge_json` reads.
    pub fn to_json_pretty(&self) -> Result<String, PresetError> {
        let doc: BTreeMap<&str, BTreeMap<&str, f32>> = self
            .presets
            .values()
            .map(|p| {
                let values = p.values.iter().map(|(k, v)| (k.name(), *v)).collect();
                (p.name.as_str(), values)
            })
            .collect();
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FilterProperty::*;

    #[test]
    fn builtin_library_has_vivid() {
        let library = PresetLibrary::builtin();
        let vivid = library.get("vivid").unwrap();
        assert_eq!(vivid.values().len(), 4);
        assert_eq!(vivid.values()[&Saturation], 1.4);
        assert!(library.get("nope").is_none());
    }

    #[test]
    fn builtin_values_lie_in_range() {
        for preset in PresetLibrary::builtin().iter() {
            for (p, v) in preset.values() {
                assert!(p.info().contains(*v), "{}: {p} = {v}", preset.name());
            }
        }
    }

    #[test]
    fn applying_a_preset_leaves_unnamed_properties_alone() {
        let params = FilterParameterSet::new().with(Blur, 3.0).with(Contrast, 0.7);
        let after = PresetLibrary::builtin()
            .get("vivid")
            .unwrap()
            .applied_to(&params);
        assert_eq!(after.get(Blur), 3.0);
        assert_eq!(after.get(Contrast), 1.15);
    }

    #[test]
    fn preset_new_clamps_values() {
        let preset = Preset::new("hot", BTreeMap::from([(Temperature, 50_000.0)])).unwrap();
        assert_eq!(preset.values()[&Temperature], 10_000.0);
    }

    #[test]
    fn preset_rejects_bad_names_and_empty_values() {
        assert!(matches!(
            Preset::new("../etc", BTreeMap::from([(Blur, 1.0)])),
            Err(PresetError::InvalidName { .. })
        ));
        assert!(matches!(
            Preset::new("", BTreeMap::from([(Blur, 1.0)])),
            Err(PresetError::InvalidName { .. })
        ));
        assert!(matches!(
            Preset::new("nothing", BTreeMap::new()),
            Err(PresetError::Empty(_))
        ));
    }

    #[test]
    fn validate_preset_name_cases() {
        assert!(validate_preset_name("Golden Hour").is_ok());
        assert!(validate_preset_name("a/b").is_err());
        assert!(validate_preset_name(".hidden").is_err());
        assert!(validate_preset_name("tab\there").is_err());
    }

    #[test]
    fn from_parameters_captures_active_properties() {
        let params = FilterParameterSet::new().with(Exposure, 0.7).with(Vignette, 0.2);
        let preset = Preset::from_parameters("mine", &params).unwrap();
        assert_eq!(
            preset.values(),
            &BTreeMap::from([(Exposure, 0.7), (Vignette, 0.2)])
        );
        assert!(Preset::from_parameters("none", &FilterParameterSet::new()).is_err());
    }

    #[test]
    fn merge_json_skips_unknown_keys() {
        let mut library = PresetLibrary::empty();
        let added = library
            .merge_json(r#"{ "faded": { "black_point": 0.1, "clarity": 2.0 } }"#)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(
            library.get("faded").unwrap().values(),
            &BTreeMap::from([(BlackPoint, 0.1)])
        );
    }

    #[test]
    fn load_file_round_trips_library() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("looks.json");
        fs::write(&path, PresetLibrary::builtin().to_json_pretty().unwrap()).unwrap();

        let mut library = PresetLibrary::empty();
        assert_eq!(library.load_file(&path).unwrap(), 5);
        assert_eq!(
            library.get("noir").unwrap(),
            PresetLibrary::builtin().get("noir").unwrap()
        );
    }

    #[test]
    fn load_file_missing_is_io_error() {
        let mut library = PresetLibrary::empty();
        assert!(matches!(
            library.load_file(Path::new("/nonexistent/looks.json")),
            Err(PresetError::Io(_))
        ));
    }
}
