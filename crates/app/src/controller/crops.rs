//! Static agronomic reference data for the crops the classifier knows about.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Growing conditions for one crop, as human-readable ranges.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct CropReference {
    pub(crate) humidity: String,
    pub(crate) soil_moisture: String,
}

/// Crop identifier to reference ranges. Loaded once, never mutated.
#[derive(Clone, Debug)]
pub(crate) struct CropReferenceTable {
    entries: BTreeMap<String, CropReference>,
}

/// Body of a successful `/crop_data` lookup.
#[derive(Debug, Serialize)]
pub(crate) struct CropDataResponse<'a> {
    pub(crate) crop: &'a str,
    pub(crate) humidity: &'a str,
    pub(crate) soil_moisture: &'a str,
}

const BUILTIN: [(&str, &str, &str); 5] = [
    ("jute", "70-90%", "60-80%"),
    ("maize", "50-70%", "50-60%"),
    ("rice", "70-80%", "60-70%"),
    ("sugarcane", "60-80%", "55-75%"),
    ("wheat", "50-60%", "40-60%"),
];

impl CropReferenceTable {
    pub(crate) fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(crop, humidity, soil_moisture)| {
                (
                    crop.to_string(),
                    CropReference {
                        humidity: humidity.to_string(),
                        soil_moisture: soil_moisture.to_string(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Replace the built-in table with a JSON object of the same shape:
    /// `{"rice": {"humidity": "70-80%", "soil_moisture": "60-70%"}, ...}`.
    pub(crate) fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read crop table {}", path.display()))?;
        let entries: BTreeMap<String, CropReference> = serde_json::from_str(&raw)
            .with_context(|| format!("Crop table {} is not valid JSON", path.display()))?;
        if entries.is_empty() {
            bail!("Crop table {} has no entries", path.display());
        }
        Ok(Self { entries })
    }

    pub(crate) fn lookup<'a>(&'a self, crop: &'a str) -> Option<CropDataResponse<'a>> {
        self.entries.get(crop).map(|entry| CropDataResponse {
            crop,
            humidity: &entry.humidity,
            soil_moisture: &entry.soil_moisture,
        })
    }

    pub(crate) fn crops(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
