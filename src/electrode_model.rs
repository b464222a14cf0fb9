//! Electrode model table
//!
//! Models are stored as a JSON object mapping a model name to a flat array:
//!
//! ```text
//! "name": [n_contacts, contact_length, contact_radius, d_1, .., d_{n-1}, total_length]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ModelError;
use crate::trajectory::ElectrodeGeometry;

/// Largest accepted difference between a model length and a measured
/// entry–target distance (mm)
pub const MAX_LENGTH_DIFFERENCE: f64 = 100.0;

#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeModel {
    pub name: String,
    pub geometry: ElectrodeGeometry,
    /// Total electrode length (mm)
    pub length: f64,
}

impl ElectrodeModel {
    /// Parse one model from its flat array representation
    pub fn from_values(name: &str, values: &[f64]) -> Result<Self, ModelError> {
        let invalid = |reason: String| ModelError::InvalidModel {
            name: name.to_string(),
            reason,
        };

        let n_contacts = match values.first() {
            Some(&n) if n >= 1.0 && n.fract() == 0.0 => n as usize,
            Some(&n) => return Err(invalid(format!("contact count must be a positive integer, got {}", n))),
            None => return Err(invalid("empty model".to_string())),
        };
        let expected = n_contacts + 3;
        if values.len() != expected {
            return Err(invalid(format!(
                "expected {} values for {} contacts, got {}",
                expected,
                n_contacts,
                values.len()
            )));
        }

        let contact_length = values[1];
        if !(contact_length > 0.0) {
            return Err(invalid(format!("contact length must be positive, got {}", contact_length)));
        }

        Ok(Self {
            name: name.to_string(),
            geometry: ElectrodeGeometry::new(
                contact_length,
                values[2],
                values[3..expected - 1].to_vec(),
            ),
            length: values[expected - 1],
        })
    }

    pub fn num_contacts(&self) -> usize {
        self.geometry.num_contacts()
    }
}

/// Available electrode models, ordered by name
#[derive(Clone, Debug, Default)]
pub struct ModelTable {
    models: BTreeMap<String, ElectrodeModel>,
}

impl ModelTable {
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let raw: BTreeMap<String, Vec<f64>> = serde_json::from_str(json)?;
        if raw.is_empty() {
            return Err(ModelError::Empty);
        }
        let models = raw
            .iter()
            .map(|(name, values)| Ok((name.clone(), ElectrodeModel::from_values(name, values)?)))
            .collect::<Result<BTreeMap<_, _>, ModelError>>()?;
        Ok(Self { models })
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let json = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let table = Self::from_json_str(&json)?;
        tracing::debug!(path = %path.display(), models = table.len(), "loaded electrode models");
        Ok(table)
    }

    pub fn get(&self, name: &str) -> Result<&ElectrodeModel, ModelError> {
        self.models
            .get(name)
            .ok_or_else(|| ModelError::Unknown(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElectrodeModel> {
        self.models.values()
    }

    /// Model whose total length best matches a measured entry–target distance
    ///
    /// Only models within [`MAX_LENGTH_DIFFERENCE`] are candidates; ties keep
    /// the first by name. Falls back to the first model when none qualifies.
    pub fn closest_to_length(&self, length: f64) -> Option<&ElectrodeModel> {
        let mut best: Option<(&ElectrodeModel, f64)> = None;
        for model in self.models.values() {
            let diff = (length - model.length).abs();
            if diff < best.map_or(MAX_LENGTH_DIFFERENCE, |(_, d)| d) {
                best = Some((model, diff));
            }
        }
        best.map(|(model, _)| model)
            .or_else(|| self.models.values().next())
    }
}
