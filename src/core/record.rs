use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Record {id}: name is empty")]
    EmptyName { id: i64 },

    #[error("Record {id}: latitude {value} is outside [-90, 90]")]
    LatitudeOutOfRange { id: i64, value: f64 },

    #[error("Record {id}: longitude {value} is outside [-180, 180]")]
    LongitudeOutOfRange { id: i64, value: f64 },

    #[error("Record {id}: identity already used by an earlier record")]
    DuplicateId { id: i64 },

    #[error("Row {row}: {message}")]
    Malformed { row: usize, message: String },
}

/// A geotagged point of interest as read from a record source.
///
/// `attributes` carries every column the engine does not interpret
/// (address, rating, followers, prices...). They are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl LocationRecord {
    pub fn new(id: i64, name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            name: name.into(),
            latitude,
            longitude,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName { id: self.id });
        }
        // NaN fails the range check as well
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange {
                id: self.id,
                value: self.latitude,
            });
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange {
                id: self.id,
                value: self.longitude,
            });
        }
        Ok(())
    }
}

/// Split `records` into the valid ones (order preserved) and one error per
/// rejected record. A repeated id keeps its first occurrence.
pub fn partition_valid(records: Vec<LocationRecord>) -> (Vec<LocationRecord>, Vec<ValidationError>) {
    let mut seen = HashSet::new();
    let mut valid = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        if let Err(e) = record.validate() {
            rejected.push(e);
            continue;
        }
        if !seen.insert(record.id) {
            rejected.push(ValidationError::DuplicateId { id: record.id });
            continue;
        }
        valid.push(record);
    }

    (valid, rejected)
}
