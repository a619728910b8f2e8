//! Demographic roster: the candidate pool of participant profiles.
//!
//! A roster is an ordered set of records keyed by a unique identifier
//! column, with arbitrary question/answer attributes. It is supplied by
//! external configuration loading and stays read-only to the core once
//! validated; assignment variants that add columns work on a private copy.

use std::collections::HashSet;
use std::io::Read;

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// One participant profile: a unique id plus ordered question/answer pairs.
///
/// Attribute order is preserved because it drives the numbering of the
/// rendered demographic narrative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRecord {
    pub id: String,
    pub attributes: Vec<(String, String)>,
}

impl RosterRecord {
    /// Look up an attribute by column name.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Append a column, replacing any existing value under the same name.
    pub fn set(&mut self, column: &str, value: String) {
        match self.attributes.iter_mut().find(|(name, _)| name == column) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((column.to_string(), value)),
        }
    }
}

/// The candidate pool. Invariant: non-empty, identifiers unique.
#[derive(Debug, Clone)]
pub struct Roster {
    id_column: String,
    records: Vec<RosterRecord>,
}

impl Roster {
    /// Build a roster, validating the non-empty and unique-id invariants.
    pub fn new(id_column: &str, records: Vec<RosterRecord>) -> Result<Self, ConfigError> {
        if records.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.id.clone()) {
                return Err(ConfigError::DuplicateId(record.id.clone()));
            }
        }
        Ok(Self {
            id_column: id_column.to_string(),
            records,
        })
    }

    /// Read a roster from CSV. The identifier column must be present in the
    /// header; all other columns become ordered attributes.
    pub fn from_csv(reader: impl Read, id_column: &str) -> Result<Self, ConfigError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|_| ConfigError::EmptyRoster)?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if !headers.iter().any(|h| h == id_column) {
            return Err(ConfigError::MissingColumn(id_column.to_string()));
        }

        let mut records = Vec::new();
        for (row, result) in csv_reader.records().enumerate() {
            let row_values = result.map_err(|_| ConfigError::MissingId {
                row,
                column: id_column.to_string(),
            })?;
            let mut id = None;
            let mut attributes = Vec::new();
            for (header, value) in headers.iter().zip(row_values.iter()) {
                if header == id_column {
                    id = Some(value.to_string());
                } else {
                    attributes.push((header.clone(), value.to_string()));
                }
            }
            let id = id.filter(|v| !v.is_empty()).ok_or(ConfigError::MissingId {
                row,
                column: id_column.to_string(),
            })?;
            records.push(RosterRecord { id, attributes });
        }

        Self::new(id_column, records)
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RosterRecord] {
        &self.records
    }

    /// Whether every record carries the named column.
    pub fn has_column(&self, column: &str) -> bool {
        self.records.iter().all(|r| r.get(column).is_some())
    }

    /// Group records by the values of a column, preserving first-seen group
    /// order and within-group record order.
    pub fn group_by(&self, column: &str) -> Result<Vec<(String, Vec<&RosterRecord>)>, ConfigError> {
        let mut groups: Vec<(String, Vec<&RosterRecord>)> = Vec::new();
        for record in &self.records {
            let key = record
                .get(column)
                .ok_or_else(|| ConfigError::MissingColumn(column.to_string()))?;
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, members)) => members.push(record),
                None => groups.push((key.to_string(), vec![record])),
            }
        }
        Ok(groups)
    }

    /// Serialize one record as a JSON object, id column included.
    pub fn record_json(&self, record: &RosterRecord) -> Value {
        let mut map = Map::new();
        map.insert(self.id_column.clone(), Value::String(record.id.clone()));
        for (name, value) in &record.attributes {
            map.insert(name.clone(), Value::String(value.clone()));
        }
        Value::Object(map)
    }
}
