//! SenML (RFC 8428) telemetry records and JSON pack encoding
//!
//! A [`Pack`] is an ordered list of [`Record`]s serialized as a JSON array
//! using the short SenML labels (`bn`, `n`, `u`, `v`, `t`). Empty strings and
//! absent values are omitted on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single labeled measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Record {
    /// Sensor family identifier
    #[serde(rename = "bn", default, skip_serializing_if = "String::is_empty")]
    pub base_name: String,
    /// Metric name, e.g. "voltage"
    #[serde(rename = "n", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Unit symbol, e.g. "v"
    #[serde(rename = "u", default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Seconds since the Unix epoch
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl Record {
    /// Build a record stamped with the current time
    pub fn build(name: &str, value: f64, unit: &str, base_name: &str) -> Self {
        Self {
            base_name: base_name.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            value: Some(value),
            time: Some(now_seconds()),
        }
    }
}

fn now_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Ordered batch of records encoded as one payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(transparent)]
pub struct Pack {
    pub records: Vec<Record>,
}

/// Errors produced while encoding or decoding a pack
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Record '{name}' has a non-finite value that JSON cannot represent")]
    NonFiniteValue { name: String },
    #[error("Failed to serialize SenML pack")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to deserialize SenML pack")]
    Deserialize(#[source] serde_json::Error),
}

impl Pack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize to SenML JSON
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        // serde_json silently writes NaN and infinities as `null`
        for record in &self.records {
            let finite = [record.value, record.time]
                .into_iter()
                .flatten()
                .all(f64::is_finite);
            if !finite {
                return Err(EncodingError::NonFiniteValue {
                    name: record.name.clone(),
                });
            }
        }

        serde_json::to_vec(self).map_err(EncodingError::Serialize)
    }

    /// Parse a SenML JSON payload
    pub fn decode(payload: &[u8]) -> Result<Self, EncodingError> {
        serde_json::from_slice(payload).map_err(EncodingError::Deserialize)
    }
}

impl From<Record> for Pack {
    fn from(record: Record) -> Self {
        Self {
            records: vec![record],
        }
    }
}
