//! Record type stored in both tiers.
//!
//! A record is an `id` plus an open set of JSON fields. Only `id` and
//! `timestamp` are inspected; everything else is carried verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TierError;

/// Name of the field holding the retention timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Reserved for [`Record::id`]; never a payload key.
pub const ID_FIELD: &str = "id";

/// A uniquely identified record with opaque payload fields.
///
/// Serializes as a flat JSON object: `{"id": "...", "timestamp": "...", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Partition and lookup key
    pub id: String,

    /// All other fields, preserved across tiers
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with no payload fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add or replace a payload field.
    ///
    /// The reserved `id` key is ignored; the id is set by [`Record::new`].
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != ID_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Set the `timestamp` field from a UTC instant (RFC 3339).
    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        self.with_field(TIMESTAMP_FIELD, timestamp.to_rfc3339())
    }

    /// Check the record can be keyed.
    pub fn validate(&self) -> Result<(), TierError> {
        if self.id.trim().is_empty() {
            return Err(TierError::malformed(&self.id, "id must not be empty"));
        }
        if self.fields.contains_key(ID_FIELD) {
            return Err(TierError::malformed(&self.id, "payload must not contain an id field"));
        }
        Ok(())
    }

    /// Parse the `timestamp` field.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, TierError> {
        match self.fields.get(TIMESTAMP_FIELD) {
            None => Err(TierError::malformed(&self.id, "missing timestamp field")),
            Some(Value::String(raw)) => parse_timestamp(raw)
                .map_err(|reason| TierError::malformed(&self.id, reason)),
            Some(other) => Err(TierError::malformed(
                &self.id,
                format!("timestamp must be a string, got {}", other),
            )),
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Parse a date-time string into UTC.
///
/// Accepts RFC 3339, naive date-times (`T` or space separated, optional
/// fraction) read as UTC, and bare `YYYY-MM-DD` dates read as midnight UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty timestamp".to_string());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(format!("unparseable timestamp '{}'", raw))
}
