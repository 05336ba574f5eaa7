//! Wire representation of a single field.
//!
//! Every channel (cloud API, LAN webserver, app) exchanges fields in the
//! same shape:
//!
//! ```json
//! { "key": "upperThreshold", "label": "Upper threshold", "type": "number",
//!   "value": 85.0, "lastModified": 1737123456789 }
//! ```
//!
//! `lastModified == 0` is the priority flag. Batches are decoded field by
//! field so one malformed entry never poisons the rest.

use crate::{
    error::Result, Error, FieldDef, FieldKey, FieldType, FieldValue, Millis, Timestamp,
    VersionedValue,
};
use serde::{Deserialize, Serialize};

/// One field as it travels between actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireField {
    pub key: FieldKey,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: serde_json::Value,
    /// Absent on endpoints that do not track per-field times
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Millis>,
}

/// A batch entry that could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedField {
    /// The key, when the entry got far enough to have one
    pub key: Option<FieldKey>,
    #[serde(serialize_with = "serialize_display")]
    pub error: Error,
}

fn serialize_display<S: serde::Serializer>(
    error: &Error,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// A decoded batch: the usable fields plus what was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireBatch {
    pub fields: Vec<WireField>,
    pub skipped: Vec<SkippedField>,
}

impl From<Vec<WireField>> for WireBatch {
    fn from(fields: Vec<WireField>) -> Self {
        Self {
            fields,
            skipped: Vec::new(),
        }
    }
}

impl WireField {
    /// Encode a versioned value for `def`.
    ///
    /// Fails with [`Error::ClockUnsynced`] if the value was never stamped.
    pub fn encode(def: &FieldDef, value: &VersionedValue<FieldValue>) -> Result<Self> {
        def.validate(&value.value)?;
        Ok(Self {
            key: def.key.clone(),
            label: def.label.clone(),
            field_type: def.field_type,
            value: value.value.to_json(),
            last_modified: Some(value.timestamp.to_wire()?),
        })
    }

    /// Decode against `def`.
    ///
    /// A missing `lastModified` is filled with `fill`; if `fill` is `Unset`
    /// the field cannot be ordered and is rejected with
    /// [`Error::ClockUnsynced`].
    pub fn decode(&self, def: &FieldDef, fill: Timestamp) -> Result<VersionedValue<FieldValue>> {
        if self.field_type != def.field_type {
            return Err(Error::TypeMismatch {
                field: self.key.clone(),
                expected: def.field_type.to_string(),
                got: self.field_type.to_string(),
            });
        }

        let value = FieldValue::from_json(&self.key, def.field_type, &self.value)?;
        let timestamp = match self.last_modified {
            Some(ms) => Timestamp::from_wire(ms),
            None if fill.is_set() => fill,
            None => return Err(Error::ClockUnsynced),
        };

        Ok(VersionedValue::new(value, timestamp))
    }
}

/// Parse a JSON array of wire fields, skipping malformed entries.
pub fn parse_batch(json: &str) -> Result<WireBatch> {
    let raw: serde_json::Value =
        serde_json::from_str(json).map_err(|e| Error::InvalidPayload(e.to_string()))?;
    let entries = raw
        .as_array()
        .ok_or_else(|| Error::InvalidPayload("field batch must be an array".into()))?;

    let mut batch = WireBatch::default();
    for entry in entries {
        match serde_json::from_value::<WireField>(entry.clone()) {
            Ok(field) => batch.fields.push(field),
            Err(e) => batch.skipped.push(SkippedField {
                key: entry
                    .get("key")
                    .and_then(|k| k.as_str())
                    .map(str::to_string),
                error: Error::InvalidPayload(e.to_string()),
            }),
        }
    }

    Ok(batch)
}
