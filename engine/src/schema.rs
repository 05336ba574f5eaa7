//! Field schema definition and validation.
//!
//! Every actor agrees on the same set of named, typed fields. The schema
//! fixes each field's type and default so inbound data can be checked
//! before it reaches a cell.

use crate::{error::Result, Error, FieldKey, FieldType, FieldValue, SchemaVersion};
use serde::{Deserialize, Serialize};

/// Definition of one synced field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Stable key used on the wire
    pub key: FieldKey,
    /// Human-readable label
    pub label: String,
    /// Field type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Value every slot starts with
    pub default: FieldValue,
}

impl FieldDef {
    pub fn boolean(key: impl Into<FieldKey>, label: impl Into<String>, default: bool) -> Self {
        Self::new(key, label, FieldValue::Bool(default))
    }

    pub fn number(key: impl Into<FieldKey>, label: impl Into<String>, default: f64) -> Self {
        Self::new(key, label, FieldValue::Number(default))
    }

    pub fn string(
        key: impl Into<FieldKey>,
        label: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self::new(key, label, FieldValue::Text(default.into()))
    }

    fn new(key: impl Into<FieldKey>, label: impl Into<String>, default: FieldValue) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type: default.field_type(),
            default,
        }
    }

    /// Check that a decoded value has this field's type and, for numbers,
    /// is finite.
    pub fn validate(&self, value: &FieldValue) -> Result<()> {
        if value.field_type() != self.field_type {
            return Err(Error::TypeMismatch {
                field: self.key.clone(),
                expected: self.field_type.to_string(),
                got: value.field_type().to_string(),
            });
        }

        match value {
            FieldValue::Number(n) if !n.is_finite() => Err(Error::InvalidPayload(format!(
                "non-finite number for field '{}'",
                self.key
            ))),
            _ => Ok(()),
        }
    }
}

/// The full set of fields an actor synchronizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// Schema version, bumped when fields are added or retyped
    pub version: SchemaVersion,
    /// Field definitions in display order
    pub fields: Vec<FieldDef>,
}

impl FieldSchema {
    /// Create an empty schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            fields: Vec::new(),
        }
    }

    /// Add a field definition.
    pub fn add_field(&mut self, field: FieldDef) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Builder-style field addition.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Reject duplicate keys and defaults that contradict their type.
    pub fn validate(&self) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.key == field.key) {
                return Err(Error::InvalidPayload(format!(
                    "duplicate field key: {}",
                    field.key
                )));
            }
            field.validate(&field.default)?;
        }
        Ok(())
    }

    /// The configuration fields of the water-tank controller.
    pub fn tank_controller() -> Self {
        Self::new(1)
            .with_field(FieldDef::number("upperThreshold", "Upper threshold", 85.0))
            .with_field(FieldDef::number("lowerThreshold", "Lower threshold", 20.0))
            .with_field(FieldDef::number("tankHeight", "Tank height", 100.0))
            .with_field(FieldDef::number("tankWidth", "Tank width", 50.0))
            .with_field(FieldDef::string("tankShape", "Tank shape", "Cylindrical"))
            .with_field(FieldDef::number("usedTotal", "Used total", 0.0))
            .with_field(FieldDef::number("maxInflow", "Max inflow", 0.0))
            .with_field(FieldDef::boolean("forceUpdate", "Force update", false))
            .with_field(FieldDef::boolean("sensorFilter", "Sensor filter", true))
            .with_field(FieldDef::string("ipAddress", "IP address", ""))
            .with_field(FieldDef::boolean("autoUpdate", "Auto update", true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_derive_type_from_default() {
        let field = FieldDef::number("tankHeight", "Tank height", 100.0);
        assert_eq!(field.field_type, FieldType::Number);

        let field = FieldDef::string("tankShape", "Tank shape", "Cylindrical");
        assert_eq!(field.field_type, FieldType::String);
    }

    #[test]
    fn validate_wrong_type() {
        let field = FieldDef::boolean("sensorFilter", "Sensor filter", true);
        let result = field.validate(&FieldValue::Number(1.0));
        assert!(matches!(result, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn validate_non_finite_number() {
        let field = FieldDef::number("upperThreshold", "Upper threshold", 85.0);
        assert!(field.validate(&FieldValue::Number(92.5)).is_ok());
        assert!(matches!(
            field.validate(&FieldValue::Number(f64::NAN)),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(
            field.validate(&FieldValue::Number(f64::INFINITY)),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let schema = FieldSchema::new(1)
            .with_field(FieldDef::number("a", "A", 1.0))
            .with_field(FieldDef::boolean("a", "A again", false));
        assert!(matches!(schema.validate(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn tank_controller_schema_is_valid() {
        let schema = FieldSchema::tank_controller();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.fields.len(), 11);
        assert_eq!(
            schema.get("upperThreshold").map(|f| &f.default),
            Some(&FieldValue::Number(85.0))
        );
        assert!(schema.get("tankDepth").is_none());
    }

    #[test]
    fn schema_serialization() {
        let schema = FieldSchema::tank_controller();
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: FieldSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
        assert!(json.contains(r#""type":"number""#));
    }
}
