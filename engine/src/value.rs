//! Field values and the versioned wrapper the merge engine operates on.

use crate::{error::Result, Error, Millis, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Two numbers closer than this are the same value.
pub const FLOAT_TOLERANCE: f64 = 1e-3;

/// The closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Number,
    String,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Number => write!(f, "number"),
            FieldType::String => write!(f, "string"),
        }
    }
}

/// A field value of any supported type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Boolean,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Text(_) => FieldType::String,
        }
    }

    /// Equality under the per-type rule. Values of different types are never
    /// the same.
    pub fn same_value(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.same_value(b),
            (FieldValue::Number(a), FieldValue::Number(b)) => a.same_value(b),
            (FieldValue::Text(a), FieldValue::Text(b)) => a.same_value(b),
            _ => false,
        }
    }

    /// Decode a JSON value that must be of `expected` type.
    pub fn from_json(
        key: &str,
        expected: FieldType,
        value: &serde_json::Value,
    ) -> Result<FieldValue> {
        let decoded = match (expected, value) {
            (FieldType::Boolean, serde_json::Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            (FieldType::Number, serde_json::Value::Number(n)) => n.as_f64().map(FieldValue::Number),
            (FieldType::String, serde_json::Value::String(s)) => Some(FieldValue::Text(s.clone())),
            _ => None,
        };

        match decoded {
            Some(FieldValue::Number(n)) if !n.is_finite() => Err(Error::InvalidPayload(format!(
                "non-finite number for field '{}'",
                key
            ))),
            Some(decoded) => Ok(decoded),
            None => Err(Error::TypeMismatch {
                field: key.to_string(),
                expected: expected.to_string(),
                got: json_type_name(value).to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A value type the merge engine can reconcile.
///
/// Implementations supply the equality predicate used by the value-identity
/// rule; everything else in the merge is shared.
pub trait SyncValue: Clone + fmt::Debug {
    fn same_value(&self, other: &Self) -> bool;

    fn into_field_value(self) -> FieldValue;

    fn from_field_value(value: FieldValue) -> Option<Self>;
}

impl SyncValue for bool {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }

    fn into_field_value(self) -> FieldValue {
        FieldValue::Bool(self)
    }

    fn from_field_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl SyncValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        (self - other).abs() <= FLOAT_TOLERANCE
    }

    fn into_field_value(self) -> FieldValue {
        FieldValue::Number(self)
    }

    fn from_field_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Number(n) => Some(n),
            _ => None,
        }
    }
}

impl SyncValue for String {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }

    fn into_field_value(self) -> FieldValue {
        FieldValue::Text(self)
    }

    fn from_field_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Dynamic values merge under the rule of whichever type they hold.
impl SyncValue for FieldValue {
    fn same_value(&self, other: &Self) -> bool {
        FieldValue::same_value(self, other)
    }

    fn into_field_value(self) -> FieldValue {
        self
    }

    fn from_field_value(value: FieldValue) -> Option<Self> {
        Some(value)
    }
}

/// A value paired with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedValue<T> {
    pub value: T,
    pub timestamp: Timestamp,
}

impl<T> VersionedValue<T> {
    pub fn new(value: T, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }

    /// A value that was never written (defaults at startup).
    pub fn unset(value: T) -> Self {
        Self::new(value, Timestamp::Unset)
    }

    /// A value that must be applied unconditionally.
    pub fn priority(value: T) -> Self {
        Self::new(value, Timestamp::Priority)
    }

    /// A value written at `ms` milliseconds since the epoch.
    pub fn at(value: T, ms: Millis) -> Self {
        Self::new(value, Timestamp::At(ms))
    }
}

impl<T: SyncValue> VersionedValue<T> {
    /// Erase the concrete type.
    pub fn into_dynamic(self) -> VersionedValue<FieldValue> {
        VersionedValue::new(self.value.into_field_value(), self.timestamp)
    }

    /// Recover the concrete type, or `None` if the value has another type.
    pub fn from_dynamic(value: VersionedValue<FieldValue>) -> Option<Self> {
        T::from_field_value(value.value).map(|v| VersionedValue::new(v, value.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn float_tolerance() {
        assert!(85.0f64.same_value(&85.0005));
        assert!(85.0f64.same_value(&85.0009));
        assert!(!85.0f64.same_value(&85.002));
    }

    #[test]
    fn dynamic_values_merge_by_held_type() {
        use crate::merge::{merge_two_source, MergeRule};

        let outcome = merge_two_source(
            &VersionedValue::at(FieldValue::Number(85.0004), 9000),
            &VersionedValue::at(FieldValue::Number(85.0), 1000),
        );
        assert_eq!(outcome.rule, MergeRule::ValueIdentity);
        assert_eq!(outcome.result, VersionedValue::at(FieldValue::Number(85.0), 1000));

        let outcome = merge_two_source(
            &VersionedValue::at(FieldValue::Text("Spherical".into()), 9000),
            &VersionedValue::at(FieldValue::Text("Cylindrical".into()), 1000),
        );
        assert_eq!(outcome.rule, MergeRule::IncomingNewer);
        assert!(outcome.changed);
    }

    #[test]
    fn cross_type_never_equal() {
        assert!(!FieldValue::Bool(true).same_value(&FieldValue::Number(1.0)));
        assert!(FieldValue::Text("a".into()).same_value(&FieldValue::Text("a".into())));
    }

    #[test]
    fn from_json_checks_type() {
        let value = FieldValue::from_json("tankHeight", FieldType::Number, &json!(120)).unwrap();
        assert_eq!(value, FieldValue::Number(120.0));

        let err = FieldValue::from_json("tankHeight", FieldType::Number, &json!("120"));
        assert_eq!(
            err,
            Err(Error::TypeMismatch {
                field: "tankHeight".into(),
                expected: "number".into(),
                got: "string".into(),
            })
        );
    }

    #[test]
    fn dynamic_roundtrip_keeps_timestamp() {
        let typed = VersionedValue::at(42.5f64, 1000);
        let dynamic = typed.clone().into_dynamic();
        assert_eq!(dynamic.value, FieldValue::Number(42.5));
        assert_eq!(VersionedValue::<f64>::from_dynamic(dynamic), Some(typed));

        let wrong = VersionedValue::at(FieldValue::Bool(true), 1000);
        assert_eq!(VersionedValue::<f64>::from_dynamic(wrong), None);
    }

    #[test]
    fn field_type_wire_names() {
        assert_eq!(serde_json::to_string(&FieldType::Boolean).unwrap(), r#""boolean""#);
        assert_eq!(serde_json::to_string(&FieldType::Number).unwrap(), r#""number""#);
        assert_eq!(serde_json::to_string(&FieldType::String).unwrap(), r#""string""#);
    }
}
