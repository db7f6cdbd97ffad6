//! Domain records and natural keys.

use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Returns true if a field value counts as "no data".
///
/// `null`, blank strings, empty arrays and empty objects are all empty.
/// `false` and `0` are real values.
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// A normalized natural key.
///
/// Natural keys are compared after trimming and case-folding. Keys made only
/// of ASCII digits compare as integers, so `"02205"` and `2205` are the same
/// key. Digit keys keep their decimal text, which avoids overflow on long
/// register numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NaturalKey {
    /// Decimal digits with leading zeros stripped.
    Numeric(String),
    /// Trimmed, lowercased text.
    Text(String),
}

impl NaturalKey {
    /// Normalizes a raw key string. Returns `None` for blank input.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let stripped = trimmed.trim_start_matches('0');
            let digits = if stripped.is_empty() { "0" } else { stripped };
            return Some(Self::Numeric(digits.to_string()));
        }

        Some(Self::Text(trimmed.to_lowercase()))
    }

    /// Normalizes a JSON field value. Strings and numbers are accepted.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    return Some(Self::Numeric(u.to_string()));
                }
                match n.as_f64() {
                    Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => {
                        Self::parse(&format!("{f:.0}"))
                    }
                    _ => Self::parse(&n.to_string()),
                }
            }
            _ => None,
        }
    }

    /// Returns the normalized key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Numeric(s) | Self::Text(s) => s,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain entity: a JSON object of named fields.
///
/// Which field holds the natural key is a property of the collection, not of
/// the record, so lookups take the field name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing JSON object.
    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Builds a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ModelError::invalid_shape(format!(
                "record must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Sets a field value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(name.into(), value)
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Returns true if the field exists and is not empty.
    #[must_use]
    pub fn has_value(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| !is_empty_value(v))
    }

    /// Returns the normalized natural key stored in `key_field`.
    #[must_use]
    pub fn natural_key(&self, key_field: &str) -> Option<NaturalKey> {
        self.0.get(key_field).and_then(NaturalKey::from_value)
    }

    /// Iterates over fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwraps into the underlying JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_keys_ignore_leading_zeros() {
        assert_eq!(NaturalKey::parse("002205"), NaturalKey::parse("2205"));
        assert_eq!(
            NaturalKey::from_value(&json!(2205)),
            NaturalKey::parse(" 2205 ")
        );
        assert_eq!(NaturalKey::parse("000"), Some(NaturalKey::Numeric("0".into())));
    }

    #[test]
    fn text_keys_are_case_folded() {
        assert_eq!(NaturalKey::parse(" GR-12 "), NaturalKey::parse("gr-12"));
        assert_ne!(NaturalKey::parse("gr-12"), NaturalKey::parse("gr-13"));
    }

    #[test]
    fn blank_keys_are_none() {
        assert_eq!(NaturalKey::parse("   "), None);
        assert_eq!(NaturalKey::from_value(&Value::Null), None);
        assert_eq!(NaturalKey::from_value(&json!(true)), None);
    }

    #[test]
    fn long_digit_keys_do_not_overflow() {
        let long = "0".repeat(5) + &"9".repeat(60);
        let key = NaturalKey::parse(&long).unwrap();
        assert_eq!(key.as_str().len(), 60);
    }

    #[test]
    fn whole_float_keys_match_integers() {
        assert_eq!(
            NaturalKey::from_value(&json!(2205.0)),
            NaturalKey::parse("2205")
        );
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(&Value::Null));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("x")));
    }

    #[test]
    fn record_from_non_object_fails() {
        let err = Record::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn record_field_access() {
        let record = Record::new()
            .with("grNo", "2205")
            .with("name", "Asha")
            .with("contact", "");

        assert!(record.has_value("name"));
        assert!(!record.has_value("contact"));
        assert!(!record.has_value("missing"));
        assert_eq!(record.natural_key("grNo"), NaturalKey::parse("2205"));
        assert_eq!(record.len(), 3);
    }

    mod properties {
        use super::super::NaturalKey;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn padding_and_zeros_do_not_change_key(n in 0u64..1_000_000, zeros in 0usize..4) {
                let padded = format!("  {}{n} ", "0".repeat(zeros));
                prop_assert_eq!(NaturalKey::parse(&padded), NaturalKey::parse(&n.to_string()));
            }

            #[test]
            fn parse_is_idempotent(raw in "[ 0-9A-Za-z-]{0,12}") {
                if let Some(key) = NaturalKey::parse(&raw) {
                    prop_assert_eq!(NaturalKey::parse(key.as_str()), Some(key));
                }
            }
        }
    }
}
