use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An attribute value represents the operands of a [crate::TargetingRule] and the values stored in
/// [crate::EvaluationContext::custom_attributes].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Stores a string value.
    String(String),
    /// Stores an array of attribute values.
    Array(Vec<AttributeValue>),
    /// Stores a number.
    Number(f64),
    /// Stores a boolean.
    Bool(bool),
    /// Stores a map of attribute values.
    Object(HashMap<String, AttributeValue>),
    /// Stores a null value.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> AttributeValue {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> AttributeValue {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> AttributeValue {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl AttributeValue {
    /// Returns the value as a float. Numbers are returned as-is and strings are parsed; every other
    /// variant yields None.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Compares this value against a context field, which is always a string.
    ///
    /// Strings compare exactly (case sensitive). Numbers match a string that parses to the same
    /// number, and booleans match their literal spelling. Arrays, objects and null never match.
    #[allow(clippy::float_cmp)]
    pub fn matches_str(&self, field: &str) -> bool {
        match self {
            AttributeValue::String(s) => s == field,
            AttributeValue::Number(n) => field.trim().parse::<f64>().map_or(false, |f| f == *n),
            AttributeValue::Bool(b) => field == if *b { "true" } else { "false" },
            AttributeValue::Array(_) | AttributeValue::Object(_) | AttributeValue::Null => false,
        }
    }

    pub(crate) fn is_scalar(&self) -> bool {
        matches!(
            self,
            AttributeValue::String(_) | AttributeValue::Number(_) | AttributeValue::Bool(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::AttributeValue;
    use crate::context::EvaluationContext;
    use maplit::hashmap;
    use test_case::test_case;

    #[test]
    fn custom_attributes_accept_any_json_value() {
        let context: EvaluationContext = serde_json::from_str(
            r#"{
                "custom_attributes": {
                    "cohort": 3,
                    "beta": true,
                    "plan": "team",
                    "tags": ["a", "b"],
                    "billing": {"seats": 12},
                    "referrer": null
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            context.custom_attributes,
            hashmap! {
                "cohort".to_string() => AttributeValue::Number(3.0),
                "beta".to_string() => AttributeValue::Bool(true),
                "plan".to_string() => AttributeValue::String("team".to_string()),
                "tags".to_string() => AttributeValue::Array(vec!["a".into(), "b".into()]),
                "billing".to_string() => AttributeValue::Object(
                    hashmap!["seats".to_string() => AttributeValue::Number(12.0)]
                ),
                "referrer".to_string() => AttributeValue::Null,
            }
        );
    }

    #[test_case(r#"["u1", 2, true]"#, true; "scalars")]
    #[test_case(r#"[["u1"]]"#, false; "nested array")]
    #[test_case(r#"[{"id": "u1"}]"#, false; "object")]
    #[test_case("[null]", false; "null")]
    fn operand_scalars(json: &str, scalar: bool) {
        let values: Vec<AttributeValue> = serde_json::from_str(json).unwrap();
        assert_eq!(values.iter().all(AttributeValue::is_scalar), scalar);
    }

    #[test_case(AttributeValue::from("us-ca"), "us-ca", true)]
    #[test_case(AttributeValue::from("US-CA"), "us-ca", false; "strings are case sensitive")]
    #[test_case(AttributeValue::from(42_i64), "42", true)]
    #[test_case(AttributeValue::from(42.5), "42.5", true)]
    #[test_case(AttributeValue::from(42_i64), "forty-two", false)]
    #[test_case(AttributeValue::from(true), "true", true)]
    #[test_case(AttributeValue::from(false), "true", false)]
    #[test_case(AttributeValue::Null, "null", false)]
    fn matches_context_field(value: AttributeValue, field: &str, expected: bool) {
        assert_eq!(value.matches_str(field), expected);
    }

    #[test]
    fn numeric_strings_convert() {
        assert_eq!(AttributeValue::from("7").to_f64(), Some(7.0));
        assert_eq!(AttributeValue::from(" 2.5 ").to_f64(), Some(2.5));
        assert_eq!(AttributeValue::from("Tuesday").to_f64(), None);
        assert_eq!(AttributeValue::Bool(true).to_f64(), None);
    }
}
