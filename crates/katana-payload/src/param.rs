//! Action parameters and their declared types.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

use crate::Map;
use crate::payload::Payload;
use crate::protocol::insert;

/// Location used for parameters built in code.
pub const DEFAULT_LOCATION: &str = "query";

/// Errors raised when reading typed parameter values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParamError {
    /// The value does not match the declared type.
    #[error("Param \"{name}\" value is not a {expected}")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// Declared type.
        expected: ParamType,
    },
    /// The raw value could not be decoded.
    #[error("Param \"{name}\" value is not a {expected}: {source}")]
    Decode {
        /// Parameter name.
        name: String,
        /// Declared type.
        expected: ParamType,
        /// Underlying decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The declared type name is unknown.
    #[error("unknown parameter type \"{0}\"")]
    UnknownType(String),
}

/// Declared type of a parameter or return value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// The null value.
    Null,
    /// `true` or `false`.
    Boolean,
    /// Whole numbers.
    Integer,
    /// Floating point numbers.
    Float,
    /// Text.
    #[default]
    String,
    /// Ordered lists.
    Array,
    /// Mappings.
    Object,
}

impl ParamType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Infers the type of `value`.
    #[must_use]
    pub fn resolve(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(number) if number.is_f64() => Self::Float,
            Value::Number(_) => Self::Integer,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns `true` when `value` is of this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        Self::resolve(value) == self
    }

    /// Value used when a return value of this type was never set.
    #[must_use]
    pub fn default_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean => Value::Bool(false),
            Self::Integer => Value::from(0),
            Self::Float => Value::from(0.0),
            Self::String => Value::from(""),
            Self::Array => Value::Array(Vec::new()),
            Self::Object => Value::Object(Map::new()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ParamType {
    type Err = ParamError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "null" => Ok(Self::Null),
            "boolean" => Ok(Self::Boolean),
            "integer" => Ok(Self::Integer),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            other => Err(ParamError::UnknownType(other.to_owned())),
        }
    }
}

/// A named parameter received by, or sent from, an action.
///
/// The value is kept in its raw wire form and decoded on demand against the
/// declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    location: String,
    name: String,
    raw: String,
    kind: ParamType,
    exists: bool,
}

impl Param {
    /// A parameter with a raw textual value.
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        name: impl Into<String>,
        raw: impl Into<String>,
        kind: ParamType,
    ) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            raw: raw.into(),
            kind,
            exists: true,
        }
    }

    /// Placeholder for a parameter the request did not carry.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            location: DEFAULT_LOCATION.to_owned(),
            name: name.into(),
            raw: String::new(),
            kind: ParamType::String,
            exists: false,
        }
    }

    /// Builds a parameter from a typed value.
    ///
    /// The type is inferred when `kind` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::TypeMismatch`] when `value` does not match `kind`.
    pub fn from_value(
        name: impl Into<String>,
        value: &Value,
        kind: Option<ParamType>,
    ) -> Result<Self, ParamError> {
        let name = name.into();
        let kind = kind.unwrap_or_else(|| ParamType::resolve(value));
        if !kind.matches(value) {
            return Err(ParamError::TypeMismatch {
                name,
                expected: kind,
            });
        }
        Ok(Self::new(DEFAULT_LOCATION, name, raw_text(value), kind))
    }

    /// Rebuilds a parameter from its `{name, value, type}` wire form.
    #[must_use]
    pub fn from_payload(location: impl Into<String>, payload: &Payload) -> Self {
        let value = payload.get_opt("value").cloned().unwrap_or(Value::Null);
        let kind = payload
            .get_str("type")
            .and_then(|kind| kind.parse().ok())
            .unwrap_or_default();
        Self::new(
            location,
            payload.get_str("name").unwrap_or_default(),
            raw_text(&value),
            kind,
        )
    }

    /// Wire form `{name, value, type}`.
    ///
    /// Values that fail to decode travel as their raw text.
    #[must_use]
    pub fn to_payload(&self) -> Payload {
        let value = self
            .value()
            .unwrap_or_else(|_| Value::String(self.raw.clone()));
        let mut payload = Payload::new();
        insert(&mut payload, "name", self.name.as_str());
        insert(&mut payload, "value", value);
        insert(&mut payload, "type", self.kind.as_str());
        payload
    }

    /// Where the parameter came from (`query`, `path`, `form_data`, ...).
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    #[must_use]
    pub const fn param_type(&self) -> ParamType {
        self.kind
    }

    /// Raw wire text of the value.
    #[must_use]
    pub fn raw_value(&self) -> &str {
        &self.raw
    }

    /// Returns `true` when the request carried the parameter.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    /// Decodes the raw value and checks it against the declared type.
    ///
    /// String values are quoted before decoding so bare text decodes as a
    /// string.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::Decode`] when the text does not decode and
    /// [`ParamError::TypeMismatch`] when it decodes to another type.
    pub fn value(&self) -> Result<Value, ParamError> {
        let text = match self.kind {
            ParamType::String => format!("\"{}\"", self.raw),
            ParamType::Null if self.raw.is_empty() => "null".to_owned(),
            _ => self.raw.clone(),
        };
        let value: Value = serde_json::from_str(&text).map_err(|source| ParamError::Decode {
            name: self.name.clone(),
            expected: self.kind,
            source,
        })?;
        if self.kind.matches(&value) {
            Ok(value)
        } else {
            Err(ParamError::TypeMismatch {
                name: self.name.clone(),
                expected: self.kind,
            })
        }
    }

    /// A copy from a different location.
    #[must_use]
    pub fn copy_with_location(&self, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..self.clone()
        }
    }

    /// A copy under a different name.
    #[must_use]
    pub fn copy_with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// A copy holding a different raw value.
    #[must_use]
    pub fn copy_with_value(&self, raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..self.clone()
        }
    }

    /// A copy with a different declared type.
    #[must_use]
    pub fn copy_with_type(&self, kind: ParamType) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(null), ParamType::Null)]
    #[case(json!(true), ParamType::Boolean)]
    #[case(json!(3), ParamType::Integer)]
    #[case(json!(3.5), ParamType::Float)]
    #[case(json!("x"), ParamType::String)]
    #[case(json!([1]), ParamType::Array)]
    #[case(json!({"a": 1}), ParamType::Object)]
    fn resolves_value_types(#[case] value: Value, #[case] expected: ParamType) {
        assert_eq!(ParamType::resolve(&value), expected);
        assert_eq!(expected.as_str().parse::<ParamType>().expect("parse"), expected);
    }

    #[rstest]
    #[case("hello", ParamType::String, json!("hello"))]
    #[case("42", ParamType::Integer, json!(42))]
    #[case("1.5", ParamType::Float, json!(1.5))]
    #[case("true", ParamType::Boolean, json!(true))]
    #[case("[1,2]", ParamType::Array, json!([1, 2]))]
    #[case("{\"a\":1}", ParamType::Object, json!({"a": 1}))]
    fn typed_values_decode(#[case] raw: &str, #[case] kind: ParamType, #[case] expected: Value) {
        let param = Param::new("query", "p", raw, kind);
        assert_eq!(param.value().expect("decode"), expected);
    }

    #[rstest]
    #[case("1", ParamType::Float)]
    #[case("1.5", ParamType::Integer)]
    #[case("\"x\"", ParamType::Array)]
    fn mismatched_values_are_rejected(#[case] raw: &str, #[case] kind: ParamType) {
        let param = Param::new("query", "p", raw, kind);
        assert!(matches!(
            param.value(),
            Err(ParamError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn undecodable_values_report_decode_errors() {
        let param = Param::new("query", "p", "not json", ParamType::Integer);
        assert!(matches!(param.value(), Err(ParamError::Decode { .. })));
    }

    #[test]
    fn from_value_checks_the_declared_type() {
        let error = Param::from_value("p", &json!("text"), Some(ParamType::Integer))
            .expect_err("mismatch");
        assert_eq!(error.to_string(), "Param \"p\" value is not a integer");
        let inferred = Param::from_value("p", &json!([1]), None).expect("infer");
        assert_eq!(inferred.param_type(), ParamType::Array);
        assert!(inferred.exists());
    }

    #[test]
    fn wire_form_round_trips() {
        let param = Param::from_value("limit", &json!(10), None).expect("param");
        let decoded = Param::from_payload("query", &param.to_payload());
        assert_eq!(decoded, param);
        assert_eq!(decoded.value().expect("value"), json!(10));
    }

    #[test]
    fn copies_override_single_fields() {
        let param = Param::new("query", "p", "1", ParamType::Integer);
        assert_eq!(param.copy_with_name("q").name(), "q");
        assert_eq!(param.copy_with_location("path").location(), "path");
        assert_eq!(param.copy_with_value("2").raw_value(), "2");
        assert_eq!(param.copy_with_type(ParamType::String).param_type(), ParamType::String);
        assert_eq!(param.name(), "p");
    }

    #[test]
    fn missing_params_do_not_exist() {
        let param = Param::missing("p");
        assert!(!param.exists());
        assert_eq!(param.value().expect("empty string"), json!(""));
    }
}
