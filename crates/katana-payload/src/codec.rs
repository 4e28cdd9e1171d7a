//! Binary pack/unpack over msgpack.

use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::payload::Payload;

/// Encodes any serialisable value, usually a [`Payload`], as msgpack.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialisation fails.
pub fn pack<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    rmp_serde::to_vec_named(value).map_err(|source| CodecError::Encode { source })
}

/// Decodes msgpack bytes into a [`Payload`].
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::NotAMap`] when the top-level value is not a mapping.
pub fn unpack(bytes: &[u8]) -> Result<Payload, CodecError> {
    let value: Value =
        rmp_serde::from_slice(bytes).map_err(|source| CodecError::Decode { source })?;
    match value {
        Value::Object(map) => Ok(Payload::from_map(map)),
        other => Err(CodecError::NotAMap {
            kind: value_kind(&other),
        }),
    }
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
