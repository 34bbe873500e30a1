//! Tagged JSON form of wire attribute values.
//!
//! Every value becomes a single-key object naming its type, e.g.
//! `{"S": "a"}`, `{"N": "1"}` or `{"B": "<base64>"}`. Used by cursors and
//! encrypted envelopes, where the type of each value must survive the trip.

use aws_sdk_dynamodb::{primitives::Blob, types::AttributeValue};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};
use std::collections;

/// A tagged value that does not describe an attribute value.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TaggedValueError(String);

type TaggedResult<T> = Result<T, TaggedValueError>;

fn tagged(tag: &str, value: Value) -> Value {
    Value::Object(Map::from_iter([(tag.to_string(), value)]))
}

fn strings(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn blobs(values: &[Blob]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|blob| Value::String(STANDARD.encode(blob.as_ref())))
            .collect(),
    )
}

/// Tagged JSON of `value`.
pub fn to_tagged(value: &AttributeValue) -> TaggedResult<Value> {
    let value = match value {
        AttributeValue::S(value) => tagged("S", Value::String(value.clone())),
        AttributeValue::N(value) => tagged("N", Value::String(value.clone())),
        AttributeValue::B(value) => tagged("B", Value::String(STANDARD.encode(value.as_ref()))),
        AttributeValue::Bool(value) => tagged("BOOL", Value::Bool(*value)),
        AttributeValue::Null(value) => tagged("NULL", Value::Bool(*value)),
        AttributeValue::Ss(values) => tagged("SS", strings(values)),
        AttributeValue::Ns(values) => tagged("NS", strings(values)),
        AttributeValue::Bs(values) => tagged("BS", blobs(values)),
        AttributeValue::L(values) => tagged(
            "L",
            Value::Array(values.iter().map(to_tagged).collect::<TaggedResult<_>>()?),
        ),
        AttributeValue::M(values) => tagged("M", Value::Object(to_tagged_map(values)?)),
        other => {
            return Err(TaggedValueError(format!(
                "unsupported attribute value {other:?}"
            )));
        }
    };
    Ok(value)
}

/// Tagged JSON object of an attribute map.
pub fn to_tagged_map(
    values: &collections::HashMap<String, AttributeValue>,
) -> TaggedResult<Map<String, Value>> {
    values
        .iter()
        .map(|(name, value)| Ok((name.clone(), to_tagged(value)?)))
        .collect()
}

fn as_str<'a>(tag: &str, value: &'a Value) -> TaggedResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| TaggedValueError(format!("`{tag}` expects a string")))
}

fn as_array<'a>(tag: &str, value: &'a Value) -> TaggedResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| TaggedValueError(format!("`{tag}` expects an array")))
}

fn decode_blob(tag: &str, value: &Value) -> TaggedResult<Blob> {
    let bytes = STANDARD
        .decode(as_str(tag, value)?)
        .map_err(|err| TaggedValueError(format!("`{tag}` is not base64: {err}")))?;
    Ok(Blob::new(bytes))
}

fn decode_strings(tag: &str, value: &Value) -> TaggedResult<Vec<String>> {
    as_array(tag, value)?
        .iter()
        .map(|value| as_str(tag, value).map(str::to_string))
        .collect()
}

/// Attribute value described by tagged JSON.
pub fn from_tagged(value: &Value) -> TaggedResult<AttributeValue> {
    let object = value
        .as_object()
        .filter(|object| object.len() == 1)
        .ok_or_else(|| TaggedValueError("expected an object with a single type tag".to_string()))?;
    let Some((tag, value)) = object.iter().next() else {
        return Err(TaggedValueError("missing type tag".to_string()));
    };
    let value = match tag.as_str() {
        "S" => AttributeValue::S(as_str(tag, value)?.to_string()),
        "N" => {
            let number = as_str(tag, value)?;
            if number.parse::<f64>().is_err() {
                return Err(TaggedValueError(format!("`{number}` is not a number")));
            }
            AttributeValue::N(number.to_string())
        }
        "B" => AttributeValue::B(decode_blob(tag, value)?),
        "BOOL" => AttributeValue::Bool(
            value
                .as_bool()
                .ok_or_else(|| TaggedValueError("`BOOL` expects a boolean".to_string()))?,
        ),
        "NULL" => AttributeValue::Null(true),
        "SS" => AttributeValue::Ss(decode_strings(tag, value)?),
        "NS" => AttributeValue::Ns(decode_strings(tag, value)?),
        "BS" => AttributeValue::Bs(
            as_array(tag, value)?
                .iter()
                .map(|value| decode_blob(tag, value))
                .collect::<TaggedResult<_>>()?,
        ),
        "L" => AttributeValue::L(
            as_array(tag, value)?
                .iter()
                .map(from_tagged)
                .collect::<TaggedResult<_>>()?,
        ),
        "M" => {
            let object = value
                .as_object()
                .ok_or_else(|| TaggedValueError("`M` expects an object".to_string()))?;
            AttributeValue::M(from_tagged_map(object)?)
        }
        other => return Err(TaggedValueError(format!("unknown type tag `{other}`"))),
    };
    Ok(value)
}

/// Attribute map described by a tagged JSON object.
pub fn from_tagged_map(
    object: &Map<String, Value>,
) -> TaggedResult<collections::HashMap<String, AttributeValue>> {
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), from_tagged(value)?)))
        .collect()
}
