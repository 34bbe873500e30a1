//! Conversion between models and stored items.
//!
//! Serde produces the *logical* attribute map of a model, keyed by serde
//! names. [`ItemCodec`] turns it into the *wire* item actually stored: field
//! by field, through [`ItemCodec::encode_field`], then under each field's wire
//! name. Every write path and every expression value goes through the same
//! per-field dispatch, so custom converters, sets and TTLs behave the same
//! everywhere.

/// Custom per-type converters.
pub mod converter;

/// Optimized offset-based encoding of primitive fields.
#[cfg(feature = "fast-codec")]
pub mod fast;

/// Tagged JSON form of attribute values.
pub mod json;

use crate::{
    error::{Error, Result},
    model::{Model, ModelMetadata, field::Field},
};

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections;

/// Attribute map of one item.
pub type Item = collections::HashMap<String, AttributeValue>;

/// Which special fields a write stamps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteMode {
    /// New item: created-at, updated-at and version zero.
    Create,
    /// Create-or-replace: stamped like a create without existence guard,
    /// except that a non-zero version is kept.
    Upsert,
    /// Existing item: updated-at only.
    Update,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Purpose {
    Item,
    Expression,
}

/// Field-level encoder and decoder for one model.
#[derive(Clone, Copy, Debug)]
pub struct ItemCodec<'a> {
    metadata: &'a ModelMetadata,
    converters: &'a converter::ConverterRegistry,
}

fn encode_set(field: &Field, value: AttributeValue) -> Result<AttributeValue> {
    let AttributeValue::L(values) = value else {
        return Ok(value);
    };
    let (mut strings, mut numbers, mut blobs) = (Vec::new(), Vec::new(), Vec::new());
    for value in values {
        match value {
            AttributeValue::S(value) => strings.push(value),
            AttributeValue::N(value) => numbers.push(value),
            AttributeValue::B(value) => blobs.push(value),
            other => {
                return Err(Error::conversion(
                    field.name(),
                    format!("set members must be strings, numbers or binaries, found {other:?}"),
                ));
            }
        }
    }
    match (strings.is_empty(), numbers.is_empty(), blobs.is_empty()) {
        (_, true, true) => Ok(AttributeValue::Ss(strings)),
        (true, false, true) => Ok(AttributeValue::Ns(numbers)),
        (true, true, false) => Ok(AttributeValue::Bs(blobs)),
        _ => Err(Error::conversion(
            field.name(),
            "set members must all have the same type",
        )),
    }
}

fn decode_set(value: AttributeValue) -> AttributeValue {
    match value {
        AttributeValue::Ss(values) => {
            AttributeValue::L(values.into_iter().map(AttributeValue::S).collect())
        }
        AttributeValue::Ns(values) => {
            AttributeValue::L(values.into_iter().map(AttributeValue::N).collect())
        }
        AttributeValue::Bs(values) => {
            AttributeValue::L(values.into_iter().map(AttributeValue::B).collect())
        }
        other => other,
    }
}

fn normalize_ttl(field: &Field, value: AttributeValue) -> Result<AttributeValue> {
    match value {
        AttributeValue::N(_) | AttributeValue::Null(_) => Ok(value),
        AttributeValue::S(timestamp) => {
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|err| Error::conversion(field.name(), err))?;
            Ok(AttributeValue::N(timestamp.timestamp().to_string()))
        }
        other => Err(Error::conversion(
            field.name(),
            format!("expected epoch seconds or an RFC 3339 timestamp, found {other:?}"),
        )),
    }
}

fn is_empty_set(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::Ss(values) | AttributeValue::Ns(values) => values.is_empty(),
        AttributeValue::Bs(values) => values.is_empty(),
        _ => false,
    }
}

fn is_zero_version(value: &AttributeValue) -> bool {
    match value {
        AttributeValue::N(value) => value.parse::<f64>().is_ok_and(|value| value == 0.0),
        _ => true,
    }
}

fn is_null(value: &AttributeValue) -> bool {
    matches!(value, AttributeValue::Null(_))
}

/// Timestamp in the shape `current` already has: numbers stay epoch seconds,
/// anything else becomes an RFC 3339 string. Without a current value,
/// `epoch` picks the shape.
fn timestamp(current: Option<&AttributeValue>, epoch: bool, now: DateTime<Utc>) -> AttributeValue {
    match current {
        Some(AttributeValue::N(_)) => AttributeValue::N(now.timestamp().to_string()),
        None if epoch => AttributeValue::N(now.timestamp().to_string()),
        _ => AttributeValue::S(now.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

/// Splits `a.b[2]` into its top-level attribute name and the rest.
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    let end = path.find(['.', '[']).unwrap_or(path.len());
    path.split_at(end)
}

impl<'a> ItemCodec<'a> {
    /// Codec of the model described by `metadata`.
    pub fn new(metadata: &'a ModelMetadata, converters: &'a converter::ConverterRegistry) -> Self {
        Self {
            metadata,
            converters,
        }
    }

    /// Metadata of the model.
    pub fn metadata(&self) -> &'a ModelMetadata {
        self.metadata
    }

    fn encode_value(
        &self,
        field: &Field,
        mut value: AttributeValue,
        purpose: Purpose,
    ) -> Result<Option<AttributeValue>> {
        if purpose == Purpose::Item && field.zero.as_ref() == Some(&value) {
            return Ok(None);
        }
        if let Some(type_id) = field.converter {
            let converter = self.converters.get(type_id).ok_or_else(|| {
                Error::conversion(
                    field.name(),
                    format!(
                        "no converter registered for `{}`",
                        field.converter_type.unwrap_or_default()
                    ),
                )
            })?;
            value = converter
                .encode(value)
                .map_err(|err| Error::conversion(field.name(), err))?;
        }
        if field.set {
            value = encode_set(field, value)?;
        }
        if field.ttl {
            value = normalize_ttl(field, value)?;
        }
        if purpose == Purpose::Expression {
            return Ok(Some(value));
        }
        let sparse = (field.set || field.ttl || !field.index_keys.is_empty()) && is_null(&value);
        if sparse || is_empty_set(&value) {
            return Ok(None);
        }
        Ok(Some(value))
    }

    /// Stored value of one field, or `None` when the field is left out of the
    /// item: empty sets, null TTLs and sparse index keys, and omit-if-empty
    /// fields equal to their zero value.
    pub fn encode_field(
        &self,
        field: &Field,
        value: AttributeValue,
    ) -> Result<Option<AttributeValue>> {
        self.encode_value(field, value, Purpose::Item)
    }

    /// Serde value of one stored field. TTLs are returned as stored.
    pub fn decode_field(&self, field: &Field, mut value: AttributeValue) -> Result<AttributeValue> {
        if field.set {
            value = decode_set(value);
        }
        if let Some(type_id) = field.converter {
            let converter = self.converters.get(type_id).ok_or_else(|| {
                Error::conversion(field.name(), "no converter registered for field type")
            })?;
            value = converter
                .decode(value)
                .map_err(|err| Error::conversion(field.name(), err))?;
        }
        Ok(value)
    }

    /// Value compared against or assigned to `path` in an expression.
    ///
    /// Only top-level declared fields are converted; nested paths and
    /// undeclared attributes take the value as given.
    pub fn encode_expression_value(&self, path: &str, value: AttributeValue) -> Result<AttributeValue> {
        let (name, rest) = split_path(path);
        match self.metadata.field(name) {
            Some(field) if rest.is_empty() => Ok(self
                .encode_value(field, value, Purpose::Expression)?
                .unwrap_or(AttributeValue::Null(true))),
            _ => Ok(value),
        }
    }

    /// `path` with its top-level name replaced by the attribute name.
    pub fn wire_path(&self, path: &str) -> String {
        let (name, rest) = split_path(path);
        format!("{}{rest}", self.metadata.wire_name(name))
    }

    /// Whether the top-level field of `path` is stored encrypted.
    pub fn is_encrypted(&self, path: &str) -> bool {
        let (name, _) = split_path(path);
        self.metadata
            .field(name)
            .is_some_and(|field| field.is_encrypted())
    }

    /// Wire item of a logical attribute map.
    ///
    /// Undeclared attributes pass through unchanged. Fails when a table key
    /// attribute is missing or null.
    pub fn encode_attributes(&self, logical: Item) -> Result<Item> {
        let mut item = Item::with_capacity(logical.len());
        for (name, value) in logical {
            match self.metadata.field(&name) {
                Some(field) => {
                    if let Some(value) = self.encode_field(field, value)? {
                        item.insert(field.wire_name().to_string(), value);
                    }
                }
                None => {
                    item.insert(name, value);
                }
            }
        }
        for key in self.metadata.primary_key().fields() {
            match item.get(self.metadata.wire_name(key)) {
                Some(value) if !is_null(value) => {}
                _ => return Err(Error::MissingPrimaryKey(key.to_string())),
            }
        }
        Ok(item)
    }

    /// Logical attribute map of a wire item.
    ///
    /// Declared fields the encoder leaves out come back as their zero value:
    /// an empty list for sets, `T::default()` for omit-if-empty fields.
    pub fn decode_attributes(&self, item: Item) -> Result<Item> {
        let mut logical = Item::with_capacity(item.len());
        for (wire_name, value) in item {
            match self.metadata.field_by_wire_name(&wire_name) {
                Some(field) => {
                    let value = self.decode_field(field, value)?;
                    logical.insert(field.name().to_string(), value);
                }
                None => {
                    logical.insert(wire_name, value);
                }
            }
        }
        for field in self.metadata.fields() {
            if logical.contains_key(field.name()) {
                continue;
            }
            if let Some(zero) = &field.zero {
                logical.insert(field.name().to_string(), zero.clone());
            } else if field.set {
                logical.insert(field.name().to_string(), AttributeValue::L(Vec::new()));
            }
        }
        Ok(logical)
    }

    /// Wire item of `model` through serde.
    pub fn to_item<M: Model>(&self, model: &M) -> Result<Item> {
        let logical: Item = serde_dynamo::to_item(model)?;
        self.encode_attributes(logical)
    }

    /// Model decoded from a wire item.
    pub fn from_item<M: Model>(&self, item: Item) -> Result<M> {
        let logical = self.decode_attributes(item)?;
        Ok(serde_dynamo::from_item(logical)?)
    }

    /// Logical value of the timestamp field `name` at `now`.
    pub(crate) fn timestamp(
        &self,
        name: &str,
        current: Option<&AttributeValue>,
        now: DateTime<Utc>,
    ) -> AttributeValue {
        let epoch = self
            .metadata
            .field(name)
            .is_some_and(|field| field.epoch_seconds);
        timestamp(current, epoch, now)
    }

    /// Sets the special fields a write of `mode` stamps on a logical map.
    pub fn stamp(&self, logical: &mut Item, mode: WriteMode, now: DateTime<Utc>) {
        if matches!(mode, WriteMode::Create | WriteMode::Upsert) {
            if let Some(created_at) = self.metadata.created_at_field() {
                let value = self.timestamp(created_at, logical.get(created_at), now);
                logical.insert(created_at.to_string(), value);
            }
            if let Some(version) = self.metadata.version_field() {
                let keep = mode == WriteMode::Upsert
                    && !logical.get(version).is_none_or(is_zero_version);
                if !keep {
                    logical.insert(version.to_string(), AttributeValue::N("0".to_string()));
                }
            }
        }
        if let Some(updated_at) = self.metadata.updated_at_field() {
            let value = self.timestamp(updated_at, logical.get(updated_at), now);
            logical.insert(updated_at.to_string(), value);
        }
    }

    /// Version held by a logical map; absent or null counts as zero.
    pub fn version_of(&self, logical: &Item) -> Result<i64> {
        let Some(version) = self.metadata.version_field() else {
            return Ok(0);
        };
        match logical.get(version) {
            None | Some(AttributeValue::Null(_)) => Ok(0),
            Some(AttributeValue::N(value)) => value
                .parse()
                .map_err(|err| Error::conversion(version, err)),
            Some(other) => Err(Error::conversion(
                version,
                format!("expected a number, found {other:?}"),
            )),
        }
    }

    /// Table key attributes of a wire item.
    pub fn key_of(&self, item: &Item) -> Result<Item> {
        self.metadata
            .primary_key()
            .fields()
            .map(|key| {
                let wire_name = self.metadata.wire_name(key);
                match item.get(wire_name) {
                    Some(value) if !is_null(value) => Ok((wire_name.to_string(), value.clone())),
                    _ => Err(Error::MissingPrimaryKey(key.to_string())),
                }
            })
            .collect()
    }
}
