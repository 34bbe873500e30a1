use crate::{
    codec::{Item, ItemCodec},
    common::condition::{Condition, FieldCondition},
    error::{Error, Result},
};

use serde::Serialize;
use serde_dynamo::to_attribute_value;

/// Primary key values of one item (partition key and optional sort key).
///
/// Attribute names come from the model, so only values are given.
///
/// ```rust
/// use dynamodb_mapper::common::key::Keys;
///
/// let user = Keys::partition("u-1");
/// let order = Keys::partition("u-1").with_sort_key("2024-01-01#42");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keys<T> {
    /// Partition key value.
    pub partition_key: T,
    /// Sort key value, for tables with a composite primary key.
    pub sort_key: Option<T>,
}

impl<T> Keys<T> {
    /// Key of a table without sort key.
    pub fn partition(value: T) -> Self {
        Self {
            partition_key: value,
            sort_key: None,
        }
    }

    /// Adds the sort key value.
    pub fn with_sort_key(mut self, value: T) -> Self {
        self.sort_key = Some(value);
        self
    }
}

impl<T: Serialize> Keys<T> {
    /// Wire key of the model behind `codec`.
    ///
    /// Values go through the key fields' converters. Fails when the number of
    /// values does not match the table key schema.
    pub(crate) fn to_item(self, codec: &ItemCodec<'_>) -> Result<Item> {
        let metadata = codec.metadata();
        let schema = metadata.primary_key();
        let mut item = Item::with_capacity(2);
        let partition_key = to_attribute_value(self.partition_key)?;
        item.insert(
            metadata.wire_name(&schema.partition_key).to_string(),
            codec.encode_expression_value(&schema.partition_key, partition_key)?,
        );
        match (self.sort_key, &schema.sort_key) {
            (Some(value), Some(name)) => {
                let value = to_attribute_value(value)?;
                item.insert(
                    metadata.wire_name(name).to_string(),
                    codec.encode_expression_value(name, value)?,
                );
            }
            (None, None) => {}
            (None, Some(name)) => return Err(Error::MissingPrimaryKey(name.clone())),
            (Some(_), None) => {
                return Err(Error::InvalidRequest(format!(
                    "model `{}` has no sort key",
                    metadata.name()
                )));
            }
        }
        Ok(item)
    }
}

/// Splits `conditions` into the wire key they bind by equality and the rest.
///
/// The first equality on each primary key field binds it; fails when a key
/// field stays unbound.
pub(crate) fn bind_key(
    codec: &ItemCodec<'_>,
    conditions: Vec<FieldCondition>,
) -> Result<(Item, Vec<FieldCondition>)> {
    let metadata = codec.metadata();
    let schema = metadata.primary_key();
    let mut key = Item::with_capacity(2);
    let mut rest = Vec::new();
    for condition in conditions {
        let wire_name = metadata.wire_name(&condition.name);
        let bindable = schema.role_of(&condition.name).is_some() && !key.contains_key(wire_name);
        match condition.condition {
            Condition::Equals(value) if bindable => {
                let value = codec.encode_expression_value(&condition.name, value)?;
                key.insert(wire_name.to_string(), value);
            }
            other => rest.push(FieldCondition::new(condition.name, other)),
        }
    }
    for name in schema.fields() {
        if !key.contains_key(metadata.wire_name(name)) {
            return Err(Error::MissingPrimaryKey(name.to_string()));
        }
    }
    Ok((key, rest))
}
