use crate::error::KeyRole;

use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use std::any;

/// Membership of a field in a secondary index key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexKey {
    /// Index name.
    pub index: String,
    /// Role of the field in the index key schema.
    pub role: KeyRole,
}

/// Declared metadata of one model field.
///
/// Field names are the names serde uses for the model; the wire name defaults
/// to the same string. Roles are only ever assigned explicitly.
///
/// ```rust
/// use dynamodb_mapper::model::field::Field;
///
/// let id = Field::new("id").partition_key();
/// let email = Field::new("email").rename("Email").index_partition_key("by-email");
/// let tags = Field::new("tags").set();
/// let note = Field::new("note").omit_empty::<String>();
/// let version = Field::new("version").version();
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) wire_name: Option<String>,
    pub(crate) converter: Option<any::TypeId>,
    pub(crate) converter_type: Option<&'static str>,
    pub(crate) partition_key: bool,
    pub(crate) sort_key: bool,
    pub(crate) index_keys: Vec<IndexKey>,
    pub(crate) created_at: bool,
    pub(crate) updated_at: bool,
    pub(crate) version: bool,
    pub(crate) ttl: bool,
    pub(crate) set: bool,
    pub(crate) encrypted: bool,
    /// Logical zero value of an omit-if-empty field.
    pub(crate) zero: Option<AttributeValue>,
    pub(crate) epoch_seconds: bool,
}

impl Field {
    /// A field with no role.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wire_name: None,
            converter: None,
            converter_type: None,
            partition_key: false,
            sort_key: false,
            index_keys: Vec::new(),
            created_at: false,
            updated_at: false,
            version: false,
            ttl: false,
            set: false,
            encrypted: false,
            zero: None,
            epoch_seconds: false,
        }
    }

    /// Stores the field under `wire_name`.
    pub fn rename(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = Some(wire_name.into());
        self
    }

    /// Table partition key.
    pub fn partition_key(mut self) -> Self {
        self.partition_key = true;
        self
    }

    /// Table sort key.
    pub fn sort_key(mut self) -> Self {
        self.sort_key = true;
        self
    }

    /// Partition key of secondary index `index`.
    pub fn index_partition_key(mut self, index: impl Into<String>) -> Self {
        self.index_keys.push(IndexKey {
            index: index.into(),
            role: KeyRole::Partition,
        });
        self
    }

    /// Sort key of secondary index `index`.
    pub fn index_sort_key(mut self, index: impl Into<String>) -> Self {
        self.index_keys.push(IndexKey {
            index: index.into(),
            role: KeyRole::Sort,
        });
        self
    }

    /// Stamped with the current time on create.
    pub fn created_at(mut self) -> Self {
        self.created_at = true;
        self
    }

    /// Stamped with the current time on every write.
    pub fn updated_at(mut self) -> Self {
        self.updated_at = true;
        self
    }

    /// Optimistic concurrency counter.
    pub fn version(mut self) -> Self {
        self.version = true;
        self
    }

    /// Expiry attribute, written as epoch seconds.
    pub fn ttl(mut self) -> Self {
        self.ttl = true;
        self
    }

    /// Sequence stored as a native string, number or binary set.
    pub fn set(mut self) -> Self {
        self.set = true;
        self
    }

    /// Stored as an encrypted envelope.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Dropped from written items when equal to `T::default()`, and read
    /// back as that value when absent.
    pub fn omit_empty<T: Default + Serialize>(mut self) -> Self {
        self.zero = serde_dynamo::to_attribute_value::<_, AttributeValue>(T::default()).ok();
        self
    }

    /// Timestamp stamped as epoch seconds when no current value shows its
    /// shape, as in update builders. RFC 3339 strings otherwise.
    pub fn epoch_seconds(mut self) -> Self {
        self.epoch_seconds = true;
        self
    }

    /// Converted by the converter registered for host type `T`.
    pub fn typed<T: 'static>(mut self) -> Self {
        self.converter = Some(any::TypeId::of::<T>());
        self.converter_type = Some(any::type_name::<T>());
        self
    }

    /// Logical (serde) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute name in stored items.
    pub fn wire_name(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether the field is part of the table's primary key.
    pub fn is_primary_key(&self) -> bool {
        self.partition_key || self.sort_key
    }

    /// Whether the field is a key of any index or of the table.
    pub fn is_key(&self) -> bool {
        self.is_primary_key() || !self.index_keys.is_empty()
    }

    /// Whether zero values of the field are left out of stored items.
    pub fn is_omit_empty(&self) -> bool {
        self.zero.is_some()
    }

    /// Whether the field is stored encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the field is managed by the mapper (timestamps and version).
    pub fn is_managed(&self) -> bool {
        self.created_at || self.updated_at || self.version
    }
}
