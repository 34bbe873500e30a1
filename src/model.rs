//! Model registration and resolved metadata.
//!
//! A type becomes a model by implementing [`Model`] and returning its
//! [`ModelSchema`]. The schema is validated and resolved into
//! [`ModelMetadata`] once per type, the first time a [`crate::Db`] touches it.

/// Field declarations.
pub mod field;

/// Per-type metadata cache.
pub mod registry;

use crate::error::{Error, KeyRole, Result};

use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use std::collections;

/// A type stored as items of one table.
///
/// ```rust
/// use dynamodb_mapper::model::{IndexSchema, Model, ModelSchema, field::Field};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct User {
///     id: String,
///     email: String,
///     version: i64,
/// }
///
/// impl Model for User {
///     fn schema() -> ModelSchema {
///         ModelSchema::new("users")
///             .field(Field::new("id").partition_key())
///             .field(Field::new("email").index_partition_key("by-email"))
///             .field(Field::new("version").version())
///             .index(IndexSchema::global("by-email"))
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Declares the table, fields and indexes of the model.
    fn schema() -> ModelSchema;
}

/// Kind of a secondary index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexKind {
    /// Global secondary index.
    Global,
    /// Local secondary index; shares the table partition key.
    Local,
}

/// Attributes copied into a secondary index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Projection {
    /// Every attribute.
    #[default]
    All,
    /// Table and index keys only.
    KeysOnly,
    /// Keys plus the named attributes.
    Include(Vec<String>),
}

/// Declared secondary index. Its key fields are declared on the fields.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexSchema {
    name: String,
    kind: IndexKind,
    projection: Projection,
}

impl IndexSchema {
    /// A global secondary index.
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Global,
            projection: Projection::All,
        }
    }

    /// A local secondary index.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Local,
            projection: Projection::All,
        }
    }

    /// Sets the projected attributes.
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Registration of a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSchema {
    table: String,
    fields: Vec<field::Field>,
    indexes: Vec<IndexSchema>,
}

impl ModelSchema {
    /// Schema of a model stored in `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Declares a field.
    pub fn field(mut self, field: field::Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a secondary index.
    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Partition key and optional sort key, by field name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeySchema {
    /// Partition key field.
    pub partition_key: String,
    /// Sort key field.
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// Role of `field` in this key schema.
    pub fn role_of(&self, field: &str) -> Option<KeyRole> {
        if self.partition_key == field {
            Some(KeyRole::Partition)
        } else if self.sort_key.as_deref() == Some(field) {
            Some(KeyRole::Sort)
        } else {
            None
        }
    }

    /// Key fields, partition key first.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }
}

/// Resolved secondary index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexMetadata {
    /// Index name.
    pub name: String,
    /// Global or local.
    pub kind: IndexKind,
    /// Index key schema.
    pub keys: KeySchema,
    /// Projected attributes.
    pub projection: Projection,
}

/// Validated, immutable metadata of a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelMetadata {
    name: &'static str,
    table: String,
    primary: KeySchema,
    indexes: Vec<IndexMetadata>,
    fields: IndexMap<String, field::Field>,
    by_wire_name: collections::HashMap<String, String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    version: Option<String>,
    ttl: Option<String>,
}

fn single<'a>(
    model: &'static str,
    fields: impl Iterator<Item = &'a field::Field>,
    role: &str,
) -> Result<Option<String>> {
    let names: Vec<_> = fields.map(|field| field.name.clone()).collect();
    match names.len() {
        0 | 1 => Ok(names.into_iter().next()),
        _ => Err(Error::InvalidModel {
            model,
            reason: format!("{role} is declared on several fields: {}", names.join(", ")),
        }),
    }
}

impl ModelMetadata {
    pub(crate) fn from_schema(
        name: &'static str,
        schema: ModelSchema,
        table_prefix: Option<&str>,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidModel {
            model: name,
            reason,
        };
        let mut fields = IndexMap::with_capacity(schema.fields.len());
        let mut by_wire_name = collections::HashMap::with_capacity(schema.fields.len());
        for field in schema.fields {
            if field.encrypted && field.is_key() {
                return Err(invalid(format!(
                    "key field `{}` cannot be encrypted",
                    field.name
                )));
            }
            if field.partition_key && field.sort_key {
                return Err(invalid(format!(
                    "field `{}` is both partition and sort key",
                    field.name
                )));
            }
            if field.set && field.is_primary_key() {
                return Err(invalid(format!("key field `{}` cannot be a set", field.name)));
            }
            if field.version && field.is_key() {
                return Err(invalid(format!(
                    "version field `{}` cannot be a key",
                    field.name
                )));
            }
            let wire_name = field.wire_name().to_string();
            if by_wire_name
                .insert(wire_name.clone(), field.name.clone())
                .is_some()
            {
                return Err(invalid(format!("attribute `{wire_name}` is declared twice")));
            }
            if fields.contains_key(&field.name) {
                return Err(invalid(format!("field `{}` is declared twice", field.name)));
            }
            fields.insert(field.name.clone(), field);
        }

        let partition_key = single(name, fields.values().filter(|f| f.partition_key), "partition key")?
            .ok_or_else(|| invalid("no partition key field".to_string()))?;
        let sort_key = single(name, fields.values().filter(|f| f.sort_key), "sort key")?;
        let primary = KeySchema {
            partition_key,
            sort_key,
        };

        let mut indexes = Vec::with_capacity(schema.indexes.len());
        for index in schema.indexes {
            let index_name = index.name.as_str();
            let members = |role: KeyRole| {
                fields.values().filter(move |field| {
                    field
                        .index_keys
                        .iter()
                        .any(|key| key.index == index_name && key.role == role)
                })
            };
            let index_partition_key = single(name, members(KeyRole::Partition), "index partition key")?;
            let index_sort_key = single(name, members(KeyRole::Sort), "index sort key")?;
            let partition_key = match (index_partition_key, index.kind) {
                (Some(partition_key), IndexKind::Local) if partition_key != primary.partition_key => {
                    return Err(invalid(format!(
                        "local index `{}` must share the table partition key",
                        index.name
                    )));
                }
                (Some(partition_key), _) => partition_key,
                (None, IndexKind::Local) => primary.partition_key.clone(),
                (None, IndexKind::Global) => {
                    return Err(invalid(format!(
                        "global index `{}` has no partition key field",
                        index.name
                    )));
                }
            };
            indexes.push(IndexMetadata {
                name: index.name,
                kind: index.kind,
                keys: KeySchema {
                    partition_key,
                    sort_key: index_sort_key,
                },
                projection: index.projection,
            });
        }
        for field in fields.values() {
            for key in &field.index_keys {
                if !indexes.iter().any(|index| index.name == key.index) {
                    return Err(invalid(format!(
                        "field `{}` references undeclared index `{}`",
                        field.name, key.index
                    )));
                }
            }
        }

        let created_at = single(name, fields.values().filter(|f| f.created_at), "created-at")?;
        let updated_at = single(name, fields.values().filter(|f| f.updated_at), "updated-at")?;
        let version = single(name, fields.values().filter(|f| f.version), "version")?;
        let ttl = single(name, fields.values().filter(|f| f.ttl), "ttl")?;
        let table = match table_prefix {
            Some(prefix) => format!("{prefix}{}", schema.table),
            None => schema.table,
        };
        Ok(Self {
            name,
            table,
            primary,
            indexes,
            fields,
            by_wire_name,
            created_at,
            updated_at,
            version,
            ttl,
        })
    }

    /// Model name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Table name, prefix included.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Table key schema.
    pub fn primary_key(&self) -> &KeySchema {
        &self.primary
    }

    /// Secondary indexes.
    pub fn indexes(&self) -> &[IndexMetadata] {
        &self.indexes
    }

    /// Secondary index by name.
    pub fn index(&self, name: &str) -> Result<&IndexMetadata> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| Error::IndexNotFound {
                model: self.name,
                index: name.to_string(),
            })
    }

    /// Key schema of the table, or of `index` when given.
    pub fn key_schema(&self, index: Option<&str>) -> Result<&KeySchema> {
        match index {
            Some(index) => Ok(&self.index(index)?.keys),
            None => Ok(&self.primary),
        }
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &field::Field> {
        self.fields.values()
    }

    /// Field by logical name.
    pub fn field(&self, name: &str) -> Option<&field::Field> {
        self.fields.get(name)
    }

    /// Field by attribute name.
    pub fn field_by_wire_name(&self, wire_name: &str) -> Option<&field::Field> {
        self.by_wire_name
            .get(wire_name)
            .and_then(|name| self.fields.get(name))
    }

    /// Attribute name of a logical name; undeclared names map to themselves.
    pub fn wire_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields.get(name).map_or(name, |field| field.wire_name())
    }

    /// Created-at field name.
    pub fn created_at_field(&self) -> Option<&str> {
        self.created_at.as_deref()
    }

    /// Updated-at field name.
    pub fn updated_at_field(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    /// Version field name.
    pub fn version_field(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// TTL field name.
    pub fn ttl_field(&self) -> Option<&str> {
        self.ttl.as_deref()
    }

    /// Whether any field is stored encrypted.
    pub fn has_encrypted_fields(&self) -> bool {
        self.fields.values().any(|field| field.encrypted)
    }
}
