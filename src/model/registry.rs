use crate::{
    error::Result,
    model::{Model, ModelMetadata},
};

use parking_lot::RwLock;
use std::{any, collections, sync::Arc};

/// Lazily populated cache of [`ModelMetadata`], keyed by Rust type.
///
/// Population is idempotent: concurrent first uses of a model may both build
/// its metadata, but only the first one is kept.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    table_prefix: Option<String>,
    models: RwLock<collections::HashMap<any::TypeId, Arc<ModelMetadata>>>,
}

fn short_type_name<M>() -> &'static str {
    let name = any::type_name::<M>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

impl MetadataRegistry {
    /// A registry that prefixes every table name with `table_prefix`.
    pub fn new(table_prefix: Option<String>) -> Self {
        Self {
            table_prefix,
            models: RwLock::default(),
        }
    }

    /// Metadata of `M`, registering it on first use.
    pub fn get<M: Model>(&self) -> Result<Arc<ModelMetadata>> {
        let type_id = any::TypeId::of::<M>();
        if let Some(metadata) = self.models.read().get(&type_id) {
            return Ok(Arc::clone(metadata));
        }
        let metadata = ModelMetadata::from_schema(
            short_type_name::<M>(),
            M::schema(),
            self.table_prefix.as_deref(),
        )?;
        let mut models = self.models.write();
        let metadata = models.entry(type_id).or_insert_with(|| Arc::new(metadata));
        Ok(Arc::clone(metadata))
    }

    /// Validates and caches `M` ahead of its first use.
    pub fn register<M: Model>(&self) -> Result<()> {
        self.get::<M>().map(|_| ())
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Whether no model has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}
