//! Entry point tying a [`Store`] to model metadata, converters and encryption.

use crate::{
    codec::{
        Item, ItemCodec,
        converter::{AttributeConverter, ConverterRegistry},
        json::from_tagged_map,
    },
    config::DbConfig,
    context::RequestContext,
    encryption::{EnvelopeEncryptor, KeyProvider},
    error::{Error, Result},
    model::{Model, ModelMetadata, registry::MetadataRegistry},
    read::query::ModelQuery,
    store::{Store, StoreError},
    write::transaction::Transaction,
};

use aws_sdk_dynamodb::Client;
use std::{fmt, future::Future, sync::Arc};

#[cfg(feature = "fast-codec")]
use crate::codec::fast::VerifiedLayout;
#[cfg(feature = "fast-codec")]
use std::{any, collections};

struct Inner<S> {
    store: S,
    config: DbConfig,
    registry: MetadataRegistry,
    converters: ConverterRegistry,
    encryptor: Option<EnvelopeEncryptor>,
    #[cfg(feature = "fast-codec")]
    layouts: collections::HashMap<any::TypeId, Box<dyn any::Any + Send + Sync>>,
}

/// Handle to a store and the models mapped onto it.
///
/// Cloning is cheap; clones share the store, the metadata cache and the
/// configuration.
///
/// ```rust,no_run
/// use aws_sdk_dynamodb::Client;
/// use dynamodb_mapper::{Db, Model, common::condition::Condition, model::{ModelSchema, field::Field}};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct User {
///     id: String,
///     name: String,
/// }
///
/// impl Model for User {
///     fn schema() -> ModelSchema {
///         ModelSchema::new("users").field(Field::new("id").partition_key())
///     }
/// }
///
/// # async fn example(client: Client) -> dynamodb_mapper::Result<()> {
/// let db = Db::new(client);
/// let mut user = User { id: "u-1".to_string(), name: "Ada".to_string() };
/// db.create(&mut user).await?;
/// let found: User = db.model::<User>().where_("id", Condition::Equals("u-1")).first().await?;
/// # Ok(())
/// # }
/// ```
pub struct Db<S = Client> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Db<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Db<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.inner.config)
            .field("models", &self.inner.registry.len())
            .field("encryption", &self.inner.encryptor.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder of a [`Db`].
pub struct DbBuilder<S> {
    store: S,
    config: DbConfig,
    converters: ConverterRegistry,
    key_provider: Option<Arc<dyn KeyProvider>>,
    #[cfg(feature = "fast-codec")]
    layouts: collections::HashMap<any::TypeId, Box<dyn any::Any + Send + Sync>>,
}

impl<S: Store> DbBuilder<S> {
    /// Replaces the default configuration.
    pub fn config(mut self, config: DbConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables encrypted fields, sealing data keys issued by `provider`.
    pub fn key_provider(mut self, provider: impl KeyProvider + 'static) -> Self {
        self.key_provider = Some(Arc::new(provider));
        self
    }

    /// Registers `converter` for fields declared with host type `T`.
    pub fn converter<T: 'static>(self, converter: impl AttributeConverter + 'static) -> Self {
        self.converters.register::<T>(converter);
        self
    }

    /// Encodes `M` through a verified offset layout instead of serde.
    #[cfg(feature = "fast-codec")]
    pub fn fast_layout<M: Model>(mut self, layout: VerifiedLayout<M>) -> Self {
        self.layouts.insert(any::TypeId::of::<M>(), Box::new(layout));
        self
    }

    /// Finishes the handle.
    pub fn build(self) -> Db<S> {
        let registry = MetadataRegistry::new(self.config.table_prefix.clone());
        Db {
            inner: Arc::new(Inner {
                store: self.store,
                config: self.config,
                registry,
                converters: self.converters,
                encryptor: self.key_provider.map(EnvelopeEncryptor::new),
                #[cfg(feature = "fast-codec")]
                layouts: self.layouts,
            }),
        }
    }
}

impl Db<Client> {
    /// Handle over an SDK client with the default configuration.
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }
}

impl<S: Store> Db<S> {
    /// Starts building a handle over `store`.
    pub fn builder(store: S) -> DbBuilder<S> {
        DbBuilder {
            store,
            config: DbConfig::default(),
            converters: ConverterRegistry::default(),
            key_provider: None,
            #[cfg(feature = "fast-codec")]
            layouts: collections::HashMap::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &DbConfig {
        &self.inner.config
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Validates and caches the schema of `M` ahead of its first use.
    pub fn register<M: Model>(&self) -> Result<()> {
        self.inner.registry.register::<M>()
    }

    /// Metadata of `M`.
    pub fn metadata<M: Model>(&self) -> Result<Arc<ModelMetadata>> {
        self.inner.registry.get::<M>()
    }

    /// Starts a read of `M`.
    pub fn model<M: Model>(&self) -> ModelQuery<M, S> {
        ModelQuery::new(self.clone())
    }

    /// Starts an empty transaction.
    pub fn transaction(&self) -> Transaction<S> {
        Transaction::new(self.clone())
    }

    /// Model decoded from a wire item, such as the raw items carried by
    /// [`Error::BatchRetriesExhausted`] or returned by transaction gets.
    pub async fn decode_item<M: Model>(&self, item: Item) -> Result<M> {
        let metadata = self.metadata::<M>()?;
        let encryptor = self.encryptor(&metadata)?;
        self.decode(&metadata, encryptor, item).await
    }

    /// Model decoded from a stream record image, `NewImage` or `OldImage`,
    /// in the typed JSON form stream events carry.
    ///
    /// ```rust,no_run
    /// # use dynamodb_mapper::{Db, Model, model::{ModelSchema, field::Field}};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Deserialize, Serialize)]
    /// # struct Order { id: String, total: i64 }
    /// # impl Model for Order {
    /// #     fn schema() -> ModelSchema {
    /// #         ModelSchema::new("orders").field(Field::new("id").partition_key())
    /// #     }
    /// # }
    /// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
    /// let image = serde_json::json!({"id": {"S": "o-1"}, "total": {"N": "40"}});
    /// let order: Order = db.decode_stream_image(&image).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn decode_stream_image<M: Model>(&self, image: &serde_json::Value) -> Result<M> {
        let object = image.as_object().ok_or_else(|| {
            Error::InvalidStreamImage("expected an object of attributes".to_string())
        })?;
        let item = from_tagged_map(object)
            .map_err(|err| Error::InvalidStreamImage(err.to_string()))?;
        self.decode_item(item).await
    }

    pub(crate) fn codec<'a>(&'a self, metadata: &'a ModelMetadata) -> ItemCodec<'a> {
        ItemCodec::new(metadata, &self.inner.converters)
    }

    /// Encryptor for `metadata`, failing closed when the model needs one and
    /// none is configured.
    pub(crate) fn encryptor(&self, metadata: &ModelMetadata) -> Result<Option<&EnvelopeEncryptor>> {
        if !metadata.has_encrypted_fields() {
            return Ok(None);
        }
        match &self.inner.encryptor {
            Some(encryptor) => Ok(Some(encryptor)),
            None => Err(Error::EncryptionNotConfigured {
                model: metadata.name(),
            }),
        }
    }

    /// Logical attribute map of `model`.
    pub(crate) fn to_logical<M: Model>(&self, model: &M) -> Result<Item> {
        #[cfg(feature = "fast-codec")]
        if let Some(layout) = self
            .inner
            .layouts
            .get(&any::TypeId::of::<M>())
            .and_then(|layout| layout.downcast_ref::<VerifiedLayout<M>>())
        {
            return Ok(layout.encode(model));
        }
        Ok(serde_dynamo::to_item(model)?)
    }

    /// Wire item of a logical map, with encrypted fields sealed.
    pub(crate) async fn encode(
        &self,
        metadata: &ModelMetadata,
        encryptor: Option<&EnvelopeEncryptor>,
        logical: Item,
    ) -> Result<Item> {
        let mut item = self.codec(metadata).encode_attributes(logical)?;
        if let Some(encryptor) = encryptor {
            encryptor.encrypt_item(metadata, &mut item).await?;
        }
        Ok(item)
    }

    /// Model of a wire item, with encrypted fields opened.
    pub(crate) async fn decode<M: Model>(
        &self,
        metadata: &ModelMetadata,
        encryptor: Option<&EnvelopeEncryptor>,
        item: Item,
    ) -> Result<M> {
        let logical = self.decode_logical(metadata, encryptor, item).await?;
        Ok(serde_dynamo::from_item(logical)?)
    }

    /// Logical attribute map of a wire item, with encrypted fields opened.
    pub(crate) async fn decode_logical(
        &self,
        metadata: &ModelMetadata,
        encryptor: Option<&EnvelopeEncryptor>,
        mut item: Item,
    ) -> Result<Item> {
        if let Some(encryptor) = encryptor {
            encryptor.decrypt_item(metadata, &mut item).await?;
        }
        self.codec(metadata).decode_attributes(item)
    }

    /// Runs one store call under `context`, refusing to start it when the
    /// request is cancelled or too close to its deadline.
    pub(crate) async fn call<T, F>(
        &self,
        context: &RequestContext,
        operation: &'static str,
        table: &str,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        context.check(self.inner.config.deadline_buffer)?;
        context
            .run(async { call.await.map_err(|err| Error::store(operation, table, err)) })
            .await
    }
}
