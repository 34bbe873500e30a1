use crate::{
    codec::{Item, WriteMode},
    common::{condition::Condition, expression::ExpressionBuilder},
    context::RequestContext,
    db::Db,
    error::Result,
    model::{Model, ModelMetadata},
    store::Store,
    write::common::{WriteInput, WriteOptions, add_guard},
};

use aws_sdk_dynamodb::{operation::put_item::PutItemInput, types};
use chrono::Utc;

/// Compiled put ready to be sent alone or inside a transaction.
#[derive(Debug)]
pub(crate) struct PreparedPut {
    pub(crate) item: Item,
    /// Stamped logical map, used to refresh the model after the write.
    pub(crate) logical: Item,
    pub(crate) write: WriteInput,
    pub(crate) context: RequestContext,
}

impl PreparedPut {
    /// Transaction element of the put.
    pub(crate) fn into_transact_item(self) -> Result<types::TransactWriteItem> {
        let builder = types::Put::builder().set_item(Some(self.item));
        let put = crate::apply_write_operation!(builder, self.write).build()?;
        Ok(types::TransactWriteItem::builder().put(put).build())
    }
}

/// Stamps, encodes and encrypts `model` for a put of `mode`.
///
/// Creates are guarded by `attribute_not_exists` on the partition key.
pub(crate) async fn prepare_put<M: Model, S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    model: &M,
    mode: WriteMode,
    options: WriteOptions,
) -> Result<PreparedPut> {
    let encryptor = db.encryptor(metadata)?;
    let codec = db.codec(metadata);
    let mut logical = db.to_logical(model)?;
    codec.stamp(&mut logical, mode, Utc::now());
    let item = db.encode(metadata, encryptor, logical.clone()).await?;

    let mut builder = ExpressionBuilder::for_model(codec);
    if mode == WriteMode::Create {
        add_guard(
            &mut builder,
            &metadata.primary_key().partition_key,
            Condition::NotExists,
        )?;
    }
    let context = options.apply(&mut builder, metadata)?;
    Ok(PreparedPut {
        item,
        logical,
        write: WriteInput::new(metadata.table(), builder.build()),
        context,
    })
}

impl<S: Store> Db<S> {
    /// Stores `model` as a new item.
    ///
    /// Stamps the created-at and updated-at fields, sets the version field
    /// to zero and refreshes `model` with the stamped values. Fails with
    /// [`Error::ConditionFailed`](crate::Error::ConditionFailed) when an
    /// item with the same key exists.
    ///
    /// ```rust,no_run
    /// # use dynamodb_mapper::{Db, Model, model::{ModelSchema, field::Field}};
    /// # use serde::{Deserialize, Serialize};
    /// #[derive(Deserialize, Serialize)]
    /// struct Note {
    ///     id: String,
    ///     body: String,
    ///     created_at: String,
    ///     version: i64,
    /// }
    ///
    /// impl Model for Note {
    ///     fn schema() -> ModelSchema {
    ///         ModelSchema::new("notes")
    ///             .field(Field::new("id").partition_key())
    ///             .field(Field::new("created_at").created_at())
    ///             .field(Field::new("version").version())
    ///     }
    /// }
    ///
    /// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
    /// let mut note = Note {
    ///     id: "n-1".to_string(),
    ///     body: "hello".to_string(),
    ///     created_at: String::new(),
    ///     version: 7,
    /// };
    /// db.create(&mut note).await?;
    /// assert_eq!(note.version, 0);
    /// assert!(!note.created_at.is_empty());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create<M: Model>(&self, model: &mut M) -> Result<()> {
        self.create_with(model, WriteOptions::new()).await
    }

    /// [`Db::create`] with extra guards and a request context.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.create", skip_all, err)
    )]
    pub async fn create_with<M: Model>(&self, model: &mut M, options: WriteOptions) -> Result<()> {
        self.put_model(model, WriteMode::Create, options).await
    }

    /// Stores `model`, replacing any item with the same key.
    ///
    /// Stamped like [`Db::create`], without the existence guard.
    pub async fn create_or_update<M: Model>(&self, model: &mut M) -> Result<()> {
        self.create_or_update_with(model, WriteOptions::new())
            .await
    }

    /// [`Db::create_or_update`] with extra guards and a request context.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.create_or_update", skip_all, err)
    )]
    pub async fn create_or_update_with<M: Model>(
        &self,
        model: &mut M,
        options: WriteOptions,
    ) -> Result<()> {
        self.put_model(model, WriteMode::Upsert, options).await
    }

    async fn put_model<M: Model>(
        &self,
        model: &mut M,
        mode: WriteMode,
        options: WriteOptions,
    ) -> Result<()> {
        let metadata = self.metadata::<M>()?;
        let prepared = prepare_put(self, &metadata, model, mode, options).await?;
        let builder = PutItemInput::builder().set_item(Some(prepared.item));
        let input = crate::apply_write_operation!(builder, prepared.write).build()?;
        self.call(&prepared.context, "PutItem", metadata.table(), self.store().put_item(input))
            .await?;
        *model = serde_dynamo::from_item(prepared.logical)?;
        Ok(())
    }
}
