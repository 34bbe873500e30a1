use crate::{
    codec::Item,
    common::{expression::CompiledExpression, key::Keys},
    context::RequestContext,
    db::Db,
    error::{Error, Result},
    model::{Model, ModelMetadata},
    read::common::SingleReadInput,
    store::Store,
};

use aws_sdk_dynamodb::operation::get_item::GetItemInput;
use serde::Serialize;

/// Reads the raw item stored under `key`, if any.
pub(crate) async fn get_item<S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    key: Item,
    read: SingleReadInput,
    context: &RequestContext,
) -> Result<Option<Item>> {
    let builder = GetItemInput::builder().set_key(Some(key));
    let input = crate::apply_single_read_operation!(builder, read).build()?;
    let output = db
        .call(context, "GetItem", metadata.table(), db.store().get_item(input))
        .await?;
    Ok(output.item)
}

impl<S: Store> Db<S> {
    /// Reads the item of `M` stored under `keys`.
    ///
    /// Fails with [`Error::ItemNotFound`] when there is none.
    ///
    /// ```rust,no_run
    /// # use dynamodb_mapper::{Db, Model, common::key::Keys, model::{ModelSchema, field::Field}};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Deserialize, Serialize)]
    /// # struct User { id: String }
    /// # impl Model for User {
    /// #     fn schema() -> ModelSchema {
    /// #         ModelSchema::new("users").field(Field::new("id").partition_key())
    /// #     }
    /// # }
    /// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
    /// let user: User = db.get(Keys::partition("u-1")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<M: Model, T: Serialize>(&self, keys: Keys<T>) -> Result<M> {
        self.get_with(keys, RequestContext::new()).await
    }

    /// [`Db::get`] under `context`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.get", skip_all, err)
    )]
    pub async fn get_with<M: Model, T: Serialize>(
        &self,
        keys: Keys<T>,
        context: RequestContext,
    ) -> Result<M> {
        let metadata = self.metadata::<M>()?;
        let encryptor = self.encryptor(&metadata)?;
        let key = keys.to_item(&self.codec(&metadata))?;
        let consistent_read = self.config().consistent_reads.then_some(true);
        let read = SingleReadInput::new(metadata.table(), CompiledExpression::default(), consistent_read);
        let item = get_item(self, &metadata, key, read, &context)
            .await?
            .ok_or(Error::ItemNotFound)?;
        self.decode(&metadata, encryptor, item).await
    }
}
