use crate::{
    codec::Item,
    common::{
        condition::{ConditionGroup, ConditionNode, FieldCondition, LogicalOperator},
        expression::ExpressionBuilder,
        key::bind_key,
    },
    context::RequestContext,
    db::Db,
    error::Result,
    model::{Model, ModelMetadata},
    store::Store,
    write::common::{WriteInput, WriteOptions, add_version_guard, key_of_logical},
};

use aws_sdk_dynamodb::{operation::delete_item::DeleteItemInput, types};

/// Compiled delete ready to be sent alone or inside a transaction.
#[derive(Debug)]
pub(crate) struct PreparedDelete {
    pub(crate) key: Item,
    pub(crate) write: WriteInput,
    pub(crate) context: RequestContext,
}

impl PreparedDelete {
    fn into_input(self) -> Result<(DeleteItemInput, RequestContext)> {
        let builder = DeleteItemInput::builder().set_key(Some(self.key));
        let input = crate::apply_write_operation!(builder, self.write).build()?;
        Ok((input, self.context))
    }

    /// Transaction element of the delete.
    pub(crate) fn into_transact_item(self) -> Result<types::TransactWriteItem> {
        let builder = types::Delete::builder().set_key(Some(self.key));
        let delete = crate::apply_write_operation!(builder, self.write).build()?;
        Ok(types::TransactWriteItem::builder().delete(delete).build())
    }
}

/// Compiles the delete of the item behind `model`, guarded on its version
/// when non-zero.
pub(crate) fn prepare_delete<M: Model, S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    model: &M,
    options: WriteOptions,
) -> Result<PreparedDelete> {
    db.encryptor(metadata)?;
    let codec = db.codec(metadata);
    let logical = db.to_logical(model)?;
    let key = key_of_logical(&codec, &logical)?;
    let mut builder = ExpressionBuilder::for_model(codec);
    let context = options.apply(&mut builder, metadata)?;
    add_version_guard(&mut builder, metadata, codec.version_of(&logical)?)?;
    Ok(PreparedDelete {
        key,
        write: WriteInput::new(metadata.table(), builder.build()),
        context,
    })
}

/// Compiles the delete of the item whose key `conditions` bind by equality;
/// the remaining conditions and `filters` guard it.
pub(crate) fn prepare_delete_where<S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    conditions: Vec<FieldCondition>,
    filters: ConditionGroup,
    context: RequestContext,
) -> Result<PreparedDelete> {
    db.encryptor(metadata)?;
    let codec = db.codec(metadata);
    let (key, guards) = bind_key(&codec, conditions)?;
    let mut builder = ExpressionBuilder::for_model(codec);
    for guard in guards {
        builder.add_write_condition(LogicalOperator::And, ConditionNode::Leaf(guard))?;
    }
    builder.add_write_condition_group(filters)?;
    Ok(PreparedDelete {
        key,
        write: WriteInput::new(metadata.table(), builder.build()),
        context,
    })
}

impl<S: Store> Db<S> {
    /// Deletes the stored item behind `model`.
    ///
    /// Guarded on the version field when `model` carries a non-zero version.
    /// Deleting a missing item succeeds.
    pub async fn delete<M: Model>(&self, model: &M) -> Result<()> {
        self.delete_with(model, WriteOptions::new()).await
    }

    /// [`Db::delete`] with extra guards and a request context.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.delete", skip_all, err)
    )]
    pub async fn delete_with<M: Model>(&self, model: &M, options: WriteOptions) -> Result<()> {
        let metadata = self.metadata::<M>()?;
        let prepared = prepare_delete(self, &metadata, model, options)?;
        self.send_delete(&metadata, prepared).await
    }

    pub(crate) async fn send_delete(
        &self,
        metadata: &ModelMetadata,
        prepared: PreparedDelete,
    ) -> Result<()> {
        let (input, context) = prepared.into_input()?;
        self.call(&context, "DeleteItem", metadata.table(), self.store().delete_item(input))
            .await?;
        Ok(())
    }
}
