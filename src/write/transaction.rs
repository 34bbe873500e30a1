use crate::{
    codec::{Item, WriteMode},
    common::{condition::ConditionGroup, expression::ExpressionBuilder, key::Keys},
    config::MAX_TRANSACTION_ITEMS,
    context::RequestContext,
    db::Db,
    error::{Error, Result},
    model::Model,
    store::Store,
    write::{
        common::{WriteInput, WriteOptions},
        delete_item::prepare_delete,
        put_item::prepare_put,
        update_item::prepare_model_update,
    },
};

use aws_sdk_dynamodb::{
    Client,
    operation::{
        transact_get_items::TransactGetItemsInput,
        transact_write_items::TransactWriteItemsInput,
    },
    types,
};
use serde::Serialize;

/// Operations committed together, all or nothing.
///
/// Staging compiles and encodes each operation without contacting the
/// store. [`commit`](Self::commit) sends the writes as one transactional
/// write, then the gets as one transactional read. A failed guard voids
/// every write and surfaces as [`Error::ConditionFailed`].
///
/// ```rust,no_run
/// # use dynamodb_mapper::{Db, Model, model::{ModelSchema, field::Field}};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Deserialize, Serialize)]
/// # struct Account { id: String, balance: i64, version: i64 }
/// # impl Model for Account {
/// #     fn schema() -> ModelSchema {
/// #         ModelSchema::new("accounts")
/// #             .field(Field::new("id").partition_key())
/// #             .field(Field::new("version").version())
/// #     }
/// # }
/// # async fn example(db: Db, from: Account, to: Account) -> dynamodb_mapper::Result<()> {
/// let mut transaction = db.transaction();
/// transaction.update(&from).await?;
/// transaction.update(&to).await?;
/// transaction.commit().await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "staged operations are discarded unless committed"]
pub struct Transaction<S = Client> {
    db: Db<S>,
    writes: Vec<types::TransactWriteItem>,
    gets: Vec<types::TransactGetItem>,
    tables: Vec<String>,
    context: RequestContext,
}

impl<S: Store> Transaction<S> {
    pub(crate) fn new(db: Db<S>) -> Self {
        Self {
            db,
            writes: Vec::new(),
            gets: Vec::new(),
            tables: Vec::new(),
            context: RequestContext::new(),
        }
    }

    /// Runs the commit under `context`.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.writes.len() + self.gets.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn touch(&mut self, table: &str) {
        if !self.tables.iter().any(|staged| staged == table) {
            self.tables.push(table.to_string());
        }
    }

    /// Stages the creation of `model`, guarded against an existing item.
    pub async fn create<M: Model>(&mut self, model: &M) -> Result<()> {
        self.create_with(model, WriteOptions::new()).await
    }

    /// [`Transaction::create`] with extra guards.
    pub async fn create_with<M: Model>(&mut self, model: &M, options: WriteOptions) -> Result<()> {
        self.put(model, WriteMode::Create, options).await
    }

    /// Stages a create-or-replace of `model`.
    pub async fn create_or_update<M: Model>(&mut self, model: &M) -> Result<()> {
        self.put(model, WriteMode::Upsert, WriteOptions::new())
            .await
    }

    async fn put<M: Model>(&mut self, model: &M, mode: WriteMode, options: WriteOptions) -> Result<()> {
        let metadata = self.db.metadata::<M>()?;
        let prepared = prepare_put(&self.db, &metadata, model, mode, options).await?;
        self.writes.push(prepared.into_transact_item()?);
        self.touch(metadata.table());
        Ok(())
    }

    /// Stages an update of every field of `model`, guarded on its version.
    pub async fn update<M: Model>(&mut self, model: &M) -> Result<()> {
        self.update_with(model, WriteOptions::new()).await
    }

    /// [`Transaction::update`] with extra guards.
    pub async fn update_with<M: Model>(&mut self, model: &M, options: WriteOptions) -> Result<()> {
        let metadata = self.db.metadata::<M>()?;
        let prepared = prepare_model_update(&self.db, &metadata, model, None, options).await?;
        self.writes.push(prepared.into_transact_item()?);
        self.touch(metadata.table());
        Ok(())
    }

    /// Stages the delete of the item behind `model`.
    pub fn delete<M: Model>(&mut self, model: &M) -> Result<()> {
        self.delete_with(model, WriteOptions::new())
    }

    /// [`Transaction::delete`] with extra guards.
    pub fn delete_with<M: Model>(&mut self, model: &M, options: WriteOptions) -> Result<()> {
        let metadata = self.db.metadata::<M>()?;
        let prepared = prepare_delete(&self.db, &metadata, model, options)?;
        self.writes.push(prepared.into_transact_item()?);
        self.touch(metadata.table());
        Ok(())
    }

    /// Stages a check that `conditions` hold on the item under `keys`,
    /// without writing it.
    pub fn condition_check<M: Model, T: Serialize>(
        &mut self,
        keys: Keys<T>,
        conditions: ConditionGroup,
    ) -> Result<()> {
        if conditions.is_empty() {
            return Err(Error::InvalidRequest(
                "a condition check needs at least one condition".to_string(),
            ));
        }
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let codec = self.db.codec(&metadata);
        let key = keys.to_item(&codec)?;
        let mut builder = ExpressionBuilder::for_model(codec);
        builder.add_write_condition_group(conditions)?;
        let write = WriteInput::new(metadata.table(), builder.build());
        let builder = types::ConditionCheck::builder().set_key(Some(key));
        let check = crate::apply_write_operation!(builder, write).build()?;
        self.writes
            .push(types::TransactWriteItem::builder().condition_check(check).build());
        self.touch(metadata.table());
        Ok(())
    }

    /// Stages a read of the item of `M` under `keys`.
    ///
    /// Its raw item is returned by [`commit`](Self::commit), in staging
    /// order among gets; decode it with [`Db::decode_item`].
    pub fn get<M: Model, T: Serialize>(&mut self, keys: Keys<T>) -> Result<()> {
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let key = keys.to_item(&self.db.codec(&metadata))?;
        let get = types::Get::builder()
            .set_key(Some(key))
            .table_name(metadata.table())
            .build()?;
        self.gets.push(types::TransactGetItem::builder().get(get).build());
        self.touch(metadata.table());
        Ok(())
    }

    /// Discards every staged operation.
    pub fn rollback(&mut self) {
        self.writes.clear();
        self.gets.clear();
        self.tables.clear();
    }

    /// Commits the staged operations.
    ///
    /// Returns one entry per staged get, `None` where no item exists.
    /// Committing nothing is a no-op.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.commit", skip_all, fields(operations = self.len()), err)
    )]
    pub async fn commit(self) -> Result<Vec<Option<Item>>> {
        let staged = self.len();
        if staged > MAX_TRANSACTION_ITEMS {
            return Err(Error::TransactionTooLarge {
                staged,
                max: MAX_TRANSACTION_ITEMS,
            });
        }
        let tables = self.tables.join(",");
        if !self.writes.is_empty() {
            let input = TransactWriteItemsInput::builder()
                .set_transact_items(Some(self.writes))
                .build()?;
            self.db
                .call(
                    &self.context,
                    "TransactWriteItems",
                    &tables,
                    self.db.store().transact_write_items(input),
                )
                .await?;
        }
        if self.gets.is_empty() {
            return Ok(Vec::new());
        }
        let input = TransactGetItemsInput::builder()
            .set_transact_items(Some(self.gets))
            .build()?;
        let output = self
            .db
            .call(
                &self.context,
                "TransactGetItems",
                &tables,
                self.db.store().transact_get_items(input),
            )
            .await?;
        Ok(output
            .responses
            .unwrap_or_default()
            .into_iter()
            .map(|response| response.item)
            .collect())
    }
}
