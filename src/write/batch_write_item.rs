use crate::{
    codec::WriteMode,
    common::key::Keys,
    config::MAX_BATCH_WRITE_ITEMS,
    context::RequestContext,
    db::Db,
    error::{Error, PartialBatch, Result},
    model::Model,
    store::Store,
};

use aws_sdk_dynamodb::{operation::batch_write_item::BatchWriteItemInput, types};
use chrono::Utc;
use serde::Serialize;

impl<S: Store> Db<S> {
    /// Stores `models` as new items, in chunks of 25.
    ///
    /// Items are stamped like [`Db::create`] but, as batch writes carry no
    /// guards, an existing item with the same key is replaced. Unprocessed
    /// requests are retried with backoff; running out of attempts fails with
    /// [`Error::BatchRetriesExhausted`].
    pub async fn batch_create<M: Model>(&self, models: &[M]) -> Result<()> {
        self.batch_create_with(models, RequestContext::new()).await
    }

    /// [`Db::batch_create`] under `context`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.batch_create", skip_all, err)
    )]
    pub async fn batch_create_with<M: Model>(
        &self,
        models: &[M],
        context: RequestContext,
    ) -> Result<()> {
        self.batch_put(models, WriteMode::Create, &context).await
    }

    /// Stores `models`, replacing items with the same keys.
    pub async fn batch_upsert<M: Model>(&self, models: &[M]) -> Result<()> {
        self.batch_upsert_with(models, RequestContext::new()).await
    }

    /// [`Db::batch_upsert`] under `context`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.batch_upsert", skip_all, err)
    )]
    pub async fn batch_upsert_with<M: Model>(
        &self,
        models: &[M],
        context: RequestContext,
    ) -> Result<()> {
        self.batch_put(models, WriteMode::Upsert, &context).await
    }

    /// Deletes the items of `M` with the given keys.
    ///
    /// ```rust,no_run
    /// # use dynamodb_mapper::{Db, Model, common::key::Keys, model::{ModelSchema, field::Field}};
    /// # use serde::{Deserialize, Serialize};
    /// # #[derive(Deserialize, Serialize)]
    /// # struct Session { user: String, device: String }
    /// # impl Model for Session {
    /// #     fn schema() -> ModelSchema {
    /// #         ModelSchema::new("sessions")
    /// #             .field(Field::new("user").partition_key())
    /// #             .field(Field::new("device").sort_key())
    /// #     }
    /// # }
    /// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
    /// db.batch_delete::<Session, _>(vec![
    ///     Keys::partition("u-1").with_sort_key("phone"),
    ///     Keys::partition("u-1").with_sort_key("laptop"),
    /// ])
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn batch_delete<M: Model, T: Serialize>(&self, keys: Vec<Keys<T>>) -> Result<()> {
        self.batch_delete_with::<M, T>(keys, RequestContext::new())
            .await
    }

    /// [`Db::batch_delete`] under `context`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.batch_delete", skip_all, err)
    )]
    pub async fn batch_delete_with<M: Model, T: Serialize>(
        &self,
        keys: Vec<Keys<T>>,
        context: RequestContext,
    ) -> Result<()> {
        let metadata = self.metadata::<M>()?;
        self.encryptor(&metadata)?;
        let codec = self.codec(&metadata);
        let requests = keys
            .into_iter()
            .map(|keys| {
                let delete = types::DeleteRequest::builder()
                    .set_key(Some(keys.to_item(&codec)?))
                    .build()?;
                Ok(types::WriteRequest::builder()
                    .delete_request(delete)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;
        self.write_batch(metadata.table(), requests, &context).await
    }

    async fn batch_put<M: Model>(
        &self,
        models: &[M],
        mode: WriteMode,
        context: &RequestContext,
    ) -> Result<()> {
        let metadata = self.metadata::<M>()?;
        let encryptor = self.encryptor(&metadata)?;
        let codec = self.codec(&metadata);
        let now = Utc::now();
        let mut requests = Vec::with_capacity(models.len());
        for model in models {
            let mut logical = self.to_logical(model)?;
            codec.stamp(&mut logical, mode, now);
            let item = self.encode(&metadata, encryptor, logical).await?;
            let put = types::PutRequest::builder().set_item(Some(item)).build()?;
            requests.push(types::WriteRequest::builder().put_request(put).build());
        }
        self.write_batch(metadata.table(), requests, context).await
    }

    /// Sends `requests` in chunks, resubmitting only what the store reports
    /// as unprocessed.
    async fn write_batch(
        &self,
        table: &str,
        requests: Vec<types::WriteRequest>,
        context: &RequestContext,
    ) -> Result<()> {
        let policy = &self.config().batch_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut processed = 0;
        let mut requests = requests.into_iter();
        loop {
            let mut pending: Vec<_> = requests.by_ref().take(MAX_BATCH_WRITE_ITEMS).collect();
            if pending.is_empty() {
                return Ok(());
            }
            let mut attempt = 0;
            while !pending.is_empty() {
                if attempt > 0 {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        table,
                        attempt,
                        unprocessed = pending.len(),
                        "retrying unprocessed batch writes"
                    );
                    context.sleep(policy.delay(attempt - 1)).await?;
                }
                attempt += 1;
                let sent = pending.len();
                let input = BatchWriteItemInput::builder()
                    .request_items(table, pending)
                    .build()?;
                let output = self
                    .call(context, "BatchWriteItem", table, self.store().batch_write_item(input))
                    .await?;
                pending = output
                    .unprocessed_items
                    .and_then(|mut unprocessed| unprocessed.remove(table))
                    .unwrap_or_default();
                processed += sent.saturating_sub(pending.len());
                if !pending.is_empty() && attempt >= max_attempts {
                    pending.extend(requests);
                    return Err(Error::BatchRetriesExhausted(Box::new(PartialBatch {
                        attempts: attempt,
                        processed,
                        unprocessed_writes: pending,
                        ..Default::default()
                    })));
                }
            }
        }
    }
}
