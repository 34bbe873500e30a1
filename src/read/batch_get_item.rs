use crate::{
    codec::{Item, json},
    common::key::Keys,
    context::RequestContext,
    db::Db,
    error::{Error, PartialBatch, Result},
    model::Model,
    read::common::decode_items,
    store::Store,
};

use aws_sdk_dynamodb::{operation::batch_get_item::BatchGetItemInput, types};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections;

/// Order-independent identity of a key, used to match results to requests.
fn fingerprint(key: &Item) -> Result<String> {
    let tagged: collections::BTreeMap<_, _> = json::to_tagged_map(key)
        .map_err(|err| Error::InvalidRequest(err.to_string()))?
        .into_iter()
        .collect();
    serde_json::to_string(&tagged).map_err(|err| Error::InvalidRequest(err.to_string()))
}

impl<S: Store> Db<S> {
    /// Reads the items of `M` with the given keys.
    ///
    /// Duplicate keys are read once. Keys are sent in chunks of
    /// [`DbConfig::batch_get_chunk_size`](crate::config::DbConfig) and
    /// unprocessed keys are retried with backoff. Found items come back in
    /// the order of their first key; missing items are skipped. Running out
    /// of attempts fails with [`Error::BatchRetriesExhausted`], which carries
    /// the items already read.
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
    /// let users: Vec<User> = db
    ///     .batch_get(vec![Keys::partition("u-1"), Keys::partition("u-2")])
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn batch_get<M: Model, T: Serialize>(&self, keys: Vec<Keys<T>>) -> Result<Vec<M>> {
        self.batch_get_with(keys, RequestContext::new()).await
    }

    /// [`Db::batch_get`] under `context`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.batch_get", skip_all, err)
    )]
    pub async fn batch_get_with<M: Model, T: Serialize>(
        &self,
        keys: Vec<Keys<T>>,
        context: RequestContext,
    ) -> Result<Vec<M>> {
        let metadata = self.metadata::<M>()?;
        self.encryptor(&metadata)?;
        let codec = self.codec(&metadata);
        let mut requested = IndexMap::with_capacity(keys.len());
        for keys in keys {
            let key = keys.to_item(&codec)?;
            requested.entry(fingerprint(&key)?).or_insert(key);
        }

        let table = metadata.table();
        let consistent_read = self.config().consistent_reads.then_some(true);
        let policy = &self.config().batch_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut found = collections::HashMap::with_capacity(requested.len());
        let mut processed = 0;
        let mut chunks = requested
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .into_iter();
        loop {
            let mut pending: Vec<_> = chunks
                .by_ref()
                .take(self.config().batch_get_chunk_size())
                .collect();
            if pending.is_empty() {
                break;
            }
            let mut attempt = 0;
            while !pending.is_empty() {
                if attempt > 0 {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        table,
                        attempt,
                        unprocessed = pending.len(),
                        "retrying unprocessed batch reads"
                    );
                    context.sleep(policy.delay(attempt - 1)).await?;
                }
                attempt += 1;
                let sent = pending.len();
                let keys_and_attributes = types::KeysAndAttributes::builder()
                    .set_keys(Some(pending))
                    .set_consistent_read(consistent_read)
                    .build()?;
                let input = BatchGetItemInput::builder()
                    .request_items(table, keys_and_attributes)
                    .build()?;
                let mut output = self
                    .call(&context, "BatchGetItem", table, self.store().batch_get_item(input))
                    .await?;
                let items = output
                    .responses
                    .as_mut()
                    .and_then(|responses| responses.remove(table))
                    .unwrap_or_default();
                for item in items {
                    found.insert(fingerprint(&codec.key_of(&item)?)?, item);
                }
                pending = output
                    .unprocessed_keys
                    .and_then(|mut unprocessed| unprocessed.remove(table))
                    .map(|keys_and_attributes| keys_and_attributes.keys)
                    .unwrap_or_default();
                processed += sent.saturating_sub(pending.len());
                if !pending.is_empty() && attempt >= max_attempts {
                    pending.extend(chunks);
                    let retrieved = requested
                        .keys()
                        .filter_map(|fingerprint| found.remove(fingerprint))
                        .collect();
                    return Err(Error::BatchRetriesExhausted(Box::new(PartialBatch {
                        attempts: attempt,
                        processed,
                        unprocessed_keys: pending,
                        retrieved,
                        ..Default::default()
                    })));
                }
            }
        }

        let items = requested
            .keys()
            .filter_map(|fingerprint| found.remove(fingerprint))
            .collect();
        decode_items(self, &metadata, items).await
    }
}
