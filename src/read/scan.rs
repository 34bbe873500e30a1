use crate::{
    codec::Item,
    context::RequestContext,
    db::Db,
    error::{Error, Result},
    model::Model,
    read::{
        common::decode_items,
        query::{CompiledRead, ModelQuery, read_page},
    },
    store::Store,
};

use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};

/// Scans every page of one segment.
async fn scan_segment<S: Store>(
    db: &Db<S>,
    compiled: &CompiledRead,
    segment: (i32, i32),
    context: &RequestContext,
) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut start = None;
    loop {
        let read = compiled.read.page(start.take(), None, None);
        let page = read_page(db, compiled, read, context, Some(segment)).await?;
        items.extend(page.items);
        match page.last_evaluated_key {
            Some(key) => start = Some(key),
            None => return Ok(items),
        }
    }
}

impl<M: Model, S: Store> ModelQuery<M, S> {
    /// Scans the table in `segments` disjoint segments, concurrently.
    ///
    /// At most [`DbConfig::max_parallel_segments`](crate::config::DbConfig)
    /// segments run at once. Every segment is drained before results are
    /// merged; items come back in segment order. The first failing segment
    /// fails the whole scan with [`Error::SegmentFailed`]. Limit and cursor
    /// do not apply.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.scan_all_segments", skip_all, fields(segments = segments), err)
    )]
    pub async fn scan_all_segments(mut self, segments: i32) -> Result<Vec<M>> {
        if segments < 1 {
            return Err(Error::InvalidRequest(format!(
                "segment count must be positive, got {segments}"
            )));
        }
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let compiled = Arc::new(self.compile_scan(&metadata)?);
        let semaphore = Arc::new(Semaphore::new(self.db.config().max_parallel_segments()));

        let mut tasks = JoinSet::new();
        for segment in 0..segments {
            let db = self.db.clone();
            let compiled = Arc::clone(&compiled);
            let semaphore = Arc::clone(&semaphore);
            let context = self.context.clone();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => scan_segment(&db, &compiled, (segment, segments), &context).await,
                    Err(err) => Err(Error::Task(err.to_string())),
                };
                (segment, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<Vec<Item>>>> = (0..segments).map(|_| None).collect();
        let mut join_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((segment, outcome)) => {
                    if let Some(slot) = usize::try_from(segment).ok().and_then(|at| outcomes.get_mut(at)) {
                        *slot = Some(outcome);
                    }
                }
                Err(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %err, "scan segment task failed");
                    join_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        let mut items = Vec::new();
        for (segment, outcome) in (0..segments).zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                Err(Error::Task(
                    join_error
                        .clone()
                        .unwrap_or_else(|| "segment task did not complete".to_string()),
                ))
            });
            match outcome {
                Ok(segment_items) => items.extend(segment_items),
                Err(err) => {
                    return Err(Error::SegmentFailed {
                        segment,
                        source: Box::new(err),
                    });
                }
            }
        }
        decode_items(&self.db, &metadata, items).await
    }
}
