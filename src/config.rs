use crate::retry;

use std::time::Duration;

/// Upper bound of keys in one batch read.
pub const MAX_BATCH_GET_ITEMS: usize = 100;

/// Upper bound of requests in one batch write.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Upper bound of operations in one transaction.
pub const MAX_TRANSACTION_ITEMS: usize = 100;

/// Settings shared by every operation of a [`crate::Db`].
///
/// ```rust
/// use dynamodb_mapper::config::DbConfig;
/// use std::time::Duration;
///
/// let config = DbConfig {
///     deadline_buffer: Duration::from_millis(250),
///     table_prefix: Some("staging-".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct DbConfig {
    /// Backoff applied to unprocessed batch requests.
    pub batch_retry: retry::RetryPolicy,
    /// Keys per batch read, capped at [`MAX_BATCH_GET_ITEMS`].
    pub batch_get_chunk_size: usize,
    /// Minimum time that must remain before a deadline to start a store call.
    pub deadline_buffer: Duration,
    /// Segments of a parallel scan that run at the same time.
    pub max_parallel_segments: usize,
    /// Default read consistency for gets, queries and scans.
    pub consistent_reads: bool,
    /// Prepended to every table name.
    pub table_prefix: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            batch_retry: retry::RetryPolicy::default(),
            batch_get_chunk_size: MAX_BATCH_GET_ITEMS,
            deadline_buffer: Duration::from_millis(100),
            max_parallel_segments: 16,
            consistent_reads: false,
            table_prefix: None,
        }
    }
}

impl DbConfig {
    pub(crate) fn batch_get_chunk_size(&self) -> usize {
        self.batch_get_chunk_size.clamp(1, MAX_BATCH_GET_ITEMS)
    }

    pub(crate) fn max_parallel_segments(&self) -> usize {
        self.max_parallel_segments.max(1)
    }
}
