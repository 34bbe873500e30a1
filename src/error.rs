//! Error types returned by every operation of the mapper.

use crate::store;

use aws_sdk_dynamodb::types;
use std::{collections, fmt, time};

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Role of a key attribute inside a key schema.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyRole {
    /// Partition (hash) key.
    Partition,
    /// Sort (range) key.
    Sort,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition => f.write_str("partition"),
            Self::Sort => f.write_str("sort"),
        }
    }
}

/// Direction of an encryption failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Sealing a plaintext value before a write.
    Encrypt,
    /// Opening an envelope after a read.
    Decrypt,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encrypt => f.write_str("encrypt"),
            Self::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// Progress of a batch operation that ran out of retry attempts.
///
/// Raw items and keys are in wire form; use [`crate::Db::decode_item`] to turn
/// retrieved items back into models.
#[derive(Debug, Default)]
pub struct PartialBatch {
    /// Number of submissions made for the chunk that gave up.
    pub attempts: u32,
    /// Number of requests the store acknowledged.
    pub processed: usize,
    /// Write requests never applied, including chunks that were never sent.
    pub unprocessed_writes: Vec<types::WriteRequest>,
    /// Keys never read, including chunks that were never sent.
    pub unprocessed_keys: Vec<collections::HashMap<String, types::AttributeValue>>,
    /// Items read before retries ran out.
    pub retrieved: Vec<collections::HashMap<String, types::AttributeValue>>,
}

/// Errors produced by the mapper.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The registered schema of a model is inconsistent.
    #[error("invalid model `{model}`: {reason}")]
    InvalidModel {
        /// Model name.
        model: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// A key condition uses an operator its key role does not accept.
    #[error("operator `{operator}` is not allowed on {role} key `{field}`")]
    InvalidKeyOperator {
        /// Field name.
        field: String,
        /// Operator name.
        operator: &'static str,
        /// Role of the field in the target key schema.
        role: KeyRole,
    },
    /// A key attribute is absent or null.
    #[error("missing primary key attribute `{0}`")]
    MissingPrimaryKey(String),
    /// A field name does not belong to the model.
    #[error("unknown field `{field}` on model `{model}`")]
    UnknownField {
        /// Model name.
        model: &'static str,
        /// Field name.
        field: String,
    },
    /// An index name does not belong to the model.
    #[error("index `{index}` not found on model `{model}`")]
    IndexNotFound {
        /// Model name.
        model: &'static str,
        /// Index name.
        index: String,
    },
    /// An expression could not be compiled.
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
    /// A request argument is out of range.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A field value could not be converted to or from its wire form.
    #[error("failed to convert field `{field}`: {message}")]
    Conversion {
        /// Field name.
        field: String,
        /// Conversion failure.
        message: String,
    },
    /// Serde conversion between a model and its attribute map failed.
    #[error(transparent)]
    Serde(#[from] serde_dynamo::Error),
    /// A lookup matched no item.
    #[error("item not found")]
    ItemNotFound,
    /// A write guard evaluated to false; nothing was written.
    #[error("conditional check failed")]
    ConditionFailed,
    /// A transaction was canceled for reasons other than a failed guard.
    #[error("transaction canceled: {reasons:?}")]
    TransactionCanceled {
        /// Per-operation cancellation codes, in staging order.
        reasons: Vec<Option<String>>,
    },
    /// More operations were staged than one transaction accepts.
    #[error("transaction has {staged} operations, at most {max} are allowed")]
    TransactionTooLarge {
        /// Staged operations.
        staged: usize,
        /// Upper bound.
        max: usize,
    },
    /// The model has encrypted fields but no key provider is configured.
    #[error("model `{model}` has encrypted fields but no key provider is configured")]
    EncryptionNotConfigured {
        /// Model name.
        model: &'static str,
    },
    /// Encrypting or decrypting one field failed.
    #[error("failed to {direction} field `{field}`: {reason}")]
    EncryptedField {
        /// Field name.
        field: String,
        /// Whether sealing or opening failed.
        direction: Direction,
        /// Failure.
        reason: String,
    },
    /// An encrypted field was used in a comparison.
    #[error("encrypted field `{0}` cannot be used in a condition")]
    EncryptedFieldNotQueryable(String),
    /// An update operation cannot be applied to an encrypted field.
    #[error("update operation `{operation}` is not supported on encrypted field `{field}`")]
    EncryptedFieldNotUpdatable {
        /// Field name.
        field: String,
        /// Update operation.
        operation: &'static str,
    },
    /// The request deadline has passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Less time remains than the configured safety buffer.
    #[error("request deadline imminent: {remaining:?} remaining")]
    DeadlineImminent {
        /// Time left before the deadline.
        remaining: time::Duration,
    },
    /// The request was cancelled by its caller.
    #[error("request cancelled")]
    Cancelled,
    /// A batch operation gave up with items still unprocessed.
    #[error(
        "batch retries exhausted after {} attempts ({} writes and {} keys unprocessed)",
        .0.attempts,
        .0.unprocessed_writes.len(),
        .0.unprocessed_keys.len()
    )]
    BatchRetriesExhausted(Box<PartialBatch>),
    /// A stream record image is not in the typed JSON form.
    #[error("invalid stream image: {0}")]
    InvalidStreamImage(String),
    /// A pagination cursor is malformed or does not match the query.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    /// One segment of a parallel scan failed.
    #[error("scan segment {segment} failed: {source}")]
    SegmentFailed {
        /// Segment number.
        segment: i32,
        /// Segment failure.
        #[source]
        source: Box<Error>,
    },
    /// A spawned task did not run to completion.
    #[error("task failed: {0}")]
    Task(String),
    /// A request could not be assembled.
    #[error(transparent)]
    Build(#[from] aws_sdk_dynamodb::error::BuildError),
    /// The store rejected a call.
    #[error("{operation} on `{table}` failed: {source}")]
    Store {
        /// Store operation name.
        operation: &'static str,
        /// Table name.
        table: String,
        /// Store failure.
        #[source]
        source: store::StoreError,
    },
}

impl Error {
    /// Maps a store failure, surfacing failed guards as [`Error::ConditionFailed`].
    pub(crate) fn store(operation: &'static str, table: &str, source: store::StoreError) -> Self {
        match source {
            store::StoreError::ConditionalCheckFailed => Self::ConditionFailed,
            store::StoreError::TransactionCanceled { reasons } => {
                let guard_failed = reasons
                    .iter()
                    .flatten()
                    .any(|reason| reason == store::CONDITIONAL_CHECK_FAILED);
                if guard_failed {
                    Self::ConditionFailed
                } else {
                    Self::TransactionCanceled { reasons }
                }
            }
            source => Self::Store {
                operation,
                table: table.to_string(),
                source,
            },
        }
    }

    pub(crate) fn conversion(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Conversion {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Whether a write guard failed.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed)
    }

    /// Whether a lookup matched no item.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound)
    }

    /// Whether the request ran out of time or was cancelled.
    pub fn is_deadline(&self) -> bool {
        matches!(
            self,
            Self::DeadlineExceeded | Self::DeadlineImminent { .. } | Self::Cancelled
        )
    }

    /// Partial progress carried by [`Error::BatchRetriesExhausted`].
    pub fn partial_batch(&self) -> Option<&PartialBatch> {
        match self {
            Self::BatchRetriesExhausted(partial) => Some(partial),
            _ => None,
        }
    }
}
