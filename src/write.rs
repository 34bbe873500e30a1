//! Write operations of models.
//!
//! - Creating items or replacing existing ones
//! - Whole-model, field subset and fluent updates
//! - Deleting items, guarded on their version
//! - Batch writes with retry of unprocessed requests
//! - Transactions

/// Batch creates, upserts and deletes.
pub mod batch_write_item;

/// Write guards and parameters shared by every write path.
pub mod common;

/// Deletes.
pub mod delete_item;

/// Creates and create-or-replace puts.
pub mod put_item;

/// All-or-nothing groups of writes and reads.
pub mod transaction;

/// Updates.
pub mod update_item;
