//! Read operations of models.
//!
//! - Direct lookups by primary key
//! - Fluent queries planned into lookups, key condition queries or scans
//! - Segmented parallel scans
//! - Batch reads with retry of unprocessed keys
//! - Client-side aggregates of one attribute

/// Count, sum, average, minimum and maximum of query results.
pub mod aggregate;

/// Batch reads of many keys.
pub mod batch_get_item;

/// Read parameters shared by every read path.
pub mod common;

/// Direct lookups by primary key.
pub mod get_item;

/// The fluent [`query::ModelQuery`] and its terminals.
pub mod query;

/// Segmented parallel scans.
pub mod scan;
