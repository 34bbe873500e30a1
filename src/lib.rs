#![warn(missing_docs)]

//! # DynamoDB Mapper
//!
//! A type-safe model mapper and query engine for Amazon DynamoDB tables.
//!
//! ## Overview
//!
//! Plain serde structs become models by declaring their table, keys and
//! indexes. On top of them the mapper:
//! - Compiles fluent conditions, filters, projections and updates into
//!   expressions with collision-free placeholders
//! - Picks a direct lookup, a key condition query or a scan for every read
//! - Stamps created-at, updated-at and version fields, and guards updates and
//!   deletes on the version (optimistic concurrency)
//! - Encrypts selected attributes with envelope encryption, failing closed
//! - Retries unprocessed batch requests with exponential backoff, runs
//!   transactions and segmented parallel scans
//! - Resumes reads from opaque pagination cursors
//!
//! ## Quick Example
//!
//! ```no_run
//! use aws_sdk_dynamodb::Client;
//! use dynamodb_mapper::{
//!     Db, Model,
//!     common::condition::Condition,
//!     model::{ModelSchema, field::Field},
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Serialize)]
//! struct Post {
//!     author: String,
//!     slug: String,
//!     title: String,
//!     likes: i64,
//!     version: i64,
//! }
//!
//! impl Model for Post {
//!     fn schema() -> ModelSchema {
//!         ModelSchema::new("posts")
//!             .field(Field::new("author").partition_key())
//!             .field(Field::new("slug").sort_key())
//!             .field(Field::new("version").version())
//!     }
//! }
//!
//! # async fn example(client: Client) -> dynamodb_mapper::Result<()> {
//! let db = Db::new(client);
//! let mut post = Post {
//!     author: "ada".to_string(),
//!     slug: "engines".to_string(),
//!     title: "On engines".to_string(),
//!     likes: 0,
//!     version: 0,
//! };
//! db.create(&mut post).await?;
//!
//! // Increments `likes` of the item the key equalities select
//! db.model::<Post>()
//!     .where_("author", Condition::Equals("ada"))
//!     .where_("slug", Condition::Equals("engines"))
//!     .update_builder()
//!     .increment("likes", 1)
//!     .execute()
//!     .await?;
//!
//! let popular = db
//!     .model::<Post>()
//!     .where_("author", Condition::Equals("ada"))
//!     .filter("likes", Condition::GreaterThanOrEqual(100))
//!     .all()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`mod@model`] - Model schemas and resolved metadata
//! - [`mod@common`] - Conditions, the expression compiler and keys
//! - [`mod@planner`] - Access path selection of reads
//! - [`mod@codec`] - Model to item conversion
//! - [`mod@encryption`] - Attribute envelope encryption
//! - [`mod@read`] - Lookups, queries, scans and batch reads
//! - [`mod@write`] - Puts, updates, deletes, batch writes and transactions

/// Model to item conversion, converters and the fast codec.
pub mod codec;

/// Conditions, the expression compiler and primary keys.
pub mod common;

/// Settings of a [`Db`].
pub mod config;

/// Deadlines and cancellation.
pub mod context;

/// Pagination cursors.
pub mod cursor;

/// The [`Db`] entry point.
pub mod db;

/// Attribute envelope encryption.
pub mod encryption;

/// Errors.
pub mod error;

/// Models and their metadata.
pub mod model;

/// Access path selection.
pub mod planner;

/// Reads: lookups, queries, scans and batch reads.
pub mod read;

/// Backoff of batch retries.
pub mod retry;

/// The store seam.
pub mod store;

/// Writes: puts, updates, deletes, batch writes and transactions.
pub mod write;

pub use db::{Db, DbBuilder};
pub use error::{Error, Result};
pub use model::Model;
