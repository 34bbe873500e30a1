//! Building blocks shared by read and write operations: conditions, the
//! expression compiler and primary key values.

/// Fluent conditions and condition groups.
pub mod condition;

/// Compilation of conditions and updates into store expressions.
pub mod expression;

/// Primary key values.
pub mod key;
