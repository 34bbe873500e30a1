//! Choice of the access path of a read.
//!
//! Conditions are classified against the key schema of the table or of the
//! requested index. A condition is key-eligible when it names a key attribute
//! of that schema with an operator the key role accepts; the first eligible
//! condition of each key attribute becomes a key condition, everything else is
//! filtered after reading. Filters narrow results but do not lower read cost.

use crate::{
    common::condition::{Condition, FieldCondition},
    error::{KeyRole, Result},
    model::ModelMetadata,
};

/// How a read reaches the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccessPath {
    /// Direct lookup by full primary key.
    GetItem,
    /// Key condition query on the table or an index.
    Query {
        /// Index queried, if any.
        index: Option<String>,
    },
    /// Full scan of the table or an index.
    Scan {
        /// Index scanned, if any.
        index: Option<String>,
    },
}

/// What the planner needs to know about a read.
#[derive(Clone, Debug, Default)]
pub struct PlanInput<'a> {
    /// Conditions given to `where_`, in call order.
    pub conditions: Vec<FieldCondition>,
    /// Index requested, if any.
    pub index: Option<&'a str>,
    /// Whether explicit filters were given.
    pub has_filters: bool,
    /// Whether a limit, cursor, ordering or projection was given.
    pub has_modifiers: bool,
}

/// Result of planning a read.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// Chosen access path.
    pub access: AccessPath,
    /// Key conditions with the role of their attribute, partition key first.
    pub key_conditions: Vec<(KeyRole, FieldCondition)>,
    /// Conditions evaluated as filters, in call order.
    pub filters: Vec<FieldCondition>,
}

/// Plans a read of the model described by `metadata`.
///
/// Fails only when the index is unknown. A read whose conditions do not bind
/// the partition key of the target schema falls back to a scan.
pub fn plan(metadata: &ModelMetadata, input: PlanInput<'_>) -> Result<Plan> {
    let schema = metadata.key_schema(input.index)?;
    let mut partition = None;
    let mut sort = None;
    let mut filters = Vec::new();
    for (position, condition) in input.conditions.into_iter().enumerate() {
        let role = schema
            .role_of(&condition.name)
            .filter(|role| condition.condition.is_key_operator(*role));
        let slot = match role {
            Some(KeyRole::Partition) => &mut partition,
            Some(KeyRole::Sort) => &mut sort,
            None => {
                filters.push((position, condition));
                continue;
            }
        };
        if slot.is_none() {
            *slot = Some((position, condition));
        } else {
            filters.push((position, condition));
        }
    }

    let Some((_, partition)) = partition else {
        let mut all: Vec<_> = sort.into_iter().chain(filters).collect();
        all.sort_by_key(|(position, _)| *position);
        #[cfg(feature = "tracing")]
        tracing::debug!(model = metadata.name(), index = ?input.index, "planned scan");
        return Ok(Plan {
            access: AccessPath::Scan {
                index: input.index.map(str::to_string),
            },
            key_conditions: Vec::new(),
            filters: all.into_iter().map(|(_, condition)| condition).collect(),
        });
    };
    let sort = sort.map(|(_, condition)| condition);
    let filters: Vec<_> = filters.into_iter().map(|(_, condition)| condition).collect();

    let sort_bound = match (&sort, &schema.sort_key) {
        (_, None) => true,
        (Some(condition), Some(_)) => matches!(condition.condition, Condition::Equals(_)),
        (None, Some(_)) => false,
    };
    let access = if input.index.is_none()
        && sort_bound
        && filters.is_empty()
        && !input.has_filters
        && !input.has_modifiers
    {
        AccessPath::GetItem
    } else {
        AccessPath::Query {
            index: input.index.map(str::to_string),
        }
    };
    #[cfg(feature = "tracing")]
    tracing::debug!(model = metadata.name(), index = ?input.index, access = ?access, "planned read");
    let mut key_conditions = vec![(KeyRole::Partition, partition)];
    key_conditions.extend(sort.map(|condition| (KeyRole::Sort, condition)));
    Ok(Plan {
        access,
        key_conditions,
        filters,
    })
}
