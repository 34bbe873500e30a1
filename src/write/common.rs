use crate::{
    codec::{Item, ItemCodec},
    common::{
        condition::{
            Condition, ConditionGroup, ConditionNode, FieldCondition, LogicalOperator, RawCondition,
        },
        expression::{CompiledExpression, ExpressionBuilder, non_empty},
    },
    context::RequestContext,
    error::Result,
    model::ModelMetadata,
};

use aws_sdk_dynamodb::types;
use serde::Serialize;
use std::collections;

/// Processed write parameters shared by single writes and transaction items.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct WriteInput {
    pub(crate) condition_expression: Option<String>,
    pub(crate) expression_attribute_names: Option<collections::HashMap<String, String>>,
    pub(crate) expression_attribute_values:
        Option<collections::HashMap<String, types::AttributeValue>>,
    pub(crate) table_name: String,
}

impl WriteInput {
    /// Write parameters of `compiled` against `table_name`. The update
    /// expression, if any, must have been taken out first.
    pub(crate) fn new(table_name: &str, compiled: CompiledExpression) -> Self {
        Self {
            condition_expression: compiled.condition,
            expression_attribute_names: non_empty(compiled.names),
            expression_attribute_values: non_empty(compiled.values),
            table_name: table_name.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Existence {
    MustExist,
    MustNotExist,
}

/// Caller-supplied guards and request context of a write.
///
/// ```rust
/// use dynamodb_mapper::{common::condition::Condition, write::common::WriteOptions};
/// use std::time::Duration;
/// use dynamodb_mapper::context::RequestContext;
///
/// let options = WriteOptions::new()
///     .if_exists()
///     .condition("status", Condition::Equals("draft"))
///     .with_context(RequestContext::new().with_timeout(Duration::from_secs(1)));
/// ```
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    conditions: ConditionGroup,
    raw_conditions: Vec<RawCondition>,
    existence: Option<Existence>,
    context: RequestContext,
}

impl WriteOptions {
    /// No guard, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a guard joined with AND.
    pub fn condition<T: Serialize>(mut self, name: impl Into<String>, condition: Condition<T>) -> Self {
        self.conditions = self.conditions.and(name, condition);
        self
    }

    /// Adds a guard joined with OR.
    pub fn or_condition<T: Serialize>(
        mut self,
        name: impl Into<String>,
        condition: Condition<T>,
    ) -> Self {
        self.conditions = self.conditions.or(name, condition);
        self
    }

    /// Adds a nested guard group joined with AND.
    pub fn condition_group(mut self, group: ConditionGroup) -> Self {
        self.conditions = self.conditions.and_group(group);
        self
    }

    /// Adds a guard written as a condition expression, joined with AND.
    pub fn condition_expression(mut self, raw: RawCondition) -> Self {
        self.raw_conditions.push(raw);
        self
    }

    /// Requires the item to exist already.
    pub fn if_exists(mut self) -> Self {
        self.existence = Some(Existence::MustExist);
        self
    }

    /// Requires the item not to exist yet.
    pub fn if_not_exists(mut self) -> Self {
        self.existence = Some(Existence::MustNotExist);
        self
    }

    /// Runs the write under `context`.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Adds the guards to `builder` and hands back the request context.
    ///
    /// Caller guards form one clause, so guards added afterwards are ANDed
    /// with all of them.
    pub(crate) fn apply(
        self,
        builder: &mut ExpressionBuilder<'_>,
        metadata: &ModelMetadata,
    ) -> Result<RequestContext> {
        builder.add_write_condition_group(self.conditions)?;
        for raw in self.raw_conditions {
            builder.add_raw_condition(raw)?;
        }
        if let Some(existence) = self.existence {
            let condition = match existence {
                Existence::MustExist => Condition::Exists,
                Existence::MustNotExist => Condition::NotExists,
            };
            add_guard(builder, &metadata.primary_key().partition_key, condition)?;
        }
        Ok(self.context)
    }
}

/// Wire key of a logical attribute map.
pub(crate) fn key_of_logical(codec: &ItemCodec<'_>, logical: &Item) -> Result<Item> {
    let key: Item = codec
        .metadata()
        .primary_key()
        .fields()
        .filter_map(|name| Some((name.to_string(), logical.get(name)?.clone())))
        .collect();
    codec.encode_attributes(key)
}

/// ANDs `name condition` onto the write guard of `builder`.
pub(crate) fn add_guard(
    builder: &mut ExpressionBuilder<'_>,
    name: &str,
    condition: Condition<types::AttributeValue>,
) -> Result<()> {
    let node = ConditionNode::Leaf(FieldCondition::new(name, condition));
    builder.add_write_condition(LogicalOperator::And, node)
}

/// ANDs `version = current` onto the write guard when `current` is non-zero.
pub(crate) fn add_version_guard(
    builder: &mut ExpressionBuilder<'_>,
    metadata: &ModelMetadata,
    current: i64,
) -> Result<()> {
    match metadata.version_field() {
        Some(version) if current != 0 => add_guard(
            builder,
            version,
            Condition::Equals(types::AttributeValue::N(current.to_string())),
        ),
        _ => Ok(()),
    }
}

/// apply common write operation settings to a builder
#[macro_export]
macro_rules! apply_write_operation {
    ($builder:expr, $write_operation:expr) => {
        $builder
            .set_condition_expression($write_operation.condition_expression)
            .set_expression_attribute_names($write_operation.expression_attribute_names)
            .set_expression_attribute_values($write_operation.expression_attribute_values)
            .table_name($write_operation.table_name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::converter::ConverterRegistry,
        model::{ModelSchema, field::Field},
    };

    use rstest::rstest;

    fn metadata() -> ModelMetadata {
        let schema = ModelSchema::new("posts")
            .field(Field::new("id").partition_key())
            .field(Field::new("revision").version());
        ModelMetadata::from_schema("Post", schema, None).unwrap()
    }

    #[rstest]
    #[case::none(WriteOptions::new(), 0, None)]
    #[case::if_exists(WriteOptions::new().if_exists(), 0, Some("attribute_exists(#n0)"))]
    #[case::if_not_exists(WriteOptions::new().if_not_exists(), 0, Some("attribute_not_exists(#n0)"))]
    #[case::version(WriteOptions::new(), 3, Some("#n0 = :v0"))]
    #[case::or_conditions_are_grouped(
        WriteOptions::new()
            .condition("status", Condition::Equals("draft"))
            .or_condition("status", Condition::Equals("review")),
        2,
        Some("(#n0 = :v0 OR #n0 = :v1) AND #n1 = :v2")
    )]
    #[case::single_condition(
        WriteOptions::new().if_exists().condition("status", Condition::<()>::NotExists),
        0,
        Some("attribute_not_exists(#n0) AND attribute_exists(#n1)")
    )]
    fn test_apply(
        #[case] options: WriteOptions,
        #[case] version: i64,
        #[case] expected: Option<&str>,
    ) {
        let metadata = metadata();
        let converters = ConverterRegistry::default();
        let mut builder = ExpressionBuilder::for_model(ItemCodec::new(&metadata, &converters));
        options.apply(&mut builder, &metadata).unwrap();
        add_version_guard(&mut builder, &metadata, version).unwrap();
        let compiled = builder.build();
        assert_eq!(compiled.condition.as_deref(), expected);
    }

    #[test]
    fn test_write_input() {
        let mut builder = ExpressionBuilder::new();
        add_guard(&mut builder, "id", Condition::NotExists).unwrap();
        let input = WriteInput::new("posts", builder.build());
        assert_eq!(input.table_name, "posts");
        assert_eq!(
            input.condition_expression.as_deref(),
            Some("attribute_not_exists(#n0)")
        );
        assert!(input.expression_attribute_values.is_none());
    }

    #[test]
    fn test_key_of_logical() {
        let metadata = metadata();
        let converters = ConverterRegistry::default();
        let codec = ItemCodec::new(&metadata, &converters);
        let logical = Item::from([
            ("id".to_string(), types::AttributeValue::S("p".to_string())),
            ("body".to_string(), types::AttributeValue::S("text".to_string())),
        ]);
        let key = key_of_logical(&codec, &logical).unwrap();
        assert_eq!(
            key,
            Item::from([("id".to_string(), types::AttributeValue::S("p".to_string()))])
        );
        assert!(key_of_logical(&codec, &Item::new()).is_err());
    }
}
