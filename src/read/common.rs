use crate::{
    codec::Item,
    common::expression::{CompiledExpression, non_empty},
    db::Db,
    error::Result,
    model::{Model, ModelMetadata},
    store::Store,
};

use aws_sdk_dynamodb::types;
use std::collections;

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct SingleReadInput {
    pub(crate) consistent_read: Option<bool>,
    pub(crate) expression_attribute_names: Option<collections::HashMap<String, String>>,
    pub(crate) projection_expression: Option<String>,
    pub(crate) table_name: String,
}

impl SingleReadInput {
    pub(crate) fn new(
        table_name: &str,
        compiled: CompiledExpression,
        consistent_read: Option<bool>,
    ) -> Self {
        Self {
            consistent_read,
            expression_attribute_names: compiled.projection.as_ref().and(non_empty(compiled.names)),
            projection_expression: compiled.projection,
            table_name: table_name.to_string(),
        }
    }
}

/// Parameters shared by queries and scans. Key conditions and the scan
/// direction are set on the query builder itself.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct MultipleReadInput {
    pub(crate) consistent_read: Option<bool>,
    pub(crate) exclusive_start_key: Option<collections::HashMap<String, types::AttributeValue>>,
    pub(crate) expression_attribute_names: Option<collections::HashMap<String, String>>,
    pub(crate) expression_attribute_values:
        Option<collections::HashMap<String, types::AttributeValue>>,
    pub(crate) filter_expression: Option<String>,
    pub(crate) index_name: Option<String>,
    pub(crate) limit: Option<i32>,
    pub(crate) projection_expression: Option<String>,
    pub(crate) select: Option<types::Select>,
    pub(crate) table_name: String,
}

impl MultipleReadInput {
    /// Read parameters of `compiled`; its key condition is left to the caller.
    pub(crate) fn new(
        table_name: &str,
        index_name: Option<String>,
        compiled: &CompiledExpression,
        consistent_read: Option<bool>,
    ) -> Self {
        Self {
            consistent_read,
            exclusive_start_key: None,
            expression_attribute_names: non_empty(compiled.names.clone()),
            expression_attribute_values: non_empty(compiled.values.clone()),
            filter_expression: compiled.filter.clone(),
            index_name,
            limit: None,
            projection_expression: compiled.projection.clone(),
            select: None,
            table_name: table_name.to_string(),
        }
    }

    /// Copy of the parameters for one page.
    pub(crate) fn page(
        &self,
        exclusive_start_key: Option<Item>,
        limit: Option<usize>,
        select: Option<types::Select>,
    ) -> Self {
        Self {
            exclusive_start_key,
            limit: limit.map(|limit| i32::try_from(limit).unwrap_or(i32::MAX)),
            select,
            ..self.clone()
        }
    }
}

/// Decodes raw items into models, in order.
pub(crate) async fn decode_items<M: Model, S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    items: Vec<Item>,
) -> Result<Vec<M>> {
    let encryptor = db.encryptor(metadata)?;
    let mut models = Vec::with_capacity(items.len());
    for item in items {
        models.push(db.decode(metadata, encryptor, item).await?);
    }
    Ok(models)
}

/// apply common single read operation settings to a builder
#[macro_export]
macro_rules! apply_single_read_operation {
    ($builder:expr, $single_read_operation:expr) => {
        $builder
            .set_consistent_read($single_read_operation.consistent_read)
            .set_expression_attribute_names($single_read_operation.expression_attribute_names)
            .set_projection_expression($single_read_operation.projection_expression)
            .table_name($single_read_operation.table_name)
    };
}

/// apply common multiple read operation settings to a builder
#[macro_export]
macro_rules! apply_multiple_read_operation {
    ($builder:expr, $multiple_read_operation:expr) => {
        $builder
            .set_consistent_read($multiple_read_operation.consistent_read)
            .set_exclusive_start_key($multiple_read_operation.exclusive_start_key)
            .set_expression_attribute_names($multiple_read_operation.expression_attribute_names)
            .set_expression_attribute_values($multiple_read_operation.expression_attribute_values)
            .set_filter_expression($multiple_read_operation.filter_expression)
            .set_index_name($multiple_read_operation.index_name)
            .set_limit($multiple_read_operation.limit)
            .set_projection_expression($multiple_read_operation.projection_expression)
            .set_select($multiple_read_operation.select)
            .table_name($multiple_read_operation.table_name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        condition::{Condition, ConditionNode, FieldCondition, LogicalOperator},
        expression::ExpressionBuilder,
    };

    use aws_sdk_dynamodb::types::AttributeValue;
    use rstest::rstest;

    fn compiled() -> CompiledExpression {
        let mut builder = ExpressionBuilder::new();
        let condition = FieldCondition::new("status", Condition::Equals(AttributeValue::S("open".to_string())));
        builder
            .add_filter(LogicalOperator::And, ConditionNode::Leaf(condition))
            .unwrap();
        builder.add_projection(&["id", "status"]).unwrap();
        builder.build()
    }

    #[test]
    fn test_multiple_read_input() {
        let input = MultipleReadInput::new("orders", Some("by-status".to_string()), &compiled(), Some(true));
        assert_eq!(input.filter_expression.as_deref(), Some("#n0 = :v0"));
        assert_eq!(input.projection_expression.as_deref(), Some("#n1, #n0"));
        assert_eq!(input.index_name.as_deref(), Some("by-status"));
        assert_eq!(input.expression_attribute_names.map(|names| names.len()), Some(2));
        assert_eq!(input.consistent_read, Some(true));
    }

    #[rstest]
    #[case::unbounded(None, None)]
    #[case::bounded(Some(10), Some(10))]
    #[case::clamped(Some(usize::MAX), Some(i32::MAX))]
    fn test_page(#[case] limit: Option<usize>, #[case] expected: Option<i32>) {
        let input = MultipleReadInput::new("orders", None, &compiled(), None);
        let page = input.page(None, limit, Some(types::Select::Count));
        assert_eq!(page.limit, expected);
        assert_eq!(page.select, Some(types::Select::Count));
        assert_eq!(page.filter_expression, input.filter_expression);
    }

    #[test]
    fn test_single_read_input_without_projection() {
        let input = SingleReadInput::new("orders", CompiledExpression::default(), None);
        assert!(input.expression_attribute_names.is_none());
        assert!(input.projection_expression.is_none());
    }
}
