//! Compilation of conditions, projections and updates into store expressions.
//!
//! Every attribute name is replaced by a `#nN` placeholder and every value by
//! a `:vN` placeholder, so reserved words never need to be tracked. Name
//! placeholders are reused when the same attribute appears again; value
//! placeholders are always fresh. Numbering follows first use.

use crate::{
    codec::ItemCodec,
    common::condition::{
        Condition, ConditionGroup, ConditionNode, FieldCondition, LogicalOperator, RawCondition,
    },
    error::{Error, KeyRole, Result},
    write::update_item::SetInput,
};

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections;

/// Expressions and placeholder maps produced by one compile pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledExpression {
    /// Key condition of a query.
    pub key_condition: Option<String>,
    /// Filter applied after reading.
    pub filter: Option<String>,
    /// Guard of a write.
    pub condition: Option<String>,
    /// Update clauses, in SET, ADD, REMOVE, DELETE order.
    pub update: Option<String>,
    /// Projected attribute paths.
    pub projection: Option<String>,
    /// Name placeholders.
    pub names: collections::HashMap<String, String>,
    /// Value placeholders.
    pub values: collections::HashMap<String, AttributeValue>,
}

/// `None` for an empty map, as the store rejects empty placeholder maps.
pub(crate) fn non_empty<K, V>(map: collections::HashMap<K, V>) -> Option<collections::HashMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

fn join(clauses: Vec<(LogicalOperator, String)>) -> Option<String> {
    clauses
        .into_iter()
        .fold(None, |expression, (operator, clause)| match expression {
            None => Some(clause),
            Some(expression) => Some(format!("{expression}{}{clause}", &*operator)),
        })
}

/// `group` as a single node: its only element, or the whole group.
fn single_node(group: ConditionGroup) -> Result<Option<ConditionNode>> {
    group.check()?;
    let mut nodes = group.nodes;
    if nodes.len() > 1 {
        return Ok(Some(ConditionNode::Group(ConditionGroup { nodes, error: None })));
    }
    Ok(nodes.pop().map(|(_, node)| node))
}

/// Longest attribute path accepted, in bytes.
const MAX_PATH_LENGTH: usize = 255;

/// Deepest attribute path accepted, in segments.
const MAX_PATH_DEPTH: usize = 32;

/// Splits a path into its segments, each a name and its literal `[i]` suffix.
fn parse_path(path: &str) -> Result<Vec<(&str, &str)>> {
    let invalid = || Error::InvalidExpression(format!("invalid attribute path `{path}`"));
    if path.len() > MAX_PATH_LENGTH || path.chars().any(char::is_control) {
        return Err(Error::InvalidExpression(
            "attribute path is too long or contains control characters".to_string(),
        ));
    }
    if path.split('.').count() > MAX_PATH_DEPTH {
        return Err(Error::InvalidExpression(format!(
            "attribute path is nested deeper than {MAX_PATH_DEPTH} levels"
        )));
    }
    path.split('.')
        .map(|segment| {
            let (name, suffix) = segment.split_at(segment.find('[').unwrap_or(segment.len()));
            if name.is_empty() {
                return Err(invalid());
            }
            let mut rest = suffix;
            while !rest.is_empty() {
                let (index, tail) = rest
                    .strip_prefix('[')
                    .and_then(|rest| rest.split_once(']'))
                    .ok_or_else(invalid)?;
                if index.is_empty() || !index.bytes().all(|byte| byte.is_ascii_digit()) {
                    return Err(invalid());
                }
                rest = tail;
            }
            Ok((name, suffix))
        })
        .collect()
}

/// Whether `placeholder` has the form of a generated `#nN` or `:vN` one.
fn is_generated_placeholder(placeholder: &str) -> bool {
    let digits = placeholder
        .strip_prefix("#n")
        .or_else(|| placeholder.strip_prefix(":v"));
    digits.is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()))
}

/// Checks a caller-chosen placeholder: its sigil, its name and that it is
/// neither generated nor already bound.
fn check_placeholder<V>(
    placeholder: &str,
    sigil: char,
    bound: &collections::HashMap<String, V>,
) -> Result<()> {
    let name = placeholder.strip_prefix(sigil).unwrap_or_default();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::InvalidExpression(format!(
            "`{placeholder}` is not a valid placeholder, expected `{sigil}` and a name"
        )));
    }
    if is_generated_placeholder(placeholder) {
        return Err(Error::InvalidExpression(format!(
            "placeholder `{placeholder}` is reserved"
        )));
    }
    if bound.contains_key(placeholder) {
        return Err(Error::InvalidExpression(format!(
            "duplicate placeholder `{placeholder}` in condition expression"
        )));
    }
    Ok(())
}

fn placeholder_index(placeholder: &str) -> usize {
    placeholder
        .trim_start_matches(['#', ':', 'n', 'v'])
        .parse()
        .unwrap_or(usize::MAX)
}

/// Replaces every `#..`/`:..` token of `expression` found in the maps.
fn rewrite(
    expression: &str,
    names: &collections::HashMap<String, String>,
    values: &collections::HashMap<String, String>,
) -> String {
    let mut rewritten = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(start) = rest.find(['#', ':']) {
        rewritten.push_str(&rest[..start]);
        let token = &rest[start..];
        let end = token[1..]
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .map_or(token.len(), |end| end + 1);
        let (token, tail) = token.split_at(end);
        let replacement = if token.starts_with('#') {
            names.get(token)
        } else {
            values.get(token)
        };
        rewritten.push_str(replacement.map_or(token, String::as_str));
        rest = tail;
    }
    rewritten.push_str(rest);
    rewritten
}

/// Builder of one [`CompiledExpression`].
///
/// With an [`ItemCodec`], top-level names are mapped to their attribute
/// names, values go through the field's converter and set encoding, and
/// encrypted fields are refused in comparisons.
///
/// ```rust
/// use dynamodb_mapper::common::{
///     condition::{Condition, ConditionNode, FieldCondition, LogicalOperator},
///     expression::ExpressionBuilder,
/// };
///
/// let mut builder = ExpressionBuilder::new();
/// let condition = FieldCondition::new("status", Condition::Equals("active"))
///     .into_attribute_values()
///     .unwrap();
/// builder
///     .add_filter(LogicalOperator::And, ConditionNode::Leaf(condition))
///     .unwrap();
/// let compiled = builder.build();
/// assert_eq!(compiled.filter.as_deref(), Some("#n0 = :v0"));
/// ```
#[derive(Debug, Default)]
pub struct ExpressionBuilder<'a> {
    codec: Option<ItemCodec<'a>>,
    names: collections::HashMap<String, String>,
    name_placeholders: collections::HashMap<String, String>,
    values: collections::HashMap<String, AttributeValue>,
    key_condition: Vec<String>,
    filter: Vec<(LogicalOperator, String)>,
    condition: Vec<(LogicalOperator, String)>,
    set: Vec<String>,
    add: Vec<String>,
    remove: Vec<String>,
    delete: Vec<String>,
    projection: Vec<String>,
}

impl<'a> ExpressionBuilder<'a> {
    /// A builder for plain attribute names and values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder resolving names and values through `codec`.
    pub fn for_model(codec: ItemCodec<'a>) -> Self {
        Self {
            codec: Some(codec),
            ..Default::default()
        }
    }

    fn is_encrypted(&self, path: &str) -> bool {
        self.codec.is_some_and(|codec| codec.is_encrypted(path))
    }

    fn name(&mut self, attribute: &str) -> String {
        if let Some(placeholder) = self.name_placeholders.get(attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        self.name_placeholders
            .insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    fn next_value_placeholder(&self) -> String {
        format!(":v{}", self.values.len())
    }

    /// Placeholder form of an attribute path such as `a.b[2]`.
    pub fn path(&mut self, path: &str) -> Result<String> {
        let wire_path = match &self.codec {
            Some(codec) => codec.wire_path(path),
            None => path.to_string(),
        };
        let segments = parse_path(&wire_path)?;
        let segments: Vec<_> = segments
            .into_iter()
            .map(|(name, suffix)| format!("{}{suffix}", self.name(name)))
            .collect();
        Ok(segments.join("."))
    }

    /// Placeholder of a value, used as given.
    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = self.next_value_placeholder();
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Placeholder of a value compared against or assigned to `path`, if any.
    fn operand(&mut self, path: Option<&str>, value: AttributeValue) -> Result<String> {
        let value = match (path, &self.codec) {
            (Some(path), Some(codec)) => codec.encode_expression_value(path, value)?,
            _ => value,
        };
        Ok(self.value(value))
    }

    fn render(&mut self, path: &str, condition: Condition<AttributeValue>) -> Result<String> {
        if self.is_encrypted(path) && !condition.is_existence_check() {
            return Err(Error::EncryptedFieldNotQueryable(path.to_string()));
        }
        let target = self.path(path)?;
        self.render_comparison(&target, Some(path), condition)
    }

    fn render_comparison(
        &mut self,
        target: &str,
        path: Option<&str>,
        condition: Condition<AttributeValue>,
    ) -> Result<String> {
        let expression = match condition {
            Condition::BeginsWith(prefix) => {
                let value = self.value(AttributeValue::S(prefix));
                format!("begins_with({target}, {value})")
            }
            Condition::Between(low, high) => {
                let low = self.operand(path, low)?;
                let high = self.operand(path, high)?;
                format!("{target} BETWEEN {low} AND {high}")
            }
            Condition::Contains(value) => {
                let value = self.value(value);
                format!("contains({target}, {value})")
            }
            Condition::Equals(value) => format!("{target} = {}", self.operand(path, value)?),
            Condition::Exists => format!("attribute_exists({target})"),
            Condition::GreaterThan(value) => {
                format!("{target} > {}", self.operand(path, value)?)
            }
            Condition::GreaterThanOrEqual(value) => {
                format!("{target} >= {}", self.operand(path, value)?)
            }
            Condition::In(values) => {
                if values.is_empty() {
                    return Err(Error::InvalidExpression(format!(
                        "IN on `{target}` needs at least one value"
                    )));
                }
                let values = values
                    .into_iter()
                    .map(|value| self.operand(path, value))
                    .collect::<Result<Vec<_>>>()?;
                format!("{target} IN ({})", values.join(", "))
            }
            Condition::LessThan(value) => format!("{target} < {}", self.operand(path, value)?),
            Condition::LessThanOrEqual(value) => {
                format!("{target} <= {}", self.operand(path, value)?)
            }
            Condition::NotContains(value) => {
                let value = self.value(value);
                format!("NOT contains({target}, {value})")
            }
            Condition::NotEqual(value) => format!("{target} <> {}", self.operand(path, value)?),
            Condition::NotExists => format!("attribute_not_exists({target})"),
            Condition::Size(inner) => {
                if matches!(
                    *inner,
                    Condition::Size(_)
                        | Condition::Exists
                        | Condition::NotExists
                        | Condition::BeginsWith(_)
                        | Condition::Contains(_)
                        | Condition::NotContains(_)
                ) {
                    return Err(Error::InvalidExpression(format!(
                        "size() only supports comparisons, found {}",
                        inner.operator()
                    )));
                }
                let size = format!("size({target})");
                self.render_comparison(&size, None, *inner)?
            }
        };
        Ok(expression)
    }

    fn render_node(&mut self, node: ConditionNode) -> Result<Option<String>> {
        match node {
            ConditionNode::Leaf(FieldCondition { name, condition }) => {
                self.render(&name, condition).map(Some)
            }
            ConditionNode::Group(group) => {
                group.check()?;
                let mut child = ExpressionBuilder {
                    codec: self.codec,
                    ..Default::default()
                };
                for (operator, node) in group.nodes {
                    child.add_filter(operator, node)?;
                }
                Ok(self.absorb(child.build()))
            }
        }
    }

    /// Takes over the placeholders of `compiled` and returns its filter,
    /// renumbered and parenthesized.
    fn absorb(&mut self, compiled: CompiledExpression) -> Option<String> {
        let filter = compiled.filter?;
        let mut names: Vec<_> = compiled.names.into_iter().collect();
        names.sort_by_key(|(placeholder, _)| placeholder_index(placeholder));
        let names: collections::HashMap<_, _> = names
            .into_iter()
            .map(|(placeholder, attribute)| (placeholder, self.name(&attribute)))
            .collect();
        let mut values: Vec<_> = compiled.values.into_iter().collect();
        values.sort_by_key(|(placeholder, _)| placeholder_index(placeholder));
        let values: collections::HashMap<_, _> = values
            .into_iter()
            .map(|(placeholder, value)| (placeholder, self.value(value)))
            .collect();
        Some(format!("({})", rewrite(&filter, &names, &values)))
    }

    /// Adds a key condition, checking the operator against the key role.
    pub fn add_key_condition(&mut self, role: KeyRole, condition: FieldCondition) -> Result<()> {
        if !condition.condition.is_key_operator(role) {
            return Err(Error::InvalidKeyOperator {
                operator: condition.condition.operator(),
                field: condition.name,
                role,
            });
        }
        let expression = self.render(&condition.name, condition.condition)?;
        self.key_condition.push(expression);
        Ok(())
    }

    /// Adds a filter clause joined with `operator`.
    pub fn add_filter(&mut self, operator: LogicalOperator, node: ConditionNode) -> Result<()> {
        if let Some(expression) = self.render_node(node)? {
            self.filter.push((operator, expression));
        }
        Ok(())
    }

    /// Merges the filter of an independently compiled group, renumbering its
    /// placeholders into this pass.
    pub fn merge_group(&mut self, operator: LogicalOperator, compiled: CompiledExpression) {
        if let Some(expression) = self.absorb(compiled) {
            self.filter.push((operator, expression));
        }
    }

    /// Adds a write guard clause joined with `operator`.
    pub fn add_write_condition(
        &mut self,
        operator: LogicalOperator,
        node: ConditionNode,
    ) -> Result<()> {
        if let Some(expression) = self.render_node(node)? {
            self.condition.push((operator, expression));
        }
        Ok(())
    }

    /// ANDs a caller-written guard onto the write condition.
    ///
    /// Its placeholders join the maps of this pass; field names are mapped
    /// to attribute names.
    pub fn add_raw_condition(&mut self, raw: RawCondition) -> Result<()> {
        if let Some(err) = raw.error {
            return Err(Error::InvalidExpression(err));
        }
        let expression = raw.expression.trim();
        if expression.is_empty() {
            return Err(Error::InvalidExpression(
                "condition expression cannot be empty".to_string(),
            ));
        }
        for (placeholder, name) in raw.names {
            check_placeholder(&placeholder, '#', &self.names)?;
            let attribute = match &self.codec {
                Some(codec) => codec.metadata().wire_name(&name).to_string(),
                None => name,
            };
            self.names.insert(placeholder, attribute);
        }
        for (placeholder, value) in raw.values {
            check_placeholder(&placeholder, ':', &self.values)?;
            self.values.insert(placeholder, value);
        }
        self.condition
            .push((LogicalOperator::And, format!("({expression})")));
        Ok(())
    }

    /// Adds `group` as one AND-joined filter clause, parenthesized when it
    /// has several elements.
    pub(crate) fn add_filter_group(&mut self, group: ConditionGroup) -> Result<()> {
        match single_node(group)? {
            Some(node) => self.add_filter(LogicalOperator::And, node),
            None => Ok(()),
        }
    }

    /// Adds `group` as one AND-joined write guard clause.
    pub(crate) fn add_write_condition_group(&mut self, group: ConditionGroup) -> Result<()> {
        match single_node(group)? {
            Some(node) => self.add_write_condition(LogicalOperator::And, node),
            None => Ok(()),
        }
    }

    /// Adds attribute paths to the projection.
    pub fn add_projection<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<()> {
        for path in paths {
            let path = self.path(path.as_ref())?;
            self.projection.push(path);
        }
        Ok(())
    }

    /// Adds a SET clause. Assigned values go through the field codec.
    pub fn set(&mut self, path: &str, input: SetInput<AttributeValue>) -> Result<()> {
        if self.is_encrypted(path) {
            return Err(Error::EncryptedFieldNotUpdatable {
                field: path.to_string(),
                operation: input.operation(),
            });
        }
        let input = match input {
            SetInput::Assign(value) => SetInput::Assign(self.encode(path, value)?),
            SetInput::IfNotExists(value) => SetInput::IfNotExists(self.encode(path, value)?),
            other => other,
        };
        self.set_encoded(path, input)
    }

    /// Adds a SET clause with a value already in stored form.
    pub(crate) fn set_encoded(&mut self, path: &str, input: SetInput<AttributeValue>) -> Result<()> {
        let target = self.path(path)?;
        let placeholder = self.next_value_placeholder();
        let (value, expression) = input.get_set_expression(&target, &placeholder);
        self.values.insert(placeholder, value);
        self.set.push(expression);
        Ok(())
    }

    fn encode(&self, path: &str, value: AttributeValue) -> Result<AttributeValue> {
        match &self.codec {
            Some(codec) => codec.encode_expression_value(path, value),
            None => Ok(value),
        }
    }

    fn add_or_delete(&mut self, path: &str, value: AttributeValue, operation: &'static str) -> Result<()> {
        if self.is_encrypted(path) {
            return Err(Error::EncryptedFieldNotUpdatable {
                field: path.to_string(),
                operation,
            });
        }
        let value = self.encode(path, value)?;
        let target = self.path(path)?;
        let value = self.value(value);
        let clause = format!("{target} {value}");
        match operation {
            "ADD" => self.add.push(clause),
            _ => self.delete.push(clause),
        }
        Ok(())
    }

    /// Adds an ADD clause: numeric increment or set union.
    pub fn add(&mut self, path: &str, value: AttributeValue) -> Result<()> {
        self.add_or_delete(path, value, "ADD")
    }

    /// Adds a DELETE clause: set subtraction.
    pub fn delete(&mut self, path: &str, value: AttributeValue) -> Result<()> {
        self.add_or_delete(path, value, "DELETE")
    }

    /// Adds a REMOVE clause.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let target = self.path(path)?;
        self.remove.push(target);
        Ok(())
    }

    /// Whether any update clause was added.
    pub fn has_update(&self) -> bool {
        !(self.set.is_empty() && self.add.is_empty() && self.remove.is_empty() && self.delete.is_empty())
    }

    /// Finishes the pass.
    pub fn build(self) -> CompiledExpression {
        let mut update = Vec::new();
        for (keyword, clauses) in [
            ("SET", self.set),
            ("ADD", self.add),
            ("REMOVE", self.remove),
            ("DELETE", self.delete),
        ] {
            if !clauses.is_empty() {
                update.push(format!("{keyword} {}", clauses.join(", ")));
            }
        }
        CompiledExpression {
            key_condition: (!self.key_condition.is_empty())
                .then(|| self.key_condition.join(" AND ")),
            filter: join(self.filter),
            condition: join(self.condition),
            update: (!update.is_empty()).then(|| update.join(" ")),
            projection: (!self.projection.is_empty()).then(|| self.projection.join(", ")),
            names: self.names,
            values: self.values,
        }
    }
}
