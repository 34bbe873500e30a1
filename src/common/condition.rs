use crate::error::{Error, KeyRole, Result};

use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;
use serde_dynamo::to_attribute_value;
use std::ops;

/// Logical operator for combining conditions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogicalOperator {
    /// Logical AND - all conditions must be true.
    And,
    /// Logical OR - at least one condition must be true.
    Or,
}

impl ops::Deref for LogicalOperator {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// Comparison applied to one attribute.
///
/// ```rust
/// use dynamodb_mapper::common::condition::Condition;
///
/// let adult = Condition::GreaterThanOrEqual(18);
/// let named: Condition<String> = Condition::Exists;
/// let short = Condition::Size(Box::new(Condition::LessThan(3)));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum Condition<T> {
    /// Attribute starts with a string prefix.
    BeginsWith(String),
    /// Attribute lies between two values, both inclusive.
    Between(T, T),
    /// String attribute contains a substring, or set/list contains a member.
    Contains(T),
    /// Attribute equals a value.
    Equals(T),
    /// Attribute is present.
    Exists,
    /// Attribute is greater than a value.
    GreaterThan(T),
    /// Attribute is greater than or equal to a value.
    GreaterThanOrEqual(T),
    /// Attribute equals one of the values.
    In(Vec<T>),
    /// Attribute is less than a value.
    LessThan(T),
    /// Attribute is less than or equal to a value.
    LessThanOrEqual(T),
    /// Negation of [`Condition::Contains`].
    NotContains(T),
    /// Attribute differs from a value.
    NotEqual(T),
    /// Attribute is absent.
    NotExists,
    /// Comparison applied to the size of the attribute.
    Size(Box<Condition<T>>),
}

impl<T> Condition<T> {
    /// Operator name, as reported in errors.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::BeginsWith(_) => "BEGINS_WITH",
            Self::Between(..) => "BETWEEN",
            Self::Contains(_) => "CONTAINS",
            Self::Equals(_) => "=",
            Self::Exists => "EXISTS",
            Self::GreaterThan(_) => ">",
            Self::GreaterThanOrEqual(_) => ">=",
            Self::In(_) => "IN",
            Self::LessThan(_) => "<",
            Self::LessThanOrEqual(_) => "<=",
            Self::NotContains(_) => "NOT_CONTAINS",
            Self::NotEqual(_) => "<>",
            Self::NotExists => "NOT_EXISTS",
            Self::Size(_) => "SIZE",
        }
    }

    /// Whether a key condition on a key of `role` may use this operator.
    pub fn is_key_operator(&self, role: KeyRole) -> bool {
        match role {
            KeyRole::Partition => matches!(self, Self::Equals(_)),
            KeyRole::Sort => matches!(
                self,
                Self::Equals(_)
                    | Self::LessThan(_)
                    | Self::LessThanOrEqual(_)
                    | Self::GreaterThan(_)
                    | Self::GreaterThanOrEqual(_)
                    | Self::Between(..)
                    | Self::BeginsWith(_)
            ),
        }
    }

    /// Whether the condition only tests presence, never a value.
    pub fn is_existence_check(&self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }

    /// Converts every operand with `f`.
    pub fn try_map<U, E>(self, f: &mut impl FnMut(T) -> Result<U, E>) -> Result<Condition<U>, E> {
        let condition = match self {
            Self::BeginsWith(prefix) => Condition::BeginsWith(prefix),
            Self::Between(low, high) => Condition::Between(f(low)?, f(high)?),
            Self::Contains(value) => Condition::Contains(f(value)?),
            Self::Equals(value) => Condition::Equals(f(value)?),
            Self::Exists => Condition::Exists,
            Self::GreaterThan(value) => Condition::GreaterThan(f(value)?),
            Self::GreaterThanOrEqual(value) => Condition::GreaterThanOrEqual(f(value)?),
            Self::In(values) => Condition::In(values.into_iter().map(&mut *f).collect::<Result<_, E>>()?),
            Self::LessThan(value) => Condition::LessThan(f(value)?),
            Self::LessThanOrEqual(value) => Condition::LessThanOrEqual(f(value)?),
            Self::NotContains(value) => Condition::NotContains(f(value)?),
            Self::NotEqual(value) => Condition::NotEqual(f(value)?),
            Self::NotExists => Condition::NotExists,
            Self::Size(inner) => Condition::Size(Box::new(inner.try_map(f)?)),
        };
        Ok(condition)
    }
}

impl<T: Serialize> Condition<T> {
    /// Serializes every operand into an attribute value.
    pub fn into_attribute_values(self) -> Result<Condition<AttributeValue>> {
        Ok(self.try_map(&mut |value| to_attribute_value::<_, AttributeValue>(value))?)
    }
}

/// Condition applied to a named attribute path.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldCondition<T = AttributeValue> {
    /// Attribute path, e.g. `age`, `address.city` or `tags[0]`.
    pub name: String,
    /// The comparison.
    pub condition: Condition<T>,
}

impl<T> FieldCondition<T> {
    /// A condition on `name`.
    pub fn new(name: impl Into<String>, condition: Condition<T>) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }
}

impl<T: Serialize> FieldCondition<T> {
    /// Serializes the operands into attribute values.
    pub fn into_attribute_values(self) -> Result<FieldCondition> {
        Ok(FieldCondition {
            name: self.name,
            condition: self.condition.into_attribute_values()?,
        })
    }
}

/// Write guard given as a store condition expression, for checks the
/// condition types cannot express.
///
/// Placeholders are chosen by the caller: `#name` placeholders stand for
/// model field names, `:value` placeholders for serialized values. The
/// `#n0`/`:v0` forms are reserved for generated placeholders. The
/// expression is ANDed, parenthesized, onto the other guards of the write.
///
/// ```rust
/// use dynamodb_mapper::common::condition::RawCondition;
///
/// let guard = RawCondition::new("#balance >= :min OR #overdraft = :allowed")
///     .name("#balance", "balance")
///     .name("#overdraft", "overdraft")
///     .value(":min", 25)
///     .value(":allowed", true);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawCondition {
    pub(crate) expression: String,
    pub(crate) names: Vec<(String, String)>,
    pub(crate) values: Vec<(String, AttributeValue)>,
    pub(crate) error: Option<String>,
}

impl RawCondition {
    /// A guard with no placeholder bound yet.
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Default::default()
        }
    }

    /// Binds `placeholder` to the field `name`.
    pub fn name(mut self, placeholder: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.push((placeholder.into(), name.into()));
        self
    }

    /// Binds `placeholder` to `value`.
    pub fn value<T: Serialize>(mut self, placeholder: impl Into<String>, value: T) -> Self {
        let placeholder = placeholder.into();
        match to_attribute_value::<_, AttributeValue>(value) {
            Ok(value) => self.values.push((placeholder, value)),
            Err(err) => {
                self.error
                    .get_or_insert_with(|| format!("value of `{placeholder}`: {err}"));
            }
        }
        self
    }
}

/// Element of a condition group.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionNode {
    /// A single comparison.
    Leaf(FieldCondition),
    /// A nested, parenthesized group.
    Group(ConditionGroup),
}

/// Conditions joined by AND/OR, possibly nested.
///
/// Connectives apply in order of insertion; the connective of the first
/// element is ignored.
///
/// ```rust
/// use dynamodb_mapper::common::condition::{Condition, ConditionGroup};
///
/// let group = ConditionGroup::new()
///     .and("status", Condition::Equals("active"))
///     .or_group(
///         ConditionGroup::new()
///             .and("status", Condition::Equals("pending"))
///             .and("age", Condition::GreaterThan(30)),
///     );
/// assert_eq!(group.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionGroup {
    pub(crate) nodes: Vec<(LogicalOperator, ConditionNode)>,
    pub(crate) error: Option<String>,
}

impl ConditionGroup {
    /// An empty group.
    pub fn new() -> Self {
        Self::default()
    }

    fn push<T: Serialize>(
        mut self,
        operator: LogicalOperator,
        name: impl Into<String>,
        condition: Condition<T>,
    ) -> Self {
        match FieldCondition::new(name, condition).into_attribute_values() {
            Ok(condition) => self.nodes.push((operator, ConditionNode::Leaf(condition))),
            Err(err) => {
                self.error.get_or_insert_with(|| err.to_string());
            }
        }
        self
    }

    fn push_group(mut self, operator: LogicalOperator, group: ConditionGroup) -> Self {
        if let Some(err) = &group.error {
            self.error.get_or_insert_with(|| err.clone());
        }
        if !group.is_empty() {
            self.nodes.push((operator, ConditionNode::Group(group)));
        }
        self
    }

    /// Appends `name condition` joined with AND.
    pub fn and<T: Serialize>(self, name: impl Into<String>, condition: Condition<T>) -> Self {
        self.push(LogicalOperator::And, name, condition)
    }

    /// Appends `name condition` joined with OR.
    pub fn or<T: Serialize>(self, name: impl Into<String>, condition: Condition<T>) -> Self {
        self.push(LogicalOperator::Or, name, condition)
    }

    /// Appends a nested group joined with AND.
    pub fn and_group(self, group: ConditionGroup) -> Self {
        self.push_group(LogicalOperator::And, group)
    }

    /// Appends a nested group joined with OR.
    pub fn or_group(self, group: ConditionGroup) -> Self {
        self.push_group(LogicalOperator::Or, group)
    }

    /// Number of top-level elements.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the group has no element.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fails with the first operand that could not be serialized.
    pub(crate) fn check(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(Error::InvalidExpression(err.clone())),
            None => Ok(()),
        }
    }
}
