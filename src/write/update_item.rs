use crate::{
    codec::{Item, split_path},
    common::{
        condition::{
            Condition, ConditionGroup, ConditionNode, FieldCondition, LogicalOperator, RawCondition,
        },
        expression::ExpressionBuilder,
        key::bind_key,
    },
    context::RequestContext,
    db::Db,
    error::{Error, Result},
    model::{Model, ModelMetadata},
    store::Store,
    write::common::{WriteInput, WriteOptions, add_guard, add_version_guard, key_of_logical},
};

use aws_sdk_dynamodb::{
    Client,
    operation::update_item::UpdateItemInput,
    types::{self, AttributeValue, ReturnValue},
};
use chrono::Utc;
use serde::Serialize;
use serde_dynamo::to_attribute_value;
use std::marker::PhantomData;

/// SET operation for updating attributes.
///
/// ```rust
/// use dynamodb_mapper::write::update_item;
///
/// let assign = update_item::SetInput::Assign("value".to_string());
/// let increment = update_item::SetInput::Increment(10);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum SetInput<T> {
    /// Assign a new value to the attribute (replaces existing value).
    Assign(T),
    /// Increment a numeric attribute by the specified value.
    Increment(T),
    /// Decrement a numeric attribute by the specified value.
    Decrement(T),
    /// Append values to the end of a list attribute.
    ListAppend(T),
    /// Prepend values to the beginning of a list attribute.
    ListPrepend(T),
    /// Assign a value only if the attribute doesn't exist.
    IfNotExists(T),
}

impl<T> SetInput<T> {
    /// Name of the operation, as reported in errors.
    pub(crate) fn operation(&self) -> &'static str {
        match self {
            SetInput::Assign(_) => "SET",
            SetInput::Increment(_) => "increment",
            SetInput::Decrement(_) => "decrement",
            SetInput::ListAppend(_) => "list_append",
            SetInput::ListPrepend(_) => "list_prepend",
            SetInput::IfNotExists(_) => "if_not_exists",
        }
    }

    pub(crate) fn get_set_expression(self, path: &str, value_placeholder: &str) -> (T, String) {
        match self {
            SetInput::Assign(value) => {
                let expression = format!("{path} = {value_placeholder}");
                (value, expression)
            }
            SetInput::Increment(value) => {
                let expression = format!("{path} = {path} + {value_placeholder}");
                (value, expression)
            }
            SetInput::Decrement(value) => {
                let expression = format!("{path} = {path} - {value_placeholder}");
                (value, expression)
            }
            SetInput::ListAppend(value) => {
                let expression = format!("{path} = list_append({path}, {value_placeholder})");
                (value, expression)
            }
            SetInput::ListPrepend(value) => {
                let expression = format!("{path} = list_append({value_placeholder}, {path})");
                (value, expression)
            }
            SetInput::IfNotExists(value) => {
                let expression = format!("{path} = if_not_exists({path}, {value_placeholder})");
                (value, expression)
            }
        }
    }
}

/// Compiled update ready to be sent alone or inside a transaction.
#[derive(Debug)]
pub(crate) struct PreparedUpdate {
    pub(crate) key: Item,
    pub(crate) update_expression: String,
    pub(crate) write: WriteInput,
    pub(crate) context: RequestContext,
}

impl PreparedUpdate {
    fn new(
        metadata: &ModelMetadata,
        key: Item,
        builder: ExpressionBuilder<'_>,
        context: RequestContext,
    ) -> Result<Self> {
        let mut compiled = builder.build();
        let update_expression = compiled
            .update
            .take()
            .ok_or_else(|| Error::InvalidRequest("update has nothing to change".to_string()))?;
        Ok(Self {
            key,
            update_expression,
            write: WriteInput::new(metadata.table(), compiled),
            context,
        })
    }

    fn into_input(self, return_values: ReturnValue) -> Result<(UpdateItemInput, RequestContext)> {
        let builder = UpdateItemInput::builder()
            .set_key(Some(self.key))
            .update_expression(self.update_expression)
            .return_values(return_values);
        let input = crate::apply_write_operation!(builder, self.write).build()?;
        Ok((input, self.context))
    }

    /// Transaction element of the update.
    pub(crate) fn into_transact_item(self) -> Result<types::TransactWriteItem> {
        let builder = types::Update::builder()
            .set_key(Some(self.key))
            .update_expression(self.update_expression);
        let update = crate::apply_write_operation!(builder, self.write).build()?;
        Ok(types::TransactWriteItem::builder().update(update).build())
    }
}

/// Logical names of the fields a model update writes.
fn update_targets(
    metadata: &ModelMetadata,
    logical: &Item,
    fields: Option<&[&str]>,
) -> Result<Vec<String>> {
    let Some(fields) = fields else {
        let mut names: Vec<_> = logical
            .keys()
            .filter(|name| {
                metadata
                    .field(name)
                    .is_none_or(|field| !field.is_primary_key() && !field.is_managed())
            })
            .cloned()
            .collect();
        names.sort();
        return Ok(names);
    };
    fields
        .iter()
        .map(|name| {
            let field = metadata.field(name).ok_or_else(|| Error::UnknownField {
                model: metadata.name(),
                field: name.to_string(),
            })?;
            if field.is_primary_key() || field.version {
                return Err(Error::InvalidRequest(format!(
                    "field `{name}` is managed by the key or version and cannot be updated"
                )));
            }
            Ok(name.to_string())
        })
        .collect()
}

/// Compiles the update of the stored item behind `model`.
///
/// `fields` limits the update to the named fields; `None` writes every
/// non-key field the model serializes. Fields serialized as absent or elided
/// by the codec are removed.
pub(crate) async fn prepare_model_update<M: Model, S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    model: &M,
    fields: Option<&[&str]>,
    options: WriteOptions,
) -> Result<PreparedUpdate> {
    let encryptor = db.encryptor(metadata)?;
    let codec = db.codec(metadata);
    let logical = db.to_logical(model)?;
    let key = key_of_logical(&codec, &logical)?;
    let targets = update_targets(metadata, &logical, fields)?;
    let now = Utc::now();

    let mut builder = ExpressionBuilder::for_model(codec);
    for name in &targets {
        let Some(value) = logical.get(name) else {
            builder.remove(name)?;
            continue;
        };
        let Some(field) = metadata.field(name) else {
            builder.set_encoded(name, SetInput::Assign(value.clone()))?;
            continue;
        };
        let Some(value) = codec.encode_field(field, value.clone())? else {
            builder.remove(name)?;
            continue;
        };
        let value = match encryptor {
            Some(encryptor) if field.is_encrypted() => {
                encryptor.encrypt(field.wire_name(), &value).await?
            }
            _ => value,
        };
        builder.set_encoded(name, SetInput::Assign(value))?;
    }

    if fields.is_none() {
        if let Some(created_at) = metadata.created_at_field() {
            let value = codec.timestamp(created_at, logical.get(created_at), now);
            builder.set(created_at, SetInput::IfNotExists(value))?;
        }
    }
    if let Some(updated_at) = metadata.updated_at_field() {
        if !targets.iter().any(|name| name == updated_at) {
            let value = codec.timestamp(updated_at, logical.get(updated_at), now);
            builder.set(updated_at, SetInput::Assign(value))?;
        }
    }
    let context = options.apply(&mut builder, metadata)?;
    if let Some(version) = metadata.version_field() {
        builder.add(version, AttributeValue::N("1".to_string()))?;
        add_version_guard(&mut builder, metadata, codec.version_of(&logical)?)?;
    }
    PreparedUpdate::new(metadata, key, builder, context)
}

impl<S: Store> Db<S> {
    /// Writes every non-key field of `model` to its stored item.
    ///
    /// Bumps the version field, guarding on the in-memory version when it is
    /// non-zero, stamps the updated-at field and refreshes `model` from the
    /// stored result.
    pub async fn update<M: Model>(&self, model: &mut M) -> Result<()> {
        self.update_with(model, WriteOptions::new()).await
    }

    /// [`Db::update`] with extra guards and a request context.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.update", skip_all, err)
    )]
    pub async fn update_with<M: Model>(&self, model: &mut M, options: WriteOptions) -> Result<()> {
        self.update_model(model, None, options).await
    }

    /// Writes only `fields` of `model`.
    ///
    /// Listing the updated-at field writes the model's value instead of the
    /// current time. Key and version fields cannot be listed.
    pub async fn update_fields<M: Model>(&self, model: &mut M, fields: &[&str]) -> Result<()> {
        self.update_fields_with(model, fields, WriteOptions::new())
            .await
    }

    /// [`Db::update_fields`] with extra guards and a request context.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.update_fields", skip_all, err)
    )]
    pub async fn update_fields_with<M: Model>(
        &self,
        model: &mut M,
        fields: &[&str],
        options: WriteOptions,
    ) -> Result<()> {
        self.update_model(model, Some(fields), options).await
    }

    async fn update_model<M: Model>(
        &self,
        model: &mut M,
        fields: Option<&[&str]>,
        options: WriteOptions,
    ) -> Result<()> {
        let metadata = self.metadata::<M>()?;
        let prepared = prepare_model_update(self, &metadata, model, fields, options).await?;
        let (input, context) = prepared.into_input(ReturnValue::AllNew)?;
        let output = self
            .call(&context, "UpdateItem", metadata.table(), self.store().update_item(input))
            .await?;
        if let Some(attributes) = output.attributes {
            let encryptor = self.encryptor(&metadata)?;
            *model = self.decode(&metadata, encryptor, attributes).await?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Operation {
    Set(String, SetInput<AttributeValue>),
    Add(String, AttributeValue),
    Delete(String, AttributeValue),
    Remove(String),
}

/// Field-level update of the item selected by a query's key equalities.
///
/// Created with [`ModelQuery::update_builder`](crate::read::query::ModelQuery::update_builder).
/// The query must bind every primary key field with `=`; its other
/// conditions and filters become write guards. The updated-at field is
/// stamped unless set explicitly and the version field, if any, is bumped.
///
/// ```rust,no_run
/// # use dynamodb_mapper::{Db, Model, common::condition::Condition, model::{ModelSchema, field::Field}};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Deserialize, Serialize)]
/// # struct Account { id: String, balance: i64 }
/// # impl Model for Account {
/// #     fn schema() -> ModelSchema {
/// #         ModelSchema::new("accounts").field(Field::new("id").partition_key())
/// #     }
/// # }
/// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
/// let account: Account = db
///     .model::<Account>()
///     .where_("id", Condition::Equals("a-1"))
///     .update_builder()
///     .decrement("balance", 25)
///     .condition("balance", Condition::GreaterThanOrEqual(25))
///     .fetch_new()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[must_use = "an update does nothing until executed"]
pub struct UpdateBuilder<M, S = Client> {
    db: Db<S>,
    conditions: Vec<FieldCondition>,
    filters: ConditionGroup,
    operations: Vec<Operation>,
    options: WriteOptions,
    expected_version: Option<i64>,
    error: Option<Error>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model, S: Store> UpdateBuilder<M, S> {
    pub(crate) fn new(
        db: Db<S>,
        conditions: Vec<FieldCondition>,
        filters: ConditionGroup,
        context: RequestContext,
        error: Option<Error>,
    ) -> Self {
        Self {
            db,
            conditions,
            filters,
            operations: Vec::new(),
            options: WriteOptions::new().with_context(context),
            expected_version: None,
            error,
            _model: PhantomData,
        }
    }

    fn value<T: Serialize>(&mut self, value: T) -> Option<AttributeValue> {
        match to_attribute_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                self.error.get_or_insert(Error::Serde(err));
                None
            }
        }
    }

    fn push_set<T: Serialize>(
        mut self,
        path: String,
        value: T,
        input: fn(AttributeValue) -> SetInput<AttributeValue>,
    ) -> Self {
        if let Some(value) = self.value(value) {
            self.operations.push(Operation::Set(path, input(value)));
        }
        self
    }

    /// Assigns `value` to `field`.
    pub fn set<T: Serialize>(self, field: &str, value: T) -> Self {
        self.push_set(field.to_string(), value, SetInput::Assign)
    }

    /// Assigns `value` to `field` unless it already has a value.
    pub fn set_if_not_exists<T: Serialize>(self, field: &str, value: T) -> Self {
        self.push_set(field.to_string(), value, SetInput::IfNotExists)
    }

    /// Adds `by` to the number in `field`.
    pub fn increment<T: Serialize>(self, field: &str, by: T) -> Self {
        self.push_set(field.to_string(), by, SetInput::Increment)
    }

    /// Subtracts `by` from the number in `field`.
    pub fn decrement<T: Serialize>(self, field: &str, by: T) -> Self {
        self.push_set(field.to_string(), by, SetInput::Decrement)
    }

    /// Appends `values` to the list in `field`.
    pub fn append<T: Serialize>(self, field: &str, values: T) -> Self {
        self.push_set(field.to_string(), values, SetInput::ListAppend)
    }

    /// Prepends `values` to the list in `field`.
    pub fn prepend<T: Serialize>(self, field: &str, values: T) -> Self {
        self.push_set(field.to_string(), values, SetInput::ListPrepend)
    }

    /// Assigns `value` to element `index` of the list in `field`.
    pub fn set_list_element<T: Serialize>(self, field: &str, index: usize, value: T) -> Self {
        self.push_set(format!("{field}[{index}]"), value, SetInput::Assign)
    }

    /// ADD: numeric increment, or union with the set in `field`.
    pub fn add<T: Serialize>(mut self, field: &str, value: T) -> Self {
        if let Some(value) = self.value(value) {
            self.operations.push(Operation::Add(field.to_string(), value));
        }
        self
    }

    /// DELETE: removes `values` from the set in `field`.
    pub fn delete<T: Serialize>(mut self, field: &str, values: T) -> Self {
        if let Some(value) = self.value(values) {
            self.operations
                .push(Operation::Delete(field.to_string(), value));
        }
        self
    }

    /// Removes `field` from the item.
    pub fn remove(mut self, field: &str) -> Self {
        self.operations.push(Operation::Remove(field.to_string()));
        self
    }

    /// Removes element `index` of the list in `field`.
    pub fn remove_at(mut self, field: &str, index: usize) -> Self {
        self.operations
            .push(Operation::Remove(format!("{field}[{index}]")));
        self
    }

    /// Adds a guard joined with AND.
    pub fn condition<T: Serialize>(mut self, field: &str, condition: Condition<T>) -> Self {
        self.options = self.options.condition(field, condition);
        self
    }

    /// Adds a guard joined with OR.
    pub fn or_condition<T: Serialize>(mut self, field: &str, condition: Condition<T>) -> Self {
        self.options = self.options.or_condition(field, condition);
        self
    }

    /// Adds a nested guard group joined with AND.
    pub fn condition_group(mut self, group: ConditionGroup) -> Self {
        self.options = self.options.condition_group(group);
        self
    }

    /// Adds a guard written as a condition expression, joined with AND.
    pub fn condition_expression(mut self, raw: RawCondition) -> Self {
        self.options = self.options.condition_expression(raw);
        self
    }

    /// Requires the item to exist already.
    pub fn if_exists(mut self) -> Self {
        self.options = self.options.if_exists();
        self
    }

    /// Requires the item not to exist yet.
    pub fn if_not_exists(mut self) -> Self {
        self.options = self.options.if_not_exists();
        self
    }

    /// Requires the stored version to equal `expected`.
    pub fn version(mut self, expected: i64) -> Self {
        self.expected_version = Some(expected);
        self
    }

    /// Runs the update under `context`.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.options = self.options.with_context(context);
        self
    }

    async fn prepare(self, metadata: &ModelMetadata) -> Result<PreparedUpdate> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.operations.is_empty() {
            return Err(Error::InvalidRequest(
                "update builder has no operation".to_string(),
            ));
        }
        let encryptor = self.db.encryptor(metadata)?;
        let codec = self.db.codec(metadata);
        let (key, guards) = bind_key(&codec, self.conditions)?;

        let mut builder = ExpressionBuilder::for_model(codec);
        let mut stamp_updated_at = metadata.updated_at_field();
        for operation in self.operations {
            let path = match &operation {
                Operation::Set(path, _)
                | Operation::Add(path, _)
                | Operation::Delete(path, _)
                | Operation::Remove(path) => path,
            };
            let (name, rest) = split_path(path);
            if metadata.field(name).is_some_and(|field| field.is_primary_key()) {
                return Err(Error::InvalidRequest(format!(
                    "key field `{name}` cannot be updated"
                )));
            }
            if stamp_updated_at == Some(name) {
                stamp_updated_at = None;
            }
            let encrypted = codec.is_encrypted(path) && rest.is_empty();
            match operation {
                Operation::Set(path, SetInput::Assign(value)) if encrypted => {
                    let value = seal(&self.db, metadata, encryptor, &path, value).await?;
                    builder.set_encoded(&path, SetInput::Assign(value))?;
                }
                Operation::Set(path, SetInput::IfNotExists(value)) if encrypted => {
                    let value = seal(&self.db, metadata, encryptor, &path, value).await?;
                    builder.set_encoded(&path, SetInput::IfNotExists(value))?;
                }
                Operation::Set(path, input) => builder.set(&path, input)?,
                Operation::Add(path, value) => builder.add(&path, value)?,
                Operation::Delete(path, value) => builder.delete(&path, value)?,
                Operation::Remove(path) => builder.remove(&path)?,
            }
        }
        if let Some(updated_at) = stamp_updated_at {
            let value = codec.timestamp(updated_at, None, Utc::now());
            builder.set(updated_at, SetInput::Assign(value))?;
        }
        if let Some(version) = metadata.version_field() {
            builder.add(version, AttributeValue::N("1".to_string()))?;
        }

        for guard in guards {
            builder.add_write_condition(LogicalOperator::And, ConditionNode::Leaf(guard))?;
        }
        builder.add_write_condition_group(self.filters)?;
        let context = self.options.apply(&mut builder, metadata)?;
        if let (Some(version), Some(expected)) = (metadata.version_field(), self.expected_version) {
            add_guard(
                &mut builder,
                version,
                Condition::Equals(AttributeValue::N(expected.to_string())),
            )?;
        }
        PreparedUpdate::new(metadata, key, builder, context)
    }

    async fn send(self, return_values: ReturnValue) -> Result<Option<Item>> {
        let db = self.db.clone();
        let metadata = db.metadata::<M>()?;
        let prepared = self.prepare(&metadata).await?;
        let (input, context) = prepared.into_input(return_values)?;
        let output = db
            .call(&context, "UpdateItem", metadata.table(), db.store().update_item(input))
            .await?;
        Ok(output.attributes)
    }

    /// Applies the update.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.update_builder", skip_all, err)
    )]
    pub async fn execute(self) -> Result<()> {
        self.send(ReturnValue::None).await.map(|_| ())
    }

    /// Applies the update and returns the item as stored afterwards.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.update_builder", skip_all, err)
    )]
    pub async fn fetch_new(self) -> Result<M> {
        let db = self.db.clone();
        let attributes = self
            .send(ReturnValue::AllNew)
            .await?
            .ok_or(Error::ItemNotFound)?;
        db.decode_item(attributes).await
    }
}

/// Stored, encrypted form of a value assigned to an encrypted field.
async fn seal<S: Store>(
    db: &Db<S>,
    metadata: &ModelMetadata,
    encryptor: Option<&crate::encryption::EnvelopeEncryptor>,
    path: &str,
    value: AttributeValue,
) -> Result<AttributeValue> {
    let encryptor = encryptor.ok_or(Error::EncryptionNotConfigured {
        model: metadata.name(),
    })?;
    let value = db.codec(metadata).encode_expression_value(path, value)?;
    encryptor
        .encrypt(metadata.wire_name(path), &value)
        .await
}
