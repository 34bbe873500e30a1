use crate::{
    codec::Item,
    common::{
        condition::{Condition, ConditionGroup, ConditionNode, FieldCondition, LogicalOperator},
        expression::ExpressionBuilder,
        key::bind_key,
    },
    context::RequestContext,
    cursor::{Cursor, SortDirection},
    db::Db,
    error::{Error, Result},
    model::{Model, ModelMetadata},
    planner::{self, AccessPath, Plan, PlanInput},
    read::{
        common::{MultipleReadInput, SingleReadInput, decode_items},
        get_item::get_item,
    },
    store::Store,
    write::{delete_item::prepare_delete_where, update_item::UpdateBuilder},
};

use aws_sdk_dynamodb::{
    Client,
    operation::{query::QueryInput, scan::ScanInput},
    types::Select,
};
use serde::Serialize;
use std::marker::PhantomData;

/// Read compiled against one access path.
#[derive(Clone, Debug)]
pub(crate) struct CompiledRead {
    pub(crate) access: AccessPath,
    /// Wire key of a direct lookup.
    pub(crate) key: Option<Item>,
    pub(crate) key_condition: Option<String>,
    pub(crate) scan_index_forward: Option<bool>,
    pub(crate) read: MultipleReadInput,
}

/// One page as returned by the store.
#[derive(Debug, Default)]
pub(crate) struct RawPage {
    pub(crate) items: Vec<Item>,
    pub(crate) count: usize,
    pub(crate) last_evaluated_key: Option<Item>,
}

/// Sends one Query or Scan page of `compiled`, optionally restricted to a
/// scan segment `(segment, total_segments)`.
pub(crate) async fn read_page<S: Store>(
    db: &Db<S>,
    compiled: &CompiledRead,
    read: MultipleReadInput,
    context: &RequestContext,
    segment: Option<(i32, i32)>,
) -> Result<RawPage> {
    let table = read.table_name.clone();
    let (items, count, last_evaluated_key) = match &compiled.access {
        AccessPath::Query { .. } => {
            let builder = QueryInput::builder()
                .set_key_condition_expression(compiled.key_condition.clone())
                .set_scan_index_forward(compiled.scan_index_forward);
            let input = crate::apply_multiple_read_operation!(builder, read).build()?;
            let output = db
                .call(context, "Query", &table, db.store().query(input))
                .await?;
            (output.items, output.count, output.last_evaluated_key)
        }
        AccessPath::Scan { .. } | AccessPath::GetItem => {
            let builder = ScanInput::builder()
                .set_segment(segment.map(|(segment, _)| segment))
                .set_total_segments(segment.map(|(_, total)| total));
            let input = crate::apply_multiple_read_operation!(builder, read).build()?;
            let output = db
                .call(context, "Scan", &table, db.store().scan(input))
                .await?;
            (output.items, output.count, output.last_evaluated_key)
        }
    };
    Ok(RawPage {
        items: items.unwrap_or_default(),
        count: usize::try_from(count).unwrap_or_default(),
        last_evaluated_key: last_evaluated_key.filter(|key| !key.is_empty()),
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ReadMode {
    /// Planner decides, direct lookups included.
    Auto,
    /// Planner decides between query and scan.
    Ranged,
    /// Like `Ranged`, without projection.
    Count,
    /// Always a scan.
    Scan,
}

/// One page of results and the cursor of the next one.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<M> {
    /// Items of the page.
    pub items: Vec<M>,
    /// Cursor of the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Fluent read of model `M`.
///
/// Conditions given to [`where_`](Self::where_) are handed to the planner,
/// which picks a direct lookup, a query or a scan; conditions it cannot use
/// as key conditions are applied as filters. Filters narrow the results but
/// not the capacity a read consumes.
///
/// ```rust,no_run
/// # use dynamodb_mapper::{Db, Model, common::condition::Condition, cursor::SortDirection, model::{IndexSchema, ModelSchema, field::Field}};
/// # use serde::{Deserialize, Serialize};
/// # #[derive(Deserialize, Serialize)]
/// # struct Order { customer: String, placed_at: String, status: String, total: i64 }
/// # impl Model for Order {
/// #     fn schema() -> ModelSchema {
/// #         ModelSchema::new("orders")
/// #             .field(Field::new("customer").partition_key())
/// #             .field(Field::new("placed_at").sort_key())
/// #     }
/// # }
/// # async fn example(db: Db) -> dynamodb_mapper::Result<()> {
/// let page = db
///     .model::<Order>()
///     .where_("customer", Condition::Equals("c-1"))
///     .where_("placed_at", Condition::<&str>::BeginsWith("2024-".to_string()))
///     .filter("status", Condition::Equals("shipped"))
///     .or_filter("total", Condition::GreaterThan(100))
///     .order(SortDirection::Descending)
///     .page(20)
///     .await?;
/// if let Some(cursor) = page.next_cursor {
///     let next = db
///         .model::<Order>()
///         .where_("customer", Condition::Equals("c-1"))
///         .where_("placed_at", Condition::<&str>::BeginsWith("2024-".to_string()))
///         .filter("status", Condition::Equals("shipped"))
///         .or_filter("total", Condition::GreaterThan(100))
///         .order(SortDirection::Descending)
///         .cursor(&cursor)
///         .page(20)
///         .await?;
/// }
/// # Ok(())
/// # }
/// ```
#[must_use = "a query does nothing until a terminal method is awaited"]
pub struct ModelQuery<M, S = Client> {
    pub(crate) db: Db<S>,
    pub(crate) conditions: Vec<FieldCondition>,
    pub(crate) filters: ConditionGroup,
    pub(crate) index: Option<String>,
    pub(crate) projection: Vec<String>,
    pub(crate) limit: Option<usize>,
    offset: usize,
    order: Option<SortDirection>,
    consistent_read: Option<bool>,
    cursor: Option<String>,
    pub(crate) context: RequestContext,
    error: Option<Error>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model, S: Store> ModelQuery<M, S> {
    pub(crate) fn new(db: Db<S>) -> Self {
        Self {
            db,
            conditions: Vec::new(),
            filters: ConditionGroup::new(),
            index: None,
            projection: Vec::new(),
            limit: None,
            offset: 0,
            order: None,
            consistent_read: None,
            cursor: None,
            context: RequestContext::new(),
            error: None,
            _model: PhantomData,
        }
    }

    /// Adds a condition the planner may use as a key condition.
    pub fn where_<T: Serialize>(mut self, field: &str, condition: Condition<T>) -> Self {
        match FieldCondition::new(field, condition).into_attribute_values() {
            Ok(condition) => self.conditions.push(condition),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// Adds a filter joined with AND.
    pub fn filter<T: Serialize>(mut self, field: &str, condition: Condition<T>) -> Self {
        self.filters = self.filters.and(field, condition);
        self
    }

    /// Adds a filter joined with OR.
    pub fn or_filter<T: Serialize>(mut self, field: &str, condition: Condition<T>) -> Self {
        self.filters = self.filters.or(field, condition);
        self
    }

    /// Adds a parenthesized filter group joined with AND.
    pub fn filter_group(mut self, group: ConditionGroup) -> Self {
        self.filters = self.filters.and_group(group);
        self
    }

    /// Adds a parenthesized filter group joined with OR.
    pub fn or_filter_group(mut self, group: ConditionGroup) -> Self {
        self.filters = self.filters.or_group(group);
        self
    }

    /// Reads the secondary index `name` instead of the table.
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    /// Reads only the given attribute paths.
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.projection
            .extend(fields.iter().map(|field| field.to_string()));
        self
    }

    /// Returns at most `limit` items.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` matching items.
    ///
    /// The skipped items are still read. Pages cannot be combined with an
    /// offset; resume them with a cursor instead.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Orders results along the sort key. Scans ignore it.
    pub fn order(mut self, order: SortDirection) -> Self {
        self.order = Some(order);
        self
    }

    /// Requests strongly consistent reads.
    pub fn consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = Some(consistent_read);
        self
    }

    /// Resumes after the position encoded in `cursor`.
    pub fn cursor(mut self, cursor: &str) -> Self {
        self.cursor = Some(cursor.to_string());
        self
    }

    /// Runs the read under `context`.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Turns the query into an update of the item its key equalities select.
    pub fn update_builder(self) -> UpdateBuilder<M, S> {
        UpdateBuilder::new(
            self.db,
            self.conditions,
            self.filters,
            self.context,
            self.error,
        )
    }

    /// Deletes the item the key equalities select; other conditions and
    /// filters guard the delete.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.delete", skip_all, err)
    )]
    pub async fn delete(mut self) -> Result<()> {
        self.take_error()?;
        let metadata = self.db.metadata::<M>()?;
        let prepared = prepare_delete_where(
            &self.db,
            &metadata,
            self.conditions,
            self.filters,
            self.context,
        )?;
        self.db.send_delete(&metadata, prepared).await
    }

    pub(crate) fn take_error(&mut self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn plan(&self, metadata: &ModelMetadata, mode: ReadMode) -> Result<Plan> {
        if mode == ReadMode::Scan {
            metadata.key_schema(self.index.as_deref())?;
            return Ok(Plan {
                access: AccessPath::Scan {
                    index: self.index.clone(),
                },
                key_conditions: Vec::new(),
                filters: self.conditions.clone(),
            });
        }
        let has_modifiers = mode != ReadMode::Auto
            || self.limit.is_some()
            || self.offset > 0
            || self.cursor.is_some()
            || self.order.is_some()
            || !self.projection.is_empty();
        let input = PlanInput {
            conditions: self.conditions.clone(),
            index: self.index.as_deref(),
            has_filters: !self.filters.is_empty(),
            has_modifiers,
        };
        planner::plan(metadata, input)
    }

    fn compile(&self, metadata: &ModelMetadata, mode: ReadMode) -> Result<CompiledRead> {
        self.filters.check()?;
        let plan = self.plan(metadata, mode)?;
        let codec = self.db.codec(metadata);
        let mut builder = ExpressionBuilder::for_model(codec);

        let mut key = None;
        if plan.access == AccessPath::GetItem {
            let conditions = plan.key_conditions.into_iter().map(|(_, condition)| condition);
            key = Some(bind_key(&codec, conditions.collect())?.0);
        } else {
            for (role, condition) in plan.key_conditions {
                builder.add_key_condition(role, condition)?;
            }
        }
        if plan.filters.is_empty() {
            for (operator, node) in self.filters.nodes.iter().cloned() {
                builder.add_filter(operator, node)?;
            }
        } else {
            for filter in plan.filters {
                builder.add_filter(LogicalOperator::And, ConditionNode::Leaf(filter))?;
            }
            builder.add_filter_group(self.filters.clone())?;
        }
        if mode != ReadMode::Count {
            builder.add_projection(&self.projection)?;
        }
        let compiled = builder.build();

        let index = match &plan.access {
            AccessPath::Query { index } | AccessPath::Scan { index } => index.clone(),
            AccessPath::GetItem => None,
        };
        let consistent_read = self.consistent_read.or_else(|| {
            (self.db.config().consistent_reads && index.is_none()).then_some(true)
        });
        let scan_index_forward = matches!(plan.access, AccessPath::Query { .. })
            .then(|| self.order.unwrap_or_default().scan_index_forward());
        Ok(CompiledRead {
            key,
            key_condition: compiled.key_condition.clone(),
            scan_index_forward,
            read: MultipleReadInput::new(metadata.table(), index, &compiled, consistent_read),
            access: plan.access,
        })
    }

    /// Exclusive start key carried by the cursor, checked against this read.
    fn start_key(&self) -> Result<Option<Item>> {
        let Some(token) = &self.cursor else {
            return Ok(None);
        };
        let cursor = Cursor::decode(token)?;
        if cursor.is_start() {
            return Ok(None);
        }
        cursor.check_index(self.index.as_deref())?;
        if cursor.sort != self.order.unwrap_or_default() {
            return Err(Error::InvalidCursor(format!(
                "cursor was produced by a {:?} read",
                cursor.sort
            )));
        }
        Ok(Some(cursor.last_evaluated_key))
    }

    /// Reads pages until `max` items (or counted items) are gathered or the
    /// results run out.
    ///
    /// With `limit_pages` each request asks for the remaining count, so the
    /// last evaluated key marks exactly where the results stop. Without it,
    /// pages are read whole and the items cut to `max`, which keeps a
    /// selective filter from costing one request per item evaluated.
    async fn collect(
        &self,
        compiled: &CompiledRead,
        mut start: Option<Item>,
        max: Option<usize>,
        select: Option<Select>,
        limit_pages: bool,
    ) -> Result<RawPage> {
        let counting = select.is_some();
        let mut result = RawPage::default();
        if max == Some(0) {
            return Ok(result);
        }
        loop {
            let gathered = if counting { result.count } else { result.items.len() };
            let remaining = max
                .filter(|_| limit_pages)
                .map(|max| max.saturating_sub(gathered));
            let read = compiled.read.page(start.take(), remaining, select.clone());
            let page = read_page(&self.db, compiled, read, &self.context, None).await?;
            result.items.extend(page.items);
            result.count += page.count;
            let gathered = if counting { result.count } else { result.items.len() };
            match page.last_evaluated_key {
                Some(key) if max.is_none_or(|max| gathered < max) => start = Some(key),
                key => {
                    result.last_evaluated_key = key;
                    if let (Some(max), false) = (max, limit_pages) {
                        result.items.truncate(max);
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// Direct lookup of `compiled`, which must carry a key.
    async fn lookup(&self, metadata: &ModelMetadata, compiled: &CompiledRead) -> Result<Option<Item>> {
        let Some(key) = compiled.key.clone() else {
            return Ok(None);
        };
        let read = SingleReadInput {
            consistent_read: compiled.read.consistent_read,
            table_name: metadata.table().to_string(),
            ..Default::default()
        };
        get_item(&self.db, metadata, key, read, &self.context).await
    }

    /// First matching item.
    ///
    /// Fails with [`Error::ItemNotFound`] when nothing matches.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.first", skip_all, err)
    )]
    pub async fn first(mut self) -> Result<M> {
        self.take_error()?;
        let metadata = self.db.metadata::<M>()?;
        let encryptor = self.db.encryptor(&metadata)?;
        let item = self
            .read_items(&metadata, ReadMode::Auto, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or(Error::ItemNotFound)?;
        self.db.decode(&metadata, encryptor, item).await
    }

    /// Raw items of the read after the offset, at most `max` of them.
    ///
    /// Without a filter each request asks for the remaining count. With one,
    /// pages are read whole so a selective filter does not cost one request
    /// per item evaluated.
    pub(crate) async fn read_items(
        &self,
        metadata: &ModelMetadata,
        mode: ReadMode,
        max: Option<usize>,
    ) -> Result<Vec<Item>> {
        let compiled = self.compile(metadata, mode)?;
        if compiled.access == AccessPath::GetItem {
            return Ok(self.lookup(metadata, &compiled).await?.into_iter().collect());
        }
        let start = self.start_key()?;
        let limit_pages = compiled.read.filter_expression.is_none();
        let max = max.map(|max| max.saturating_add(self.offset));
        let mut items = self
            .collect(&compiled, start, max, None, limit_pages)
            .await?
            .items;
        items.drain(..self.offset.min(items.len()));
        Ok(items)
    }

    /// Every matching item, up to the limit.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.all", skip_all, err)
    )]
    pub async fn all(mut self) -> Result<Vec<M>> {
        self.take_error()?;
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let items = self
            .read_items(&metadata, ReadMode::Auto, self.limit)
            .await?;
        decode_items(&self.db, &metadata, items).await
    }

    /// At most `size` items and the cursor of the next page.
    ///
    /// Resume with [`cursor`](Self::cursor) on a query with the same
    /// conditions, index and order.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.page", skip_all, err)
    )]
    pub async fn page(mut self, size: usize) -> Result<Page<M>> {
        self.take_error()?;
        if size == 0 {
            return Err(Error::InvalidRequest("page size must be positive".to_string()));
        }
        if self.offset > 0 {
            return Err(Error::InvalidRequest(
                "pages cannot skip an offset, resume with a cursor".to_string(),
            ));
        }
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let compiled = self.compile(&metadata, ReadMode::Ranged)?;
        let start = self.start_key()?;
        let page = self
            .collect(&compiled, start, Some(size), None, true)
            .await?;
        let next_cursor = page
            .last_evaluated_key
            .map(|last_evaluated_key| {
                Cursor {
                    last_evaluated_key,
                    index: self.index.clone(),
                    sort: self.order.unwrap_or_default(),
                }
                .encode()
            })
            .transpose()?;
        Ok(Page {
            items: decode_items(&self.db, &metadata, page.items).await?,
            next_cursor,
        })
    }

    /// Number of matching items, up to the limit.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.count", skip_all, err)
    )]
    pub async fn count(mut self) -> Result<usize> {
        self.take_error()?;
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let compiled = self.compile(&metadata, ReadMode::Count)?;
        let start = self.start_key()?;
        let max = self.limit.map(|limit| limit.saturating_add(self.offset));
        let page = self
            .collect(&compiled, start, max, Some(Select::Count), true)
            .await?;
        Ok(page.count.saturating_sub(self.offset))
    }

    /// Every matching item, read by scanning; all conditions are filters.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.scan", skip_all, err)
    )]
    pub async fn scan(mut self) -> Result<Vec<M>> {
        self.take_error()?;
        let metadata = self.db.metadata::<M>()?;
        self.db.encryptor(&metadata)?;
        let items = self
            .read_items(&metadata, ReadMode::Scan, self.limit)
            .await?;
        decode_items(&self.db, &metadata, items).await
    }

    pub(crate) fn compile_scan(&mut self, metadata: &ModelMetadata) -> Result<CompiledRead> {
        self.take_error()?;
        self.compile(metadata, ReadMode::Scan)
    }
}
