//! The store capability consumed by the mapper.
//!
//! [`Store`] is the seam between the query engine and the network. It is
//! implemented for [`aws_sdk_dynamodb::Client`]; tests provide an in-memory
//! implementation.

use aws_sdk_dynamodb::{Client, error, operation};
use std::future::Future;

use operation::{
    batch_get_item::{BatchGetItemInput, BatchGetItemOutput},
    batch_write_item::{BatchWriteItemInput, BatchWriteItemOutput},
    delete_item::{DeleteItemError, DeleteItemInput, DeleteItemOutput},
    get_item::{GetItemInput, GetItemOutput},
    put_item::{PutItemError, PutItemInput, PutItemOutput},
    query::{QueryInput, QueryOutput},
    scan::{ScanInput, ScanOutput},
    transact_get_items::{TransactGetItemsInput, TransactGetItemsOutput},
    transact_write_items::{TransactWriteItemsError, TransactWriteItemsInput, TransactWriteItemsOutput},
    update_item::{UpdateItemError, UpdateItemInput, UpdateItemOutput},
};

/// Cancellation code reported for a transaction item whose guard failed.
pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

/// Failure reported by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A condition expression evaluated to false.
    #[error("conditional check failed")]
    ConditionalCheckFailed,
    /// A transaction was canceled; one code per operation.
    #[error("transaction canceled: {reasons:?}")]
    TransactionCanceled {
        /// Cancellation codes in request order.
        reasons: Vec<Option<String>>,
    },
    /// Any other failure.
    #[error(transparent)]
    Service(Box<dyn std::error::Error + Send + Sync>),
}

type StoreResult<T> = Result<T, StoreError>;

/// The key-value store operations the mapper relies on.
pub trait Store: Send + Sync + 'static {
    /// Reads one item by key.
    fn get_item(&self, input: GetItemInput)
    -> impl Future<Output = StoreResult<GetItemOutput>> + Send;

    /// Creates or replaces one item.
    fn put_item(&self, input: PutItemInput)
    -> impl Future<Output = StoreResult<PutItemOutput>> + Send;

    /// Applies an update expression to one item.
    fn update_item(
        &self,
        input: UpdateItemInput,
    ) -> impl Future<Output = StoreResult<UpdateItemOutput>> + Send;

    /// Deletes one item by key.
    fn delete_item(
        &self,
        input: DeleteItemInput,
    ) -> impl Future<Output = StoreResult<DeleteItemOutput>> + Send;

    /// Reads one page of items sharing a partition key.
    fn query(&self, input: QueryInput) -> impl Future<Output = StoreResult<QueryOutput>> + Send;

    /// Reads one page of a table or index scan.
    fn scan(&self, input: ScanInput) -> impl Future<Output = StoreResult<ScanOutput>> + Send;

    /// Reads up to 100 items by key.
    fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> impl Future<Output = StoreResult<BatchGetItemOutput>> + Send;

    /// Writes up to 25 put or delete requests.
    fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> impl Future<Output = StoreResult<BatchWriteItemOutput>> + Send;

    /// Reads items atomically.
    fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> impl Future<Output = StoreResult<TransactGetItemsOutput>> + Send;

    /// Writes items atomically.
    fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> impl Future<Output = StoreResult<TransactWriteItemsOutput>> + Send;
}

fn service<E>(err: error::SdkError<E>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Service(Box::new(err))
}

fn put_item_error(err: error::SdkError<PutItemError>) -> StoreError {
    match &err {
        error::SdkError::ServiceError(service_err)
            if matches!(
                service_err.err(),
                PutItemError::ConditionalCheckFailedException(_)
            ) =>
        {
            StoreError::ConditionalCheckFailed
        }
        _ => service(err),
    }
}

fn update_item_error(err: error::SdkError<UpdateItemError>) -> StoreError {
    match &err {
        error::SdkError::ServiceError(service_err)
            if matches!(
                service_err.err(),
                UpdateItemError::ConditionalCheckFailedException(_)
            ) =>
        {
            StoreError::ConditionalCheckFailed
        }
        _ => service(err),
    }
}

fn delete_item_error(err: error::SdkError<DeleteItemError>) -> StoreError {
    match &err {
        error::SdkError::ServiceError(service_err)
            if matches!(
                service_err.err(),
                DeleteItemError::ConditionalCheckFailedException(_)
            ) =>
        {
            StoreError::ConditionalCheckFailed
        }
        _ => service(err),
    }
}

fn transact_write_items_error(err: error::SdkError<TransactWriteItemsError>) -> StoreError {
    if let error::SdkError::ServiceError(service_err) = &err {
        if let TransactWriteItemsError::TransactionCanceledException(canceled) = service_err.err() {
            let reasons = canceled
                .cancellation_reasons()
                .iter()
                .map(|reason| reason.code().map(str::to_string))
                .collect();
            return StoreError::TransactionCanceled { reasons };
        }
    }
    service(err)
}

impl Store for Client {
    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput> {
        self.get_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_consistent_read(input.consistent_read)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(service)
    }

    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput> {
        self.put_item()
            .set_table_name(input.table_name)
            .set_item(input.item)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_values_on_condition_check_failure(
                input.return_values_on_condition_check_failure,
            )
            .send()
            .await
            .map_err(put_item_error)
    }

    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput> {
        self.update_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_update_expression(input.update_expression)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_values_on_condition_check_failure(
                input.return_values_on_condition_check_failure,
            )
            .send()
            .await
            .map_err(update_item_error)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput> {
        self.delete_item()
            .set_table_name(input.table_name)
            .set_key(input.key)
            .set_condition_expression(input.condition_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_return_values(input.return_values)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(delete_item_error)
    }

    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput> {
        self.query()
            .set_table_name(input.table_name)
            .set_index_name(input.index_name)
            .set_key_condition_expression(input.key_condition_expression)
            .set_filter_expression(input.filter_expression)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_exclusive_start_key(input.exclusive_start_key)
            .set_consistent_read(input.consistent_read)
            .set_scan_index_forward(input.scan_index_forward)
            .set_select(input.select)
            .set_limit(input.limit)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(service)
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput> {
        self.scan()
            .set_table_name(input.table_name)
            .set_index_name(input.index_name)
            .set_filter_expression(input.filter_expression)
            .set_projection_expression(input.projection_expression)
            .set_expression_attribute_names(input.expression_attribute_names)
            .set_expression_attribute_values(input.expression_attribute_values)
            .set_exclusive_start_key(input.exclusive_start_key)
            .set_consistent_read(input.consistent_read)
            .set_segment(input.segment)
            .set_total_segments(input.total_segments)
            .set_select(input.select)
            .set_limit(input.limit)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(service)
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput> {
        self.batch_get_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(service)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> StoreResult<BatchWriteItemOutput> {
        self.batch_write_item()
            .set_request_items(input.request_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_item_collection_metrics(input.return_item_collection_metrics)
            .send()
            .await
            .map_err(service)
    }

    async fn transact_get_items(
        &self,
        input: TransactGetItemsInput,
    ) -> StoreResult<TransactGetItemsOutput> {
        self.transact_get_items()
            .set_transact_items(input.transact_items)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .send()
            .await
            .map_err(service)
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> StoreResult<TransactWriteItemsOutput> {
        self.transact_write_items()
            .set_transact_items(input.transact_items)
            .set_client_request_token(input.client_request_token)
            .set_return_consumed_capacity(input.return_consumed_capacity)
            .set_return_item_collection_metrics(input.return_item_collection_metrics)
            .send()
            .await
            .map_err(transact_write_items_error)
    }
}
