use crate::{
    codec::split_path,
    error::{Error, Result},
    model::Model,
    read::query::{ModelQuery, ReadMode},
    store::Store,
};

use aws_sdk_dynamodb::types::AttributeValue;
use serde::de::DeserializeOwned;
use std::cmp::Ordering;

/// Summary of one attribute over the items a query matches.
///
/// Values are taken as the model sees them: after converters and with
/// encrypted fields opened. Sums and averages only count numbers; the
/// minimum and maximum compare numbers, strings or binaries, and refuse a
/// mix of them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregate {
    /// Matching items.
    pub count: usize,
    /// Items whose value is a number.
    pub numeric: usize,
    /// Sum of the numeric values.
    pub sum: f64,
    /// Smallest value, if any item has one.
    pub min: Option<AttributeValue>,
    /// Largest value, if any item has one.
    pub max: Option<AttributeValue>,
}

fn number(field: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|err| Error::conversion(field, format!("`{value}` is not a number: {err}")))
}

fn kind(value: &AttributeValue) -> &'static str {
    match value {
        AttributeValue::N(_) => "a number",
        AttributeValue::S(_) => "a string",
        _ => "a binary",
    }
}

fn compare(field: &str, left: &AttributeValue, right: &AttributeValue) -> Result<Ordering> {
    match (left, right) {
        (AttributeValue::N(left), AttributeValue::N(right)) => {
            Ok(number(field, left)?.total_cmp(&number(field, right)?))
        }
        (AttributeValue::S(left), AttributeValue::S(right)) => Ok(left.cmp(right)),
        (AttributeValue::B(left), AttributeValue::B(right)) => {
            Ok(left.as_ref().cmp(right.as_ref()))
        }
        _ => Err(Error::conversion(
            field,
            format!("cannot compare {} with {}", kind(left), kind(right)),
        )),
    }
}

impl Aggregate {
    /// Mean of the numeric values; `None` without any.
    pub fn average(&self) -> Option<f64> {
        (self.numeric > 0).then(|| self.sum / self.numeric as f64)
    }

    fn push(&mut self, field: &str, value: Option<&AttributeValue>) -> Result<()> {
        self.count += 1;
        let Some(value) = value else {
            return Ok(());
        };
        if let AttributeValue::N(amount) = value {
            self.sum += number(field, amount)?;
            self.numeric += 1;
        }
        if !matches!(
            value,
            AttributeValue::N(_) | AttributeValue::S(_) | AttributeValue::B(_)
        ) {
            return Ok(());
        }
        let smallest = match &self.min {
            Some(min) => compare(field, value, min)?.is_lt(),
            None => true,
        };
        if smallest {
            self.min = Some(value.clone());
        }
        let largest = match &self.max {
            Some(max) => compare(field, value, max)?.is_gt(),
            None => true,
        };
        if largest {
            self.max = Some(value.clone());
        }
        Ok(())
    }
}

impl<M: Model, S: Store> ModelQuery<M, S> {
    /// Count, sum, average, minimum and maximum of the top-level `field`
    /// over every matching item, up to the limit.
    ///
    /// Only `field` is read back. The items are aggregated client-side, so
    /// the read costs what [`all`](Self::all) costs.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(name = "dynamodb_mapper.aggregate", skip_all, err)
    )]
    pub async fn aggregate(mut self, field: &str) -> Result<Aggregate> {
        self.take_error()?;
        let (name, rest) = split_path(field);
        if name.is_empty() || !rest.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "aggregates need a top-level field, found `{field}`"
            )));
        }
        let metadata = self.db.metadata::<M>()?;
        let encryptor = self.db.encryptor(&metadata)?;
        self.projection = vec![field.to_string()];
        let items = self
            .read_items(&metadata, ReadMode::Auto, self.limit)
            .await?;

        let mut aggregate = Aggregate::default();
        for item in items {
            let logical = self.db.decode_logical(&metadata, encryptor, item).await?;
            aggregate.push(field, logical.get(field))?;
        }
        Ok(aggregate)
    }

    /// Sum of the numeric values of `field`; zero without any.
    pub async fn sum(self, field: &str) -> Result<f64> {
        Ok(self.aggregate(field).await?.sum)
    }

    /// Mean of the numeric values of `field`; `None` without any.
    pub async fn average(self, field: &str) -> Result<Option<f64>> {
        Ok(self.aggregate(field).await?.average())
    }

    /// Smallest value of `field`; `None` when no item has one.
    pub async fn min<T: DeserializeOwned>(self, field: &str) -> Result<Option<T>> {
        let value = self.aggregate(field).await?.min;
        Ok(value.map(serde_dynamo::from_attribute_value).transpose()?)
    }

    /// Largest value of `field`; `None` when no item has one.
    pub async fn max<T: DeserializeOwned>(self, field: &str) -> Result<Option<T>> {
        let value = self.aggregate(field).await?.max;
        Ok(value.map(serde_dynamo::from_attribute_value).transpose()?)
    }
}
