mod support;

use aws_sdk_dynamodb::types::AttributeValue;
use dynamodb_mapper::{
    Db, Error, Model,
    codec::converter::{AttributeConverter, ConvertError, JsonConverter},
    common::{condition::Condition, key::Keys},
    model::{ModelSchema, field::Field},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use support::{Item, MemoryStore, n, s};

/// Host type of prices stored as whole cents.
struct Cents;

impl AttributeConverter for Cents {
    fn encode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError> {
        let AttributeValue::N(amount) = value else {
            return Err(format!("expected a number, found {value:?}").into());
        };
        let cents = (amount.parse::<f64>()? * 100.0).round() as i64;
        Ok(AttributeValue::N(cents.to_string()))
    }

    fn decode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError> {
        let AttributeValue::N(cents) = value else {
            return Err(format!("expected a number, found {value:?}").into());
        };
        let amount = cents.parse::<i64>()? as f64 / 100.0;
        Ok(AttributeValue::N(amount.to_string()))
    }
}

struct Json;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Listing {
    id: String,
    price: f64,
    attributes: BTreeMap<String, String>,
}

impl Model for Listing {
    fn schema() -> ModelSchema {
        ModelSchema::new("listings")
            .field(Field::new("id").partition_key())
            .field(Field::new("price").typed::<Cents>())
            .field(Field::new("attributes").typed::<Json>())
    }
}

fn listing(id: &str, price: f64) -> Listing {
    Listing {
        id: id.to_string(),
        price,
        attributes: BTreeMap::from([("color".to_string(), "red".to_string())]),
    }
}

fn setup() -> (MemoryStore, Db<MemoryStore>) {
    let store = MemoryStore::new().table("listings", "id", None);
    let db = Db::builder(store.clone())
        .converter::<Cents>(Cents)
        .converter::<Json>(JsonConverter)
        .build();
    (store, db)
}

fn key(id: &str) -> Item {
    Item::from([("id".to_string(), s(id))])
}

#[tokio::test]
async fn test_converted_on_write_and_read() {
    let (store, db) = setup();
    db.create(&mut listing("l-1", 12.5)).await.unwrap();
    let stored = store.item("listings", &key("l-1")).unwrap();
    assert_eq!(stored.get("price"), Some(&n(1250)));
    assert_eq!(stored.get("attributes"), Some(&s(r#"{"color":"red"}"#)));

    let fetched: Listing = db.get(Keys::partition("l-1")).await.unwrap();
    assert_eq!(fetched, listing("l-1", 12.5));
}

#[tokio::test]
async fn test_converted_in_conditions() {
    let (_, db) = setup();
    db.batch_create(&[listing("l-1", 12.5), listing("l-2", 40.0)])
        .await
        .unwrap();
    let cheap = db
        .model::<Listing>()
        .filter("price", Condition::LessThan(20.0))
        .scan()
        .await
        .unwrap();
    assert_eq!(cheap, vec![listing("l-1", 12.5)]);

    let red = db
        .model::<Listing>()
        .where_("id", Condition::Equals("l-2"))
        .filter(
            "attributes",
            Condition::Equals(BTreeMap::from([("color", "red")])),
        )
        .all()
        .await
        .unwrap();
    assert_eq!(red.len(), 1);
}

#[tokio::test]
async fn test_converted_in_updates() {
    let (store, db) = setup();
    db.create(&mut listing("l-1", 12.5)).await.unwrap();
    let updated: Listing = db
        .model::<Listing>()
        .where_("id", Condition::Equals("l-1"))
        .update_builder()
        .set("price", 30.25)
        .condition("price", Condition::Equals(12.5))
        .fetch_new()
        .await
        .unwrap();
    assert_eq!(updated.price, 30.25);
    let stored = store.item("listings", &key("l-1")).unwrap();
    assert_eq!(stored.get("price"), Some(&n(3025)));
}

#[tokio::test]
async fn test_missing_converter() {
    let store = MemoryStore::new().table("listings", "id", None);
    let db = Db::builder(store.clone()).converter::<Json>(JsonConverter).build();
    let error = db.create(&mut listing("l-1", 1.0)).await.unwrap_err();
    assert!(matches!(error, Error::Conversion { field, .. } if field == "price"));
    assert!(store.calls().is_empty());
}
