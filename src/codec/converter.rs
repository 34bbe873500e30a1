use aws_sdk_dynamodb::types::AttributeValue;
use parking_lot::RwLock;
use std::{any, collections, error, fmt, sync::Arc};

/// Failure reported by an [`AttributeConverter`].
pub type ConvertError = Box<dyn error::Error + Send + Sync>;

/// Custom wire representation of a host type.
///
/// Converters receive the value serde produced for the field and return the
/// value to store, and the reverse on reads. They are looked up by the host
/// type a field declares with [`crate::model::field::Field::typed`], and run
/// on every path that writes or compares the field.
pub trait AttributeConverter: Send + Sync {
    /// Serde value to stored value.
    fn encode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError>;

    /// Stored value to serde value.
    fn decode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError>;
}

/// Stores any value as a single JSON string attribute.
///
/// ```rust
/// use aws_sdk_dynamodb::types::AttributeValue;
/// use dynamodb_mapper::codec::converter::{AttributeConverter, JsonConverter};
/// use std::collections::HashMap;
///
/// let value = AttributeValue::M(HashMap::from([(
///     "theme".to_string(),
///     AttributeValue::S("dark".to_string()),
/// )]));
/// let stored = JsonConverter.encode(value.clone()).unwrap();
/// assert_eq!(stored, AttributeValue::S(r#"{"theme":"dark"}"#.to_string()));
/// assert_eq!(JsonConverter.decode(stored).unwrap(), value);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonConverter;

impl AttributeConverter for JsonConverter {
    fn encode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError> {
        if matches!(value, AttributeValue::Null(_)) {
            return Ok(value);
        }
        let json: serde_json::Value = serde_dynamo::from_attribute_value(value)?;
        Ok(AttributeValue::S(serde_json::to_string(&json)?))
    }

    fn decode(&self, value: AttributeValue) -> Result<AttributeValue, ConvertError> {
        match value {
            AttributeValue::S(json) => {
                let json: serde_json::Value = serde_json::from_str(&json)?;
                Ok(serde_dynamo::to_attribute_value(json)?)
            }
            AttributeValue::Null(_) => Ok(value),
            other => Err(format!("expected a JSON string, found {other:?}").into()),
        }
    }
}

/// Converters by host type.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: Arc<RwLock<collections::HashMap<any::TypeId, Arc<dyn AttributeConverter>>>>,
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.converters.read().len())
            .finish()
    }
}

impl ConverterRegistry {
    /// Registers `converter` for fields declared with host type `T`.
    pub fn register<T: 'static>(&self, converter: impl AttributeConverter + 'static) {
        self.converters
            .write()
            .insert(any::TypeId::of::<T>(), Arc::new(converter));
    }

    /// Converter registered for `type_id`.
    pub fn get(&self, type_id: any::TypeId) -> Option<Arc<dyn AttributeConverter>> {
        self.converters.read().get(&type_id).cloned()
    }
}
