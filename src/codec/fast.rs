//! Offset-based encoding of flat models made of primitive fields.
//!
//! A [`FieldLayout`] records, for each field, its byte offset inside the
//! model and a reader for its primitive type. Encoding reads the fields in
//! place instead of running the serde serializer. Layouts are built with
//! [`field_layout!`](crate::field_layout), which checks every declared type
//! against the struct at compile time, and are only used once
//! [`FieldLayout::verify`] has shown they produce the same attribute map as
//! serde for a sample value.

use crate::{
    codec::Item,
    error::{Error, Result},
    model::Model,
};

use aws_sdk_dynamodb::types::AttributeValue;
use std::{fmt, marker::PhantomData};

mod sealed {
    pub trait Sealed {}
}

/// Field types a [`FieldLayout`] can read in place.
pub trait FastPrimitive: sealed::Sealed + 'static {
    /// Attribute value of the field, matching the serde output.
    fn to_attribute_value(&self) -> AttributeValue;
}

macro_rules! number_primitive {
    ($($ty:ty),*) => {
        $(
            impl sealed::Sealed for $ty {}

            impl FastPrimitive for $ty {
                fn to_attribute_value(&self) -> AttributeValue {
                    AttributeValue::N(self.to_string())
                }
            }
        )*
    };
}

number_primitive!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl sealed::Sealed for bool {}

impl FastPrimitive for bool {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::Bool(*self)
    }
}

impl sealed::Sealed for String {}

impl FastPrimitive for String {
    fn to_attribute_value(&self) -> AttributeValue {
        AttributeValue::S(self.clone())
    }
}

/// Reads the `T` at `field` and converts it.
///
/// # Safety
///
/// `field` must point to a live, initialized `T`.
unsafe fn read<T: FastPrimitive>(field: *const u8) -> AttributeValue {
    // SAFETY: guaranteed by the caller.
    let value = unsafe { &*field.cast::<T>() };
    value.to_attribute_value()
}

struct Slot {
    name: &'static str,
    offset: usize,
    read: unsafe fn(*const u8) -> AttributeValue,
}

/// Byte offsets and readers of the fields of `M`.
pub struct FieldLayout<M> {
    slots: Vec<Slot>,
    _model: PhantomData<fn(&M)>,
}

impl<M> fmt::Debug for FieldLayout<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| (slot.name, slot.offset)))
            .finish()
    }
}

impl<M> Default for FieldLayout<M> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            _model: PhantomData,
        }
    }
}

impl<M: Model> FieldLayout<M> {
    /// An empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the field `name` of type `T` at `offset`.
    ///
    /// # Safety
    ///
    /// `M` must have a field of type `T` at byte offset `offset`. Use
    /// [`field_layout!`](crate::field_layout), which derives both from the
    /// struct definition.
    #[doc(hidden)]
    pub unsafe fn with_field<T: FastPrimitive>(mut self, name: &'static str, offset: usize) -> Self {
        self.slots.push(Slot {
            name,
            offset,
            read: read::<T>,
        });
        self
    }

    /// Logical attribute map of `model`.
    pub fn encode(&self, model: &M) -> Item {
        let base = std::ptr::from_ref(model).cast::<u8>();
        self.slots
            .iter()
            .map(|slot| {
                // SAFETY: `with_field` callers guarantee a `T` lives at
                // `offset` inside every `M`, and `model` is a live reference.
                let value = unsafe { (slot.read)(base.add(slot.offset)) };
                (slot.name.to_string(), value)
            })
            .collect()
    }

    /// Checks the layout against serde on `sample`.
    ///
    /// Fails unless both produce exactly the same attribute map, which rejects
    /// layouts that miss fields, ignore serde renames or cover non-primitive
    /// fields.
    pub fn verify(self, sample: &M) -> Result<VerifiedLayout<M>> {
        let expected: Item = serde_dynamo::to_item(sample)?;
        let actual = self.encode(sample);
        if actual != expected {
            let mut mismatched: Vec<_> = expected
                .keys()
                .chain(actual.keys())
                .filter(|name| expected.get(*name) != actual.get(*name))
                .cloned()
                .collect();
            mismatched.sort();
            mismatched.dedup();
            return Err(Error::InvalidModel {
                model: std::any::type_name::<M>(),
                reason: format!(
                    "field layout does not match serde for: {}",
                    mismatched.join(", ")
                ),
            });
        }
        Ok(VerifiedLayout(self))
    }
}

/// A [`FieldLayout`] that matched serde on a sample value.
#[derive(Debug)]
pub struct VerifiedLayout<M>(FieldLayout<M>);

impl<M: Model> VerifiedLayout<M> {
    /// Logical attribute map of `model`.
    pub fn encode(&self, model: &M) -> Item {
        self.0.encode(model)
    }
}

/// Builds a [`FieldLayout`] from a struct and its primitive fields.
///
/// ```rust
/// use dynamodb_mapper::{field_layout, model::{Model, ModelSchema, field::Field}};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct Counter {
///     id: String,
///     hits: u64,
/// }
///
/// impl Model for Counter {
///     fn schema() -> ModelSchema {
///         ModelSchema::new("counters").field(Field::new("id").partition_key())
///     }
/// }
///
/// let sample = Counter { id: "c".to_string(), hits: 1 };
/// let layout = field_layout!(Counter { id: String, hits: u64 }).verify(&sample).unwrap();
/// assert_eq!(layout.encode(&sample).len(), 2);
/// ```
#[macro_export]
macro_rules! field_layout {
    ($model:ty { $($field:ident : $ty:ty),* $(,)? }) => {{
        let layout = $crate::codec::fast::FieldLayout::<$model>::new();
        $(
            let _: fn(&$model) -> &$ty = |model| &model.$field;
            // SAFETY: the offset comes from `offset_of!` on the same field whose
            // type was checked just above.
            let layout = unsafe {
                layout.with_field::<$ty>(
                    stringify!($field),
                    ::core::mem::offset_of!($model, $field),
                )
            };
        )*
        layout
    }};
}
