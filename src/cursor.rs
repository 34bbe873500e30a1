//! Opaque pagination cursors.
//!
//! A cursor is the URL-safe base64 form of a small versioned JSON document
//! holding the last evaluated key in tagged form, the index it belongs to and
//! the sort direction of the read that produced it.

use crate::{
    codec::{Item, json},
    error::{Error, Result},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

const CURSOR_VERSION: u32 = 1;

/// Order of results along the sort key.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest sort key first.
    #[default]
    Ascending,
    /// Largest sort key first.
    Descending,
}

impl SortDirection {
    pub(crate) fn scan_index_forward(self) -> bool {
        self == Self::Ascending
    }
}

#[derive(Deserialize, Serialize)]
struct CursorDocument {
    v: u32,
    #[serde(rename = "lastKey")]
    last_key: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<String>,
    #[serde(default)]
    sort: SortDirection,
}

/// Resumable position of a paginated read.
///
/// ```rust
/// use aws_sdk_dynamodb::types::AttributeValue;
/// use dynamodb_mapper::cursor::{Cursor, SortDirection};
/// use std::collections::HashMap;
///
/// let cursor = Cursor {
///     last_evaluated_key: HashMap::from([("id".to_string(), AttributeValue::S("u-9".to_string()))]),
///     index: None,
///     sort: SortDirection::Ascending,
/// };
/// let token = cursor.encode().unwrap();
/// assert_eq!(Cursor::decode(&token).unwrap(), cursor);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cursor {
    /// Key of the last item read, in wire form.
    pub last_evaluated_key: Item,
    /// Index read, if any.
    pub index: Option<String>,
    /// Sort direction of the read.
    pub sort: SortDirection,
}

impl Cursor {
    /// Whether the cursor points at the start of the results.
    pub fn is_start(&self) -> bool {
        self.last_evaluated_key.is_empty()
    }

    /// Opaque string form; empty for a cursor at the start.
    pub fn encode(&self) -> Result<String> {
        if self.is_start() {
            return Ok(String::new());
        }
        let last_key = json::to_tagged_map(&self.last_evaluated_key)
            .map_err(|err| Error::InvalidCursor(err.to_string()))?;
        let document = CursorDocument {
            v: CURSOR_VERSION,
            last_key,
            index: self.index.clone(),
            sort: self.sort,
        };
        let json = serde_json::to_vec(&document)
            .map_err(|err| Error::InvalidCursor(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parses an opaque string; the empty string is the start.
    pub fn decode(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Ok(Self::default());
        }
        let json = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| Error::InvalidCursor(format!("not base64: {err}")))?;
        let document: CursorDocument = serde_json::from_slice(&json)
            .map_err(|err| Error::InvalidCursor(format!("malformed document: {err}")))?;
        if document.v != CURSOR_VERSION {
            return Err(Error::InvalidCursor(format!(
                "unsupported version {}",
                document.v
            )));
        }
        let last_evaluated_key = json::from_tagged_map(&document.last_key)
            .map_err(|err| Error::InvalidCursor(err.to_string()))?;
        Ok(Self {
            last_evaluated_key,
            index: document.index,
            sort: document.sort,
        })
    }

    /// Fails unless the cursor was produced by a read of `index`.
    pub(crate) fn check_index(&self, index: Option<&str>) -> Result<()> {
        if self.is_start() || self.index.as_deref() == index {
            return Ok(());
        }
        Err(Error::InvalidCursor(format!(
            "cursor belongs to index {:?}, not {index:?}",
            self.index
        )))
    }
}
