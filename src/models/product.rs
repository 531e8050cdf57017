//! Product catalog records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A product row as stored by the backend.
///
/// Columns the storefront does not interpret (price, description, image
/// URLs, ...) are kept in `extra` and passed through untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    /// Assigned by the backend on insert.
    pub id: Uuid,

    pub name: String,

    /// Hex color codes the product is available in.
    #[serde(default)]
    pub colors: Vec<String>,

    /// Whether the product is listed on the public storefront.
    #[serde(default)]
    pub is_public: bool,

    pub created_at: DateTime<Utc>,

    /// User that created the record, if it was created while signed in.
    #[serde(default)]
    pub created_by: Option<Uuid>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Insert payload. Never carries an id.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewProduct {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn colors<I, S>(mut self, colors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.colors = colors.into_iter().map(Into::into).collect();
        self
    }

    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Partial update. Only fields that are set are sent.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProductPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProductPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.colors.is_none() && self.is_public.is_none() && self.extra.is_empty()
    }
}

/// Listing filters. Unset paging fields fall back to the listing's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilters {
    pub color: Option<String>,
    pub search: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
}
