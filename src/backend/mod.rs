//! The remote service boundary.
//!
//! The storefront never talks to a database or a disk directly. Everything goes
//! through a [`Backend`]: credential-based sessions ([`AuthApi`]), filtered and
//! paginated table queries ([`QueryApi`]) and keyed object storage
//! ([`ObjectStoreApi`]).
//!
//! - [`http::HttpBackend`] speaks the Supabase-style REST endpoints.
//! - [`memory::MemoryBackend`] keeps everything in process for tests and local work.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::ops::RangeInclusive;
use tokio::sync::broadcast;

use crate::{
    errors::BackendError,
    models::{
        session::{AuthChange, Session, User},
        upload::{StoredObject, UploadOptions},
    },
};

pub mod http;
pub mod memory;

pub type BackendResult<T> = Result<T, BackendError>;

/// Row filter understood by the query capability.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// Case-insensitive `LIKE`; `%` matches any run of characters.
    ILike(String, String),
    /// Array column contains every listed value.
    Contains(String, Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A `SELECT *` against one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    /// Zero-based inclusive row window.
    pub range: Option<RangeInclusive<u64>>,
    /// Ask the backend for the total number of matching rows.
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn ilike(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column.into(), pattern.into()));
        self
    }

    pub fn contains(mut self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filters.push(Filter::Contains(column.into(), values));
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some(from..=to);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }
}

/// Rows returned by a select, plus the exact total when it was requested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub rows: Vec<Value>,
    pub total: Option<u64>,
}

#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Current session, `None` when signed out.
    async fn session(&self) -> BackendResult<Option<Session>>;

    /// Fetch the user behind the current session from the auth service.
    async fn user(&self) -> BackendResult<Option<User>>;

    async fn refresh_session(&self) -> BackendResult<Session>;

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> BackendResult<()>;

    /// Stream of session transitions.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

#[async_trait]
pub trait QueryApi: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Rows>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value>;

    /// Apply `patch` to every row matching `filters`; returns the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value)
    -> BackendResult<Vec<Value>>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()>;
}

#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<StoredObject>;

    /// Public retrieval URL for `key`. Pure string work, no I/O.
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// Everything the facades need from the remote service.
pub trait Backend: AuthApi + QueryApi + ObjectStoreApi {}

impl<T: AuthApi + QueryApi + ObjectStoreApi> Backend for T {}
