//! In-process backend.
//!
//! Users, table rows and stored objects live in memory behind a single lock.
//! Every select is recorded so callers can assert exactly which window a
//! facade asked for. Semantics follow the hosted service where the
//! storefront depends on them: inserts assign ids and timestamps, uploads
//! refuse to clobber unless `upsert` is set, `%` is the `ILIKE` wildcard.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::{cmp::Ordering, collections::HashMap};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{AuthApi, BackendResult, Filter, ObjectStoreApi, Query, QueryApi, Rows};
use crate::{
    errors::BackendError,
    models::{
        session::{AuthChange, Session, User},
        upload::{StoredObject, UploadOptions},
    },
};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const EVENT_CAPACITY: usize = 64;
const DEFAULT_PUBLIC_BASE: &str = "http://localhost:54321";

#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: User,
}

/// A stored object payload and the headers it was uploaded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
    pub etag: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    tables: HashMap<String, Vec<Value>>,
    objects: HashMap<(String, String), StoredBlob>,
    queries: Vec<(String, Query)>,
    reset_requests: Vec<(String, Option<String>)>,
    upload_failure: Option<String>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Simulated backend.
pub struct MemoryBackend {
    state: RwLock<State>,
    events: broadcast::Sender<AuthChange>,
    public_base: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_public_base(DEFAULT_PUBLIC_BASE)
    }

    /// Use `base` as the origin of generated public URLs.
    pub fn with_public_base(base: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
            public_base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Register an account that can sign in with `email`/`password`.
    pub fn add_user(&self, email: &str, password: &str) -> User {
        self.add_user_with_metadata(email, password, Value::Null)
    }

    pub fn add_user_with_metadata(&self, email: &str, password: &str, metadata: Value) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            user_metadata: metadata,
            app_metadata: Value::Null,
        };
        self.state.write().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Insert rows verbatim (ids and timestamps included).
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        self.state
            .write()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .read()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Every select issued so far, oldest first.
    pub fn queries(&self) -> Vec<(String, Query)> {
        self.state.read().queries.clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredBlob> {
        self.state
            .read()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn reset_requests(&self) -> Vec<(String, Option<String>)> {
        self.state.read().reset_requests.clone()
    }

    /// Make every following upload fail with `reason` (403), or clear with `None`.
    pub fn fail_uploads(&self, reason: Option<&str>) {
        self.state.write().upload_failure = reason.map(str::to_string);
    }

    fn emit(&self, change: AuthChange) {
        // No receivers is fine.
        let _ = self.events.send(change);
    }

    /// Strictly increasing creation timestamps, so "newest first" never ties.
    fn next_created_at(state: &mut State) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match state.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        state.last_created_at = Some(stamp);
        stamp
    }
}

#[async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let session = {
            let mut state = self.state.write();
            let account = state
                .accounts
                .get(&email.to_ascii_lowercase())
                .filter(|account| account.password == password)
                .cloned()
                .ok_or_else(|| BackendError::api(400, "Invalid login credentials"))?;
            let session = issue_session(account.user);
            state.session = Some(session.clone());
            session
        };
        self.emit(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.state.write().session = None;
        self.emit(AuthChange::SignedOut);
        Ok(())
    }

    async fn session(&self) -> BackendResult<Option<Session>> {
        Ok(self.state.read().session.clone())
    }

    async fn user(&self) -> BackendResult<Option<User>> {
        Ok(self.state.read().session.as_ref().map(|s| s.user.clone()))
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let session = {
            let mut state = self.state.write();
            let current = state
                .session
                .take()
                .ok_or_else(|| BackendError::api(401, "Auth session missing"))?;
            let refreshed = issue_session(current.user);
            state.session = Some(refreshed.clone());
            refreshed
        };
        self.emit(AuthChange::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> BackendResult<()> {
        // Unknown addresses succeed too, so the call cannot probe for accounts.
        self.state
            .write()
            .reset_requests
            .push((email.to_string(), redirect_to.map(str::to_string)));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl QueryApi for MemoryBackend {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Rows> {
        let mut state = self.state.write();
        state.queries.push((table.to_string(), query.clone()));

        let mut matched: Vec<Value> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let total = matched.len() as u64;

        if let Some(order) = &query.order {
            matched.sort_by(|a, b| {
                let ord = compare_values(column(a, &order.column), column(b, &order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        let rows = match &query.range {
            Some(range) => matched
                .into_iter()
                .skip(usize::try_from(*range.start()).unwrap_or(usize::MAX))
                .take(
                    usize::try_from(range.end().saturating_sub(*range.start()).saturating_add(1))
                        .unwrap_or(usize::MAX),
                )
                .collect(),
            None => matched,
        };
        debug!(table, returned = rows.len(), total, "memory select");

        Ok(Rows {
            rows,
            total: query.count.then_some(total),
        })
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value> {
        let Value::Object(mut fields) = row else {
            return Err(BackendError::api(400, "insert payload must be a JSON object"));
        };

        let mut state = self.state.write();
        let id = fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();
        if !fields.contains_key("created_at") {
            let stamp = Self::next_created_at(&mut state);
            fields.insert(
                "created_at".into(),
                Value::String(stamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }

        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|existing| existing.get("id") == Some(&id)) {
            return Err(BackendError::api(
                409,
                format!("duplicate key value violates unique constraint on {table}.id"),
            ));
        }
        let stored = Value::Object(fields);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> BackendResult<Vec<Value>> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::api(400, "update payload must be a JSON object"));
        };

        let mut state = self.state.write();
        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, filters)) {
                if let Value::Object(fields) = row {
                    merge(fields, &patch);
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()> {
        if let Some(rows) = self.state.write().tables.get_mut(table) {
            rows.retain(|row| !matches_all(row, filters));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreApi for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<StoredObject> {
        ensure_key_safe(key)?;

        let mut state = self.state.write();
        if let Some(reason) = &state.upload_failure {
            return Err(BackendError::api(403, reason.clone()));
        }

        let slot = (bucket.to_string(), key.to_string());
        if !options.upsert && state.objects.contains_key(&slot) {
            return Err(BackendError::Conflict(key.to_string()));
        }

        let etag = format!("{:x}", md5::compute(&body));
        let size_bytes = body.len() as u64;
        state.objects.insert(
            slot,
            StoredBlob {
                bytes: body,
                content_type: options.content_type.clone(),
                cache_control: options.cache_control.clone(),
                etag: etag.clone(),
            },
        );

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: Some(etag),
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.public_base, bucket, key
        )
    }
}

fn issue_session(user: User) -> Session {
    Session {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Some(Uuid::new_v4().simple().to_string()),
        expires_in: Some(3600),
        token_type: Some("bearer".into()),
        user,
    }
}

/// Rejects keys that are empty, too long, absolute, or try to climb out of the bucket.
fn ensure_key_safe(key: &str) -> BackendResult<()> {
    let unsafe_key = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if unsafe_key {
        return Err(BackendError::api(400, format!("invalid object key `{key}`")));
    }
    Ok(())
}

fn column<'a>(row: &'a Value, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&Value::Null)
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| match filter {
        Filter::Eq(col, expected) => column(row, col) == expected,
        Filter::ILike(col, pattern) => column(row, col)
            .as_str()
            .is_some_and(|text| ilike(text, pattern)),
        Filter::Contains(col, wanted) => column(row, col)
            .as_array()
            .is_some_and(|have| wanted.iter().all(|w| have.contains(w))),
    })
}

/// Case-insensitive match where `%` stands for any run of characters.
fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last)
    {
        return false;
    }
    let mut rest = &text[first.len()..text.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn merge(fields: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        // Ids are backend-owned.
        if key != "id" {
            fields.insert(key.clone(), value.clone());
        }
    }
}
