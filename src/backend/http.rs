//! REST client for a Supabase-compatible service.
//!
//! - auth:    `POST /auth/v1/token`, `POST /auth/v1/logout`, `GET /auth/v1/user`, `POST /auth/v1/recover`
//! - tables:  `GET|POST|PATCH|DELETE /rest/v1/{table}` with PostgREST filter syntax
//! - storage: `POST /storage/v1/object/{bucket}/{*key}`, public URLs under `/storage/v1/object/public`
//!
//! The current session lives inside the client; data calls carry its access
//! token when signed in and the anon key otherwise.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, header};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{AuthApi, BackendResult, Filter, ObjectStoreApi, Query, QueryApi, Rows};
use crate::{
    config::BackendConfig,
    errors::BackendError,
    models::{
        session::{AuthChange, Session, User},
        upload::{StoredObject, UploadOptions},
    },
};

const EVENT_CAPACITY: usize = 64;

pub struct HttpBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl HttpBackend {
    /// Build a client for an already validated configuration.
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            anon_key: config.anon_key.trim().to_string(),
            session: RwLock::new(None),
            events,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        self.session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Attach the api key and the caller's bearer token.
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.bearer()))
    }

    fn table_url(&self, table: &str) -> String {
        self.url(&format!("/rest/v1/{table}"))
    }

    fn replace_session(&self, session: Option<Session>) {
        *self.session.write() = session;
    }

    fn emit(&self, change: AuthChange) {
        let _ = self.events.send(change);
    }

    async fn token_grant<B: Serialize + ?Sized>(
        &self,
        grant_type: &str,
        body: &B,
    ) -> BackendResult<Session> {
        let response = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.anon_key))
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl AuthApi for HttpBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let session = self
            .token_grant("password", &json!({ "email": email, "password": password }))
            .await?;
        self.replace_session(Some(session.clone()));
        self.emit(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let token = self.session.read().as_ref().map(|s| s.access_token.clone());
        if let Some(token) = token {
            let response = self
                .client
                .post(self.url("/auth/v1/logout"))
                .header("apikey", &self.anon_key)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .send()
                .await?;
            // An already expired token is as signed out as it gets.
            if response.status() != StatusCode::UNAUTHORIZED {
                ensure_success(response).await?;
            }
        }
        self.replace_session(None);
        self.emit(AuthChange::SignedOut);
        Ok(())
    }

    async fn session(&self) -> BackendResult<Option<Session>> {
        Ok(self.session.read().clone())
    }

    async fn user(&self) -> BackendResult<Option<User>> {
        if self.session.read().is_none() {
            return Ok(None);
        }
        let response = self
            .authorized(self.client.get(self.url("/auth/v1/user")))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("session token rejected by auth service");
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    async fn refresh_session(&self) -> BackendResult<Session> {
        let refresh_token = self
            .session
            .read()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or_else(|| BackendError::api(401, "Auth session missing"))?;
        let session = self
            .token_grant("refresh_token", &json!({ "refresh_token": refresh_token }))
            .await?;
        self.replace_session(Some(session.clone()));
        self.emit(AuthChange::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> BackendResult<()> {
        let mut request = self.authorized(self.client.post(self.url("/auth/v1/recover")));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }
        let response = request.json(&json!({ "email": email })).send().await?;
        ensure_success(response).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl QueryApi for HttpBackend {
    async fn select(&self, table: &str, query: &Query) -> BackendResult<Rows> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(&query.filters));
        if let Some(order) = &query.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".into(), format!("{}.{}", order.column, direction)));
        }

        let mut request = self
            .authorized(self.client.get(self.table_url(table)))
            .query(&params);
        if let Some(range) = &query.range {
            request = request
                .header("Range-Unit", "items")
                .header(header::RANGE, format!("{}-{}", range.start(), range.end()));
        }
        if query.count {
            request = request.header("Prefer", "count=exact");
        }
        debug!(table, ?params, range = ?query.range, "select");

        let response = request.send().await?;
        let total = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);
        let rows: Vec<Value> = read_json(response).await?;

        Ok(Rows {
            rows,
            total: if query.count { total } else { None },
        })
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Value> {
        let response = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await?;
        let mut rows: Vec<Value> = read_json(response).await?;
        if rows.len() != 1 {
            return Err(BackendError::api(
                500,
                format!("insert returned {} rows, expected 1", rows.len()),
            ));
        }
        Ok(rows.remove(0))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> BackendResult<Vec<Value>> {
        let response = self
            .authorized(self.client.patch(self.table_url(table)))
            .query(&filter_params(filters))
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        read_json(response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()> {
        let response = self
            .authorized(self.client.delete(self.table_url(table)))
            .query(&filter_params(filters))
            .send()
            .await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl ObjectStoreApi for HttpBackend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<StoredObject> {
        let size_bytes = body.len() as u64;
        let response = self
            .authorized(self.client.post(self.object_url(&[bucket], key)))
            .header(header::CONTENT_TYPE, &options.content_type)
            .header(header::CACHE_CONTROL, &options.cache_control)
            .header("x-upsert", if options.upsert { "true" } else { "false" })
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // Hosted storage reports duplicates as a 400 with the real code in the body.
            if status == StatusCode::CONFLICT || is_duplicate(&text) {
                return Err(BackendError::Conflict(key.to_string()));
            }
            return Err(BackendError::api(status.as_u16(), error_message(&text)));
        }
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag,
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        self.object_url(&["public", bucket], key)
    }
}

impl HttpBackend {
    /// `/storage/v1/object/<prefix..>/<key>` with every segment percent-encoded.
    fn object_url(&self, prefix: &[&str], key: &str) -> String {
        let raw = self.url("/storage/v1/object");
        let Ok(mut url) = Url::parse(&raw) else {
            return format!("{raw}/{}/{key}", prefix.join("/"));
        };
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(prefix).extend(key.split('/'));
        }
        url.into()
    }
}

/// Storage error bodies that mean "an object already exists at this key".
fn is_duplicate(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let code_409 = match value.get("statusCode") {
        Some(Value::String(code)) => code == "409",
        Some(Value::Number(code)) => code.as_u64() == Some(409),
        _ => false,
    };
    code_409 || value.get("error").and_then(Value::as_str) == Some("Duplicate")
}

/// Translate filters into PostgREST query parameters.
fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(col, value) => (col.clone(), format!("eq.{}", scalar(value))),
            Filter::ILike(col, pattern) => (col.clone(), format!("ilike.{pattern}")),
            Filter::Contains(col, values) => {
                let items: Vec<String> = values.iter().map(array_item).collect();
                (col.clone(), format!("cs.{{{}}}", items.join(",")))
            }
        })
        .collect()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".into(),
        other => other.to_string(),
    }
}

/// Element of a Postgres array literal. Strings are always quoted.
fn array_item(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => scalar(other),
    }
}

/// `0-11/57` -> 57, `*/0` -> 0, `0-11/*` -> unknown.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.parse().ok()
}

async fn ensure_success(response: Response) -> BackendResult<()> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(error_from_response(response).await)
}

async fn read_json<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    BackendError::api(status, error_message(&text))
}

/// Pull the human readable message out of an auth, rest or storage error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|field| value.get(field).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_use_postgrest_operators() {
        let params = filter_params(&[
            Filter::Eq("is_public".into(), json!(true)),
            Filter::Eq("id".into(), json!("abc")),
            Filter::ILike("name".into(), "%tote%".into()),
            Filter::Contains("colors".into(), vec![json!("#fff")]),
        ]);
        assert_eq!(
            params,
            vec![
                ("is_public".to_string(), "eq.true".to_string()),
                ("id".to_string(), "eq.abc".to_string()),
                ("name".to_string(), "ilike.%tote%".to_string()),
                ("colors".to_string(), "cs.{\"#fff\"}".to_string()),
            ]
        );
    }

    #[test]
    fn duplicate_bodies_are_recognised() {
        assert!(is_duplicate(
            r#"{"statusCode":"409","error":"Duplicate","message":"The resource already exists"}"#
        ));
        assert!(is_duplicate(r#"{"statusCode":409,"message":"exists"}"#));
        assert!(!is_duplicate(
            r#"{"statusCode":"403","error":"Unauthorized","message":"new row violates row-level security policy"}"#
        ));
        assert!(!is_duplicate("Bad Gateway"));
    }

    #[test]
    fn object_urls_encode_each_segment() {
        let backend = HttpBackend::new(&BackendConfig::new("https://x.example.com/", "anon")).unwrap();
        assert_eq!(
            backend.public_url("products", "products/p1-5.png"),
            "https://x.example.com/storage/v1/object/public/products/products/p1-5.png"
        );
        assert_eq!(
            backend.public_url("products", "products/a b#c?.png"),
            "https://x.example.com/storage/v1/object/public/products/products/a%20b%23c%3F.png"
        );
        assert_eq!(
            backend.object_url(&["products"], "products/x.png"),
            "https://x.example.com/storage/v1/object/products/products/x.png"
        );
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-11/57"), Some(57));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-11/*"), None);
    }

    #[test]
    fn error_bodies_prefer_descriptive_fields() {
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message(r#"{"message":"JWT expired"}"#), "JWT expired");
        assert_eq!(error_message("gateway timeout\n"), "gateway timeout");
    }
}
