//! Authentication session and user records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The signed-in user as reported by the auth service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub app_metadata: Value,
}

/// Tokens issued on sign-in plus the user they belong to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: User,
}

/// Session state transitions broadcast to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthChange {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl AuthChange {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthChange::SignedIn(session) | AuthChange::TokenRefreshed(session) => Some(session),
            AuthChange::SignedOut => None,
        }
    }
}
