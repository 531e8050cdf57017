//! Session/identity facade.
//!
//! Admin privilege is decided by one rule only: the user holds an `admin` row
//! in the role-assignment table (`user_roles` by default).

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use super::client_provider::BackendHandle;
use crate::{
    backend::Query,
    config::BackendConfig,
    errors::AuthError,
    models::session::{AuthChange, Session, User},
};

const ADMIN_ROLE: &str = "admin";

#[derive(Clone)]
pub struct SessionService {
    backend: BackendHandle,
    roles_table: String,
    reset_redirect: Option<String>,
}

impl SessionService {
    pub fn new(backend: BackendHandle, config: &BackendConfig) -> Self {
        Self {
            backend,
            roles_table: config.roles_table.clone(),
            reset_redirect: config.reset_redirect(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.backend.sign_in_with_password(email, password).await?;
        info!(user_id = %session.user.id, "signed in");
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.backend.sign_out().await?;
        info!("signed out");
        Ok(())
    }

    /// The signed-in user, or `None` when there is no session.
    pub async fn current_user(&self) -> Result<Option<User>, AuthError> {
        Ok(self.backend.user().await?)
    }

    /// True when a session exists. Backend failures count as signed out.
    pub async fn is_authenticated(&self) -> bool {
        match self.backend.session().await {
            Ok(session) => session.is_some(),
            Err(err) => {
                warn!(error = %err, "session lookup failed");
                false
            }
        }
    }

    /// True when the current user holds exactly one `admin` role assignment.
    ///
    /// Signed out, no assignment, duplicate assignments and lookup failures
    /// all yield `false`.
    pub async fn is_admin(&self) -> bool {
        let session = match self.backend.session().await {
            Ok(Some(session)) => session,
            Ok(None) => return false,
            Err(err) => {
                warn!(error = %err, "session lookup failed");
                return false;
            }
        };

        let query = Query::new()
            .eq("user_id", session.user.id.to_string())
            .eq("role", ADMIN_ROLE);
        match self.backend.select(&self.roles_table, &query).await {
            Ok(rows) => {
                debug!(user_id = %session.user.id, matched = rows.rows.len(), "role lookup");
                rows.rows.len() == 1
            }
            Err(err) => {
                warn!(error = %err, "role lookup failed");
                false
            }
        }
    }

    /// Start the out-of-band reset flow. The mail links back to the storefront
    /// login page when a site origin is configured.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        self.backend
            .reset_password_for_email(email, self.reset_redirect.as_deref())
            .await?;
        info!("password reset requested");
        Ok(())
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        if self.backend.session().await?.is_none() {
            return Err(AuthError::NotSignedIn);
        }
        Ok(self.backend.refresh_session().await?)
    }

    /// Run `callback` for every session transition until the returned
    /// subscription is unsubscribed or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_auth_state_change<F>(&self, callback: F) -> AuthSubscription
    where
        F: Fn(AuthChange) + Send + Sync + 'static,
    {
        let mut events = self.backend.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => callback(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth listener fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        AuthSubscription { task: Some(task) }
    }
}

/// Registration handle for an auth state listener.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct AuthSubscription {
    task: Option<JoinHandle<()>>,
}

impl AuthSubscription {
    /// Stop delivering events. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
