use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    axum_extra::extract::cookie::CookieJar,
    tokio::sync::RwLock,
    tracing::debug,
};

use bidfeed_config::AuthConfig;

pub type UserId = i64;

// ── Sessions ─────────────────────────────────────────────────────────────────

/// Resolves a session token to the user it belongs to.
#[async_trait]
pub trait SessionAuthorizer: Send + Sync {
    async fn validate(&self, token: &str) -> Option<UserId>;
}

/// Session table held in memory, seeded from config.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, UserId>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            sessions: RwLock::new(config.sessions.clone()),
        }
    }

    pub async fn insert(&self, token: impl Into<String>, user_id: UserId) {
        self.sessions.write().await.insert(token.into(), user_id);
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[async_trait]
impl SessionAuthorizer for MemorySessionStore {
    async fn validate(&self, token: &str) -> Option<UserId> {
        self.sessions.read().await.get(token).copied()
    }
}

// ── Upgrade gate ─────────────────────────────────────────────────────────────

/// Result of checking an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub ok: bool,
    pub user_id: Option<UserId>,
    pub reason: Option<&'static str>,
}

impl AuthResult {
    fn allow(user_id: Option<UserId>) -> Self {
        Self {
            ok: true,
            user_id,
            reason: None,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            ok: false,
            user_id: None,
            reason: Some(reason),
        }
    }
}

/// Decides whether a request may be upgraded, before any socket work.
#[derive(Clone)]
pub struct UpgradeGate {
    required: bool,
    cookie_name: String,
    authorizer: Arc<dyn SessionAuthorizer>,
}

impl UpgradeGate {
    pub fn new(config: &AuthConfig, authorizer: Arc<dyn SessionAuthorizer>) -> Self {
        Self {
            required: config.required,
            cookie_name: config.cookie_name.clone(),
            authorizer,
        }
    }

    /// Check the session cookie. When auth is optional a valid cookie still
    /// attaches its user to the connection.
    pub async fn check(&self, jar: &CookieJar) -> AuthResult {
        let Some(token) = jar.get(&self.cookie_name).map(|c| c.value().to_owned()) else {
            return if self.required {
                AuthResult::deny("session_missing")
            } else {
                AuthResult::allow(None)
            };
        };

        match self.authorizer.validate(&token).await {
            Some(user_id) => AuthResult::allow(Some(user_id)),
            None if self.required => AuthResult::deny("session_invalid"),
            None => {
                debug!("ignoring unknown session on open endpoint");
                AuthResult::allow(None)
            },
        }
    }
}
