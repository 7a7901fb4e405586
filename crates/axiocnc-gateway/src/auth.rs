//! Bearer-token issuance and verification. Tokens are opaque UUIDs held in
//! memory with a fixed TTL; no teacher analogue (gcodekit4 is a local
//! desktop app with no auth boundary) — synthesized against the token
//! handshake the Session Hub and REST middleware both gate on.

use axiocnc_core::error::AuthError;
use axiocnc_store::{RecordStore, Role, User};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const TOKEN_TTL_SECS: i64 = 8 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("invalid username or password")]
    InvalidCredentials,
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    user: AuthenticatedUser,
    expires_at: DateTime<Utc>,
}

/// Verifies REST/WebSocket bearer tokens against a short-lived in-memory
/// table, backed by the persisted user collection for login.
pub struct AuthService {
    users: Arc<RecordStore<User>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
}

impl AuthService {
    pub fn new(users: Arc<RecordStore<User>>) -> Self {
        Self {
            users,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn hash_password(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Verify credentials and mint a bearer token valid for
    /// [`TOKEN_TTL_SECS`].
    pub async fn login(&self, username: &str, password: &str) -> Result<String, LoginError> {
        let candidate = Self::hash_password(password);
        let user = self
            .users
            .list()
            .into_iter()
            .find(|u| u.username == username)
            .ok_or(LoginError::InvalidCredentials)?;
        if user.password_hash != candidate {
            return Err(LoginError::InvalidCredentials);
        }
        let token = Uuid::new_v4().to_string();
        let issued = IssuedToken {
            user: AuthenticatedUser {
                user_id: user.id.to_string(),
                username: user.username,
                role: user.role,
            },
            expires_at: Utc::now() + chrono::Duration::seconds(TOKEN_TTL_SECS),
        };
        self.tokens.write().await.insert(token.clone(), issued);
        Ok(token)
    }

    pub async fn logout(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }

    /// Verify a bearer token extracted from a WebSocket handshake header or
    /// a REST `Authorization: Bearer <token>` header.
    pub async fn verify(&self, token: Option<&str>) -> Result<AuthenticatedUser, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;
        let tokens = self.tokens.read().await;
        let issued = tokens.get(token).ok_or(AuthError::InvalidToken)?;
        if issued.expires_at < Utc::now() {
            return Err(AuthError::InvalidToken);
        }
        Ok(issued.user.clone())
    }
}

/// Extract the bearer token from a raw `Authorization` header value
/// (`"Bearer <token>"`), used by both the WebSocket handshake inspector and
/// the REST middleware.
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded_users(dir: &std::path::Path) -> Arc<RecordStore<User>> {
        let store = RecordStore::new(dir.join("users.json"));
        let user = User {
            id: Uuid::new_v4(),
            username: "admin".to_string(),
            password_hash: AuthService::hash_password("hunter2"),
            role: Role::Admin,
        };
        store.upsert(user).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn login_with_correct_password_issues_a_verifiable_token() {
        let dir = tempdir().unwrap();
        let auth = AuthService::new(seeded_users(dir.path()));
        let token = auth.login("admin", "hunter2").await.unwrap();
        let user = auth.verify(Some(&token)).await.unwrap();
        assert_eq!(user.username, "admin");
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected() {
        let dir = tempdir().unwrap();
        let auth = AuthService::new(seeded_users(dir.path()));
        assert!(auth.login("admin", "wrong").await.is_err());
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let dir = tempdir().unwrap();
        let auth = AuthService::new(seeded_users(dir.path()));
        assert!(matches!(
            auth.verify(None).await.unwrap_err(),
            AuthError::MissingToken
        ));
    }

    #[tokio::test]
    async fn logout_invalidates_the_token() {
        let dir = tempdir().unwrap();
        let auth = AuthService::new(seeded_users(dir.path()));
        let token = auth.login("admin", "hunter2").await.unwrap();
        auth.logout(&token).await;
        assert!(auth.verify(Some(&token)).await.is_err());
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
    }
}
