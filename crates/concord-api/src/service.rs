use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::Utc;
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use concord_db::Database;
use concord_store::SessionStore;
use concord_types::api::Claims;
use concord_types::models::UserProfile;

use crate::password::PasswordHasher;
use crate::sessions::{REFRESH_SESSION_TTL, RefreshSession, session_key};
use crate::tokens::{ACCESS_TOKEN_TTL_SECONDS, TokenError, TokenService, generate_refresh_token};

pub const AVATAR_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEEAD", "#D4A5A5", "#9B59B6", "#3498DB",
];

const MAX_PASSWORD_CHARS: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("username already taken")]
    UsernameTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("expired refresh token")]
    ExpiredRefreshToken,

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Register, login and refresh-token rotation.
///
/// Access tokens are stateless; refresh tokens are opaque, single-use and
/// backed by a `SessionStore` record holding the identity snapshot taken at
/// login.
#[derive(Clone)]
pub struct AuthService {
    db: Arc<Database>,
    sessions: Arc<dyn SessionStore>,
    tokens: TokenService,
    hasher: PasswordHasher,
}

impl AuthService {
    pub fn new(
        db: Arc<Database>,
        sessions: Arc<dyn SessionStore>,
        tokens: TokenService,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            db,
            sessions,
            tokens,
            hasher,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserProfile, AuthError> {
        let username = validate_username(username)?;
        validate_password(password)?;

        let hasher = self.hasher.clone();
        let password = password.to_string();
        let password_hash = blocking(move || hasher.hash(&password)).await?;

        let avatar_color = AVATAR_COLORS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(AVATAR_COLORS[0]);

        let db = self.db.clone();
        let name = username.clone();
        let user = blocking(move || db.create_user(&name, &password_hash, avatar_color))
            .await?
            .ok_or(AuthError::UsernameTaken)?;

        info!("Registered user {} ({})", user.username, user.id);
        Ok(user.profile())
    }

    /// Both an unknown username and a wrong password yield
    /// `InvalidCredentials`, after the same amount of hashing work.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let db = self.db.clone();
        let hasher = self.hasher.clone();
        let username = username.trim().to_string();
        let password = password.to_string();

        let user = blocking(move || {
            let Some(user) = db.get_user_by_username(&username)? else {
                hasher.verify_dummy(&password);
                return Ok(None);
            };
            let matches = hasher.verify(&password, &user.password_hash)?;
            Ok(matches.then_some(user))
        })
        .await?;

        let Some(user) = user else {
            debug!("Login rejected");
            return Err(AuthError::InvalidCredentials);
        };

        self.issue_pair(&user.profile()).await
    }

    /// Exchanges a refresh token for a new pair. The presented session is
    /// consumed before its expiry is checked, so a token never works twice.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let Some(record) = self.sessions.take_hash(&session_key(refresh_token)).await? else {
            debug!("Refresh with unknown or consumed token");
            return Err(AuthError::InvalidRefreshToken);
        };

        let Some(session) = RefreshSession::from_record(&record) else {
            debug!("Refresh session record is malformed, discarding");
            return Err(AuthError::InvalidRefreshToken);
        };

        if session.is_expired(Utc::now()) {
            debug!("Refresh token for user {} has expired", session.user.user_id);
            return Err(AuthError::ExpiredRefreshToken);
        }

        self.issue_pair(&session.user).await
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.tokens.validate_access_token(token)
    }

    async fn issue_pair(&self, user: &UserProfile) -> Result<TokenPair, AuthError> {
        let access_token = self.tokens.issue_access_token(user)?;
        let refresh_token = generate_refresh_token()?;

        let session = RefreshSession::starting_at(user.clone(), Utc::now());
        self.sessions
            .put_hash(&session_key(&refresh_token), session.to_record(), REFRESH_SESSION_TTL)
            .await
            .context("failed to store refresh session")?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: ACCESS_TOKEN_TTL_SECONDS,
        })
    }
}

fn validate_username(raw: &str) -> Result<String, AuthError> {
    let username = raw.trim();
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(AuthError::InvalidInput(
            "username must be between 3 and 32 characters".into(),
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidInput(
            "username must not contain whitespace".into(),
        ));
    }
    Ok(username.to_string())
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if len == 0 || len > MAX_PASSWORD_CHARS {
        return Err(AuthError::InvalidInput(
            "password must be between 1 and 128 characters".into(),
        ));
    }
    Ok(())
}

/// Runs hashing or SQLite work off the async runtime.
async fn blocking<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("blocking task failed: {e}"))?
}
