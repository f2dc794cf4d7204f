use serde::{Deserialize, Serialize};

use crate::models::{Server, UserProfile};

// -- JWT Claims --

/// Access token claims shared by concord-api (REST middleware and socket
/// upgrade). `user` is the denormalized identity snapshot taken at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub user: UserProfile,
}

impl Claims {
    /// Identity of the caller. The subject and username claims win over the
    /// snapshot should the two ever disagree.
    pub fn identity(&self) -> UserProfile {
        UserProfile {
            user_id: self.sub,
            username: self.username.clone(),
            avatar_url: self.user.avatar_url.clone(),
            avatar_color: self.user.avatar_color.clone(),
        }
    }
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Returned by both login and refresh.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

// -- Servers --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerListResponse {
    pub servers: Vec<Server>,
}

// -- Channels --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub name: String,
    pub server_id: i64,
}
