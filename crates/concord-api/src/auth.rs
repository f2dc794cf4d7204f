use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use concord_types::api::{Claims, LoginRequest, RefreshRequest, RegisterRequest, TokenResponse};
use concord_types::models::UserProfile;

use crate::error::ApiError;
use crate::service::TokenPair;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let user = state.auth.register(&req.username, &req.password).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;
    let pair = state.auth.login(&req.username, &req.password).await?;

    Ok(Json(token_response(pair)))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(req) = payload?;
    let pair = state.auth.refresh(&req.refresh_token).await?;

    Ok(Json(token_response(pair)))
}

/// The caller's identity as carried by the access token.
pub async fn me(Extension(claims): Extension<Claims>) -> Json<UserProfile> {
    Json(claims.identity())
}

fn token_response(pair: TokenPair) -> TokenResponse {
    TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: "Bearer".into(),
        expires_in: pair.expires_in,
    }
}
