use axum::{
    Extension, Json,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use concord_db::models::ChannelRow;
use concord_types::api::{Claims, CreateChannelRequest};
use concord_types::models::Channel;

use crate::error::ApiError;
use crate::servers::validate_name;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub server_id: i64,
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateChannelRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let name = validate_name(&req.name, "channel")?;
    let server_id = req.server_id;

    require_server_member(&state, server_id, claims.sub).await?;

    let created_by = claims.sub;
    let row = state
        .with_db(move |db| db.create_channel(server_id, &name, created_by))
        .await?;

    info!(
        "{} ({}) created channel {} ({}) in server {}",
        claims.username, claims.sub, row.name, row.id, server_id
    );
    Ok((StatusCode::CREATED, Json(Channel::from(row))))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<ChannelQuery>, QueryRejection>,
) -> Result<Json<Vec<Channel>>, ApiError> {
    let Query(ChannelQuery { server_id }) =
        query.map_err(|_| ApiError::InvalidInput("server_id must be an integer".into()))?;

    require_server_member(&state, server_id, claims.sub).await?;

    let rows = state.with_db(move |db| db.list_channels(server_id)).await?;
    Ok(Json(rows.into_iter().map(Channel::from).collect()))
}

/// 404 if the server does not exist, 403 if `user_id` is not a member.
pub(crate) async fn require_server_member(state: &AppState, server_id: i64, user_id: i64) -> Result<(), ApiError> {
    state
        .with_db(move |db| {
            if db.get_server(server_id)?.is_none() {
                return Ok(Err(ApiError::NotFound("server not found".into())));
            }
            if !db.is_server_member(server_id, user_id)? {
                return Ok(Err(ApiError::Forbidden("not a server member".into())));
            }
            Ok(Ok(()))
        })
        .await?
}

/// Resolves a channel the caller may read from and post to: it must exist
/// and the caller must belong to its server.
pub(crate) async fn require_channel_member(
    state: &AppState,
    channel_id: i64,
    user_id: i64,
) -> Result<ChannelRow, ApiError> {
    state
        .with_db(move |db| {
            let Some(channel) = db.get_channel(channel_id)? else {
                return Ok(Err(ApiError::NotFound("channel not found".into())));
            };
            if !db.is_server_member(channel.server_id, user_id)? {
                return Ok(Err(ApiError::Forbidden("not a server member".into())));
            }
            Ok(Ok(channel))
        })
        .await?
}
