use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use concord_types::api::Claims;
use concord_types::models::ChatMessage;

use crate::channels::require_channel_member;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Channel history, newest first. This is also how clients recover a
/// message that was stored but never reached the bus.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel_id): Path<i64>,
    query: Result<Query<MessageQuery>, QueryRejection>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

    require_channel_member(&state, channel_id, claims.sub).await?;

    let limit = query.limit.min(MAX_PAGE);
    let offset = query.offset;
    let rows = state
        .with_db(move |db| db.get_messages(channel_id, limit, offset))
        .await?;

    Ok(Json(rows.into_iter().map(ChatMessage::from).collect()))
}
