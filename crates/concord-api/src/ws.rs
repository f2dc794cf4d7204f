use std::collections::HashMap;

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};

use concord_gateway::connection::handle_connection;
use concord_types::api::Claims;

use crate::channels::require_channel_member;
use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/ws?channel_id=N`. The caller is already authenticated by
/// `require_auth`; the channel must exist and the caller must belong to its
/// server before the upgrade is accepted.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let channel_id = parse_channel_id(params.get("channel_id").map(String::as_str))?;

    require_channel_member(&state, channel_id, claims.sub).await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let relay = state.relay.clone();
    let author = claims.identity();
    Ok(upgrade
        .on_upgrade(move |socket| handle_connection(socket, relay, author, channel_id))
        .into_response())
}

fn parse_channel_id(raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("channel_id is required".into()))?;
    raw.parse()
        .map_err(|_| ApiError::InvalidInput("invalid channel_id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_must_be_present_and_numeric() {
        assert_eq!(parse_channel_id(Some("7")).unwrap(), 7);
        assert_eq!(
            parse_channel_id(None).unwrap_err().to_string(),
            "channel_id is required"
        );
        assert_eq!(
            parse_channel_id(Some("")).unwrap_err().to_string(),
            "channel_id is required"
        );
        assert_eq!(
            parse_channel_id(Some("seven")).unwrap_err().to_string(),
            "invalid channel_id"
        );
    }
}
