use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use concord_types::api::{Claims, CreateServerRequest, ServerListResponse};
use concord_types::models::Server;

use crate::error::ApiError;
use crate::state::AppState;

const MAX_NAME_CHARS: usize = 64;

pub async fn create_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateServerRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let name = validate_name(&req.name, "server")?;
    let owner_id = claims.sub;
    let is_public = req.is_public;

    let row = state
        .with_db(move |db| db.create_server(&name, owner_id, is_public))
        .await?;

    info!("{} ({}) created server {} ({})", claims.username, claims.sub, row.name, row.id);
    Ok((StatusCode::CREATED, Json(Server::from(row))))
}

pub async fn list_servers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ServerListResponse>, ApiError> {
    let user_id = claims.sub;
    let rows = state.with_db(move |db| db.list_user_servers(user_id)).await?;

    Ok(Json(ServerListResponse {
        servers: rows.into_iter().map(Server::from).collect(),
    }))
}

/// Public servers admit anyone; private ones only existing members, for
/// whom joining is a no-op.
pub async fn join_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(server_id): Path<i64>,
) -> Result<Json<Server>, ApiError> {
    let user_id = claims.sub;

    let (row, joined) = state
        .with_db(move |db| {
            let Some(server) = db.get_server(server_id)? else {
                return Ok(Err(ApiError::NotFound("server not found".into())));
            };
            if !server.is_public && !db.is_server_member(server_id, user_id)? {
                return Ok(Err(ApiError::Forbidden("private server".into())));
            }
            let joined = db.add_server_member(server_id, user_id)?;
            Ok(Ok((server, joined)))
        })
        .await??;

    if joined {
        info!("{} ({}) joined server {}", claims.username, claims.sub, server_id);
    }
    Ok(Json(Server::from(row)))
}

/// Trims `raw` and checks it is 1 to 64 characters.
pub(crate) fn validate_name(raw: &str, kind: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "{kind} name must be between 1 and {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("  rust  ", "server").unwrap(), "rust");
        assert!(validate_name("   ", "server").is_err());
        assert!(validate_name(&"n".repeat(65), "channel").is_err());
        assert!(validate_name(&"n".repeat(64), "channel").is_ok());
    }
}
