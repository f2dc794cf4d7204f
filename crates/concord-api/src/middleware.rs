use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Uri},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Validates the access token and stores its `Claims` in the request
/// extensions. Browsers cannot set headers on a socket upgrade, so a
/// `token` query parameter is accepted when no bearer header is present.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(req.headers(), req.uri())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let claims = state.auth.validate_access_token(&token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// The `Authorization` header wins over the query parameter.
fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }

    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_app;
    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::{StatusCode, header::AUTHORIZATION},
        middleware,
        routing::get,
    };
    use concord_types::api::Claims;
    use concord_types::models::UserProfile;
    use tower::ServiceExt;

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/protected",
                get(|Extension(claims): Extension<Claims>| async move { claims.username }),
            )
            .layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn alice() -> UserProfile {
        UserProfile {
            user_id: 1,
            username: "alice".into(),
            avatar_url: String::new(),
            avatar_color: "#4ECDC4".into(),
        }
    }

    async fn call(app: Router, uri: &str, auth: Option<String>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).expect("request should build"))
            .await
            .expect("request should return a response");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn rejects_requests_without_token() {
        let app = test_app();
        let (status, body) = call(protected_app(app.state.clone()), "/protected", None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("missing bearer token"));
    }

    #[tokio::test]
    async fn rejects_invalid_token() {
        let app = test_app();
        let (status, _) = call(
            protected_app(app.state.clone()),
            "/protected",
            Some("Bearer invalid-token".into()),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_bearer_header() {
        let app = test_app();
        let token = app.auth.tokens().issue_access_token(&alice()).unwrap();

        let (status, body) = call(
            protected_app(app.state.clone()),
            "/protected",
            Some(format!("Bearer {token}")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn accepts_query_token() {
        let app = test_app();
        let token = app.auth.tokens().issue_access_token(&alice()).unwrap();

        let (status, body) = call(
            protected_app(app.state.clone()),
            &format!("/protected?token={token}"),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "alice");
    }

    #[tokio::test]
    async fn header_takes_precedence_over_query() {
        let app = test_app();
        let token = app.auth.tokens().issue_access_token(&alice()).unwrap();

        let (status, _) = call(
            protected_app(app.state.clone()),
            &format!("/protected?token={token}"),
            Some("Bearer invalid-token".into()),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
