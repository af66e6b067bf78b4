use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::jwt::JwtKeys, error::ApiError};

/// Identity resolved by `require_auth`, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub unit_number: String,
}

fn bearer_token(header: Option<&HeaderValue>) -> Result<&str, ApiError> {
    let header = header
        .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?;
    let token = header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("invalid authorization header".into()))?;
    Ok(token)
}

/// Rejects the request with 401 unless it carries a valid bearer token.
pub async fn require_auth(
    State(keys): State<JwtKeys>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers().get(AUTHORIZATION))?;

    let claims = keys.validate(token).map_err(|e| {
        debug!(reason = %e, "token rejected");
        ApiError::Unauthorized("invalid or expired token".into())
    })?;

    request.extensions_mut().insert(AuthUser {
        user_id: claims.uid,
        unit_number: claims.unit,
    });
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::state::AppState;

    async fn whoami(user: AuthUser) -> String {
        format!("{}:{}", user.user_id, user.unit_number)
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
            .with_state(state)
    }

    async fn call(app: Router, auth: Option<String>) -> (StatusCode, String) {
        let mut req = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = auth {
            req = req.header(AUTHORIZATION, value);
        }
        let response = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_token_reaches_handler_with_identity() {
        let state = AppState::fake();
        let user_id = Uuid::new_v4();
        let token = state.jwt.issue(user_id, "12B").unwrap();

        let (status, body) = call(app(state), Some(format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("{user_id}:12B"));
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let (status, body) = call(app(AppState::fake()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("missing authorization header"));
    }

    #[tokio::test]
    async fn wrong_scheme_or_empty_token_is_unauthorized() {
        let state = AppState::fake();
        let token = state.jwt.issue(Uuid::new_v4(), "1").unwrap();
        for value in [format!("Basic {token}"), "Bearer ".to_string(), token] {
            let (status, _) = call(app(state.clone()), Some(value)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn invalid_token_is_unauthorized() {
        let (status, body) = call(
            app(AppState::fake()),
            Some("Bearer not.a.token".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("invalid or expired token"));
    }

    #[tokio::test]
    async fn extractor_without_gate_rejects() {
        let state = AppState::fake();
        let app = Router::new().route("/whoami", get(whoami)).with_state(state);
        let (status, _) = call(app, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
