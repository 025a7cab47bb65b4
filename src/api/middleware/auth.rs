use crate::utils::auth::{validate_jwt, Claims};
use crate::{entities::prelude::Users, AppState};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use sea_orm::EntityTrait;
use serde::Deserialize;

/// Identity extension for routes that serve anonymous callers too.
#[derive(Clone)]
pub struct MaybeUser(pub Option<Claims>);

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

fn extract_token(req: &Request) -> Option<String> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    if auth_header.is_some() {
        return auth_header;
    }

    // Browser downloads can't set headers; accept ?token= as well.
    let query = req.uri().query().unwrap_or_default();
    serde_urlencoded::from_str::<AuthQuery>(query)
        .ok()
        .and_then(|q| q.token)
}

// Takes the token by value so no request borrow is held across the db await.
async fn resolve_claims(state: &AppState, token: Option<String>) -> Result<Option<Claims>, StatusCode> {
    let Some(token) = token else {
        return Ok(None);
    };

    let Ok(claims) = validate_jwt(&token, &state.config.jwt_secret) else {
        return Ok(None);
    };

    // Check the user still exists
    let user_exists = Users::find_by_id(claims.sub.clone())
        .one(&state.db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some();

    Ok(user_exists.then_some(claims))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_token(&req);
    match resolve_claims(&state, token).await? {
        Some(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Like `auth_middleware`, but a missing or invalid token passes through as
/// anonymous instead of failing. The entitlement rules decide what an
/// anonymous caller may actually fetch.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_token(&req);
    let claims = resolve_claims(&state, token).await?;
    req.extensions_mut().insert(MaybeUser(claims));
    Ok(next.run(req).await)
}
