//! Admin authentication middleware.
//!
//! When an admin token is configured, protected `/v1/*` requests must carry
//! `Authorization: Bearer <token>`. Health, template reads and previews stay
//! public.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

fn is_public(method: &Method, path: &str) -> bool {
    path == "/v1/sys/health"
        || path.starts_with("/v1/preview")
        || (method == Method::GET && path.starts_with("/v1/templates"))
}

/// Constant-time token check; only the length may leak.
fn token_matches(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Middleware that checks the bearer token against the configured admin token.
pub async fn admin_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return next.run(req).await;
    };
    if is_public(req.method(), req.uri().path()) {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if token_matches(token, expected) => next.run(req).await,
        Some(_) => {
            debug!(path = %req.uri().path(), "rejected admin token");
            AppError::Unauthorized("invalid admin token".to_owned()).into_response()
        }
        None => AppError::Unauthorized("missing Authorization bearer token".to_owned()).into_response(),
    }
}
