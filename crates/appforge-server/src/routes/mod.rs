//! HTTP route handlers for appforge.
//!
//! Routes are organized by resource:
//! - `sys`: health
//! - `templates`: template listing and authoring
//! - `apps`: deployed app CRUD and artifact attachment
//! - `artifacts`: pending uploads
//! - `preview`: sandboxed preview documents and device frames
//! - `hosted`: the public pages of deployed apps

pub mod apps;
pub mod artifacts;
pub mod hosted;
pub mod preview;
pub mod sys;
pub mod templates;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::admin_auth;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn build(state: Arc<AppState>, body_limit: usize) -> Router {
    let api = Router::new()
        .nest("/v1/sys", sys::router())
        .nest("/v1/templates", templates::router())
        .nest("/v1/apps", apps::router())
        .nest("/v1/uploads", artifacts::router())
        .nest("/v1/preview", preview::router())
        .route_layer(axum_mw::from_fn_with_state(Arc::clone(&state), admin_auth))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .merge(api)
        .nest("/apps", hosted::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state)
}
