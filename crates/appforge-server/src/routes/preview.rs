//! Preview routes: `/v1/preview/*`
//!
//! `POST /v1/preview` returns a device frame page whose iframe carries the
//! resolved document in `srcdoc` with `sandbox="allow-scripts"`.
//! `POST /v1/preview/document` returns the bare document under a sandbox
//! content security policy.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use appforge_core::preview::{Device, SANDBOX_CSP, compute_preview, frame};
use appforge_core::store::initialize;
use appforge_core::{ConfigTree, FieldValue};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/preview` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(preview_frame))
        .route("/document", post(preview_document))
}

/// A preview of either inline code or a stored template.
#[derive(Debug, Default, Deserialize)]
pub struct PreviewRequest {
    /// Inline template code. Takes precedence over the stored template's.
    #[serde(default)]
    pub template_code: Option<String>,
    /// Slug of a stored template; its defaults sit under `values`.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub values: Option<FieldValue>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device: Option<String>,
}

async fn resolve_request(state: &AppState, body: PreviewRequest) -> Result<String, AppError> {
    let (code, values) = match &body.template {
        Some(slug) => {
            let template = state.persistence().get_template(slug).await?;
            let values = initialize(&template.defaults(), body.values.as_ref());
            (Some(body.template_code.unwrap_or(template.template_code)), Some(values))
        }
        None => (body.template_code, body.values.map(ConfigTree::new)),
    };
    Ok(compute_preview(code.as_deref(), values.as_ref()))
}

async fn preview_frame(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
    Json(body): Json<PreviewRequest>,
) -> Result<Html<String>, AppError> {
    let device = match query.device.as_deref() {
        Some(raw) => raw.parse::<Device>().map_err(AppError::BadRequest)?,
        None => Device::default(),
    };
    let document = resolve_request(&state, body).await?;
    Ok(Html(frame(&document, device)))
}

async fn preview_document(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreviewRequest>,
) -> Result<Response, AppError> {
    let document = resolve_request(&state, body).await?;
    let mut response = Html(document).into_response();
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(SANDBOX_CSP),
    );
    Ok(response)
}
