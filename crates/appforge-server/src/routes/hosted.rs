//! Public pages of deployed apps: `/apps/{slug}`.
//!
//! The stored code is resolved against the stored configuration on every
//! request and served under a sandbox CSP. Inactive apps are not served.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::debug;
use uuid::Uuid;

use appforge_core::persistence::DeployedApp;
use appforge_core::preview::SANDBOX_CSP;
use appforge_core::{ConfigTree, resolve};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/apps` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{slug}", get(hosted_page))
        .route("/{slug}/files/{artifact_id}", get(hosted_file))
}

async fn active_app(state: &AppState, slug: &str) -> Result<DeployedApp, AppError> {
    let app = state.persistence().get_deployed_app(slug).await?;
    if app.is_active {
        Ok(app)
    } else {
        debug!(slug, "inactive app requested");
        Err(AppError::NotFound(format!("app '{slug}' not found")))
    }
}

fn sandboxed(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(SANDBOX_CSP),
    );
    response
}

async fn hosted_page(State(state): State<Arc<AppState>>, Path(slug): Path<String>) -> Result<Response, AppError> {
    let app = active_app(&state, &slug).await?;
    let document = resolve(&app.code, &ConfigTree::new(app.configuration));
    Ok(sandboxed(Html(document).into_response()))
}

/// An artifact attached to the app, e.g. a document the page fetches.
async fn hosted_file(
    State(state): State<Arc<AppState>>,
    Path((slug, artifact_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let app = active_app(&state, &slug).await?;
    let (artifact, content) = state
        .repository
        .app_artifacts(app.id)
        .await?
        .into_iter()
        .find(|(a, _)| a.id == artifact_id)
        .ok_or_else(|| AppError::NotFound(format!("file {artifact_id} not found")))?;

    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok(sandboxed(([(header::CONTENT_TYPE, content_type)], content).into_response()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{StatusCode, header};
    use serde_json::json;

    use crate::routes::tests::{KEY, app, seed, send, send_json};

    #[tokio::test]
    async fn serves_resolved_page_with_sandbox_csp() {
        let app = app(None);
        seed(&app, "bot").await;
        let (status, headers, body) = send(&app, "GET", "/apps/bot", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_SECURITY_POLICY], "sandbox allow-scripts");
        assert!(headers.get(header::X_FRAME_OPTIONS).is_none());
        let html = String::from_utf8(body).unwrap();
        assert_eq!(html, format!("<h1>Hello</h1><p></p><script>key='{KEY}'</script>"));
    }

    #[tokio::test]
    async fn inactive_and_missing_apps_are_404() {
        let app = app(None);
        seed(&app, "bot").await;
        let (status, _) = send_json(&app, "PUT", "/v1/apps/bot", Some(json!({"is_active": false}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = send(&app, "GET", "/apps/bot", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = send(&app, "GET", "/apps/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn serves_attached_files() {
        let app = app(None);
        let created = seed(&app, "bot").await;
        let (_, artifact) = send_json(
            &app,
            "POST",
            "/v1/uploads/s1",
            Some(json!({"file_name": "faq.md", "content_type": "text/markdown", "content": "# FAQ"})),
        )
        .await;
        let id = created["id"].as_str().unwrap();
        send_json(
            &app,
            "POST",
            &format!("/v1/apps/{id}/artifacts/attach"),
            Some(json!({"session_id": "s1"})),
        )
        .await;

        let uri = format!("/apps/bot/files/{}", artifact["id"].as_str().unwrap());
        let (status, headers, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/markdown");
        assert_eq!(body, b"# FAQ");
    }
}
