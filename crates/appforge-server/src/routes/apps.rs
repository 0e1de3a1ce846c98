//! Deployed app routes: `/v1/apps/*`
//!
//! Create, read, update and delete deployed apps, and attach artifacts that
//! were uploaded before the app existed. Submitted configurations are checked
//! against the template schema and the credential format before they are
//! stored.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use appforge_core::credential::CREDENTIAL_KEY;
use appforge_core::persistence::{AppUpdate, Artifact, CreateAppRequest, CreatedApp, DeployedApp};
use appforge_core::schema::Template;
use appforge_core::validator::{FieldError, Validator};
use appforge_core::FieldValue;

use crate::error::AppError;
use crate::routes::templates::find_template;
use crate::state::AppState;

/// Build the `/v1/apps` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_apps).post(create_app))
        .route("/{app}", get(get_app).put(update_app).delete(delete_app))
        .route("/{app}/artifacts/attach", post(attach_artifacts))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AppListResponse {
    pub apps: Vec<AppSummary>,
}

/// A deployed app without its configuration, which holds the API key.
#[derive(Debug, Serialize)]
pub struct AppSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    pub template_ref: String,
    pub public_url: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<DeployedApp> for AppSummary {
    fn from(app: DeployedApp) -> Self {
        Self {
            id: app.id,
            slug: app.slug,
            name: app.name,
            is_active: app.is_active,
            template_ref: app.template_ref,
            public_url: app.public_url,
            version: app.version,
            updated_at: app.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct AttachResponse {
    pub artifacts: Vec<Artifact>,
}

// ── Helpers ──────────────────────────────────────────────────────────

fn check_configuration(state: &AppState, template: &Template, configuration: &FieldValue) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if let Err(e) = state.format.validate_value(configuration.get(CREDENTIAL_KEY)) {
        errors.push(FieldError::new(CREDENTIAL_KEY, e.to_string()));
    }
    errors.extend(state.validator.validate(&template.config_schema, configuration));
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_apps(State(state): State<Arc<AppState>>) -> Result<Json<AppListResponse>, AppError> {
    let apps = state.persistence().list_deployed_apps().await?;
    Ok(Json(AppListResponse {
        apps: apps.into_iter().map(AppSummary::from).collect(),
    }))
}

async fn create_app(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAppRequest>,
) -> Result<(StatusCode, Json<CreatedApp>), AppError> {
    let template = find_template(&state, &body.template_id).await.map_err(|e| {
        if e.is_not_found() {
            AppError::BadRequest(format!("unknown template '{}'", body.template_id))
        } else {
            e.into()
        }
    })?;
    check_configuration(&state, &template, &body.configuration)?;

    let created = state.persistence().create_deployed_app(body).await?;
    info!(slug = %created.slug, template = %template.slug, "app deployed");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_app(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<DeployedApp>, AppError> {
    Ok(Json(state.persistence().get_deployed_app(&slug).await?))
}

async fn update_app(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(update): Json<AppUpdate>,
) -> Result<Json<DeployedApp>, AppError> {
    if let Some(configuration) = &update.configuration {
        let app = state.persistence().get_deployed_app(&slug).await?;
        let template = find_template(&state, &app.template_ref).await?;
        check_configuration(&state, &template, configuration)?;
    }
    let app = state.persistence().update_deployed_app(&slug, update).await?;
    Ok(Json(app))
}

async fn delete_app(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    state.persistence().delete_deployed_app(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `404` when the app is unknown or the session holds nothing.
async fn attach_artifacts(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<Uuid>,
    Json(body): Json<AttachRequest>,
) -> Result<Json<AttachResponse>, AppError> {
    let artifacts = state
        .persistence()
        .attach_pending_artifacts(app_id, &body.session_id)
        .await?;
    Ok(Json(AttachResponse { artifacts }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::routes::tests::{KEY, app, seed, send_json};

    #[tokio::test]
    async fn create_read_update_delete() {
        let app = app(None);
        let created = seed(&app, "bot").await;
        assert_eq!(created["public_url"], "https://apps.test/apps/bot");

        let (status, list) = send_json(&app, "GET", "/v1/apps", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["apps"][0]["slug"], "bot");
        assert!(list["apps"][0].get("configuration").is_none());

        let (status, body) = send_json(
            &app,
            "PUT",
            "/v1/apps/bot",
            Some(json!({"configuration": {"general": {"title": "Changed"}, "api_key": KEY}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
        assert_eq!(body["configuration"]["general"]["title"], "Changed");

        let (status, _) = send_json(&app, "DELETE", "/v1/apps/bot", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send_json(&app, "GET", "/v1/apps/bot", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_slug_and_stale_version_conflict() {
        let app = app(None);
        seed(&app, "bot").await;
        let (status, _) = send_json(
            &app,
            "POST",
            "/v1/apps",
            Some(json!({
                "template_id": "tpl-chat", "name": "Again", "slug": "bot",
                "configuration": {"general": {"title": "x"}, "api_key": KEY}, "code": ""
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send_json(
            &app,
            "PUT",
            "/v1/apps/bot",
            Some(json!({"name": "Renamed", "expected_version": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["message"].as_str().unwrap().contains("reload and retry"));
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let app = app(None);
        seed(&app, "bot").await;
        let (status, body) = send_json(
            &app,
            "POST",
            "/v1/apps",
            Some(json!({
                "template_id": "chat-assistant", "name": "Keyless", "slug": "keyless",
                "configuration": {"general": {"title": ""}, "api_key": "test-key"}, "code": ""
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let paths: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        assert!(paths.contains(&"api_key"));
        assert!(paths.contains(&"general.title"));

        let (status, _) = send_json(
            &app,
            "POST",
            "/v1/apps",
            Some(json!({
                "template_id": "nope", "name": "X", "slug": "x",
                "configuration": {"api_key": KEY}, "code": ""
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn attach_moves_uploads_and_404s_when_empty() {
        let app = app(None);
        let created = seed(&app, "bot").await;
        let id = created["id"].as_str().unwrap();
        let uri = format!("/v1/apps/{id}/artifacts/attach");

        let (status, _) = send_json(&app, "POST", &uri, Some(json!({"session_id": "upl-1"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(
            &app,
            "POST",
            "/v1/uploads/upl-1",
            Some(json!({"file_name": "faq.md", "content_type": "text/markdown", "content": "# FAQ"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send_json(&app, "POST", &uri, Some(json!({"session_id": "upl-1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["artifacts"][0]["file_name"], "faq.md");

        let (status, _) = send_json(&app, "POST", &uri, Some(json!({"session_id": "upl-1"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
