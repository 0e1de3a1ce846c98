//! Template routes: `/v1/templates/*`
//!
//! Listing and reading are public; storing a template needs the admin token.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use appforge_core::ConfigPath;
use appforge_core::error::PersistenceError;
use appforge_core::resolver::placeholders;
use appforge_core::schema::Template;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/v1/templates` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_templates))
        .route("/{slug}", get(get_template).put(put_template))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub templates: Vec<TemplateSummary>,
}

#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub sections: Vec<String>,
    pub placeholders: Vec<String>,
}

impl From<&Template> for TemplateSummary {
    fn from(t: &Template) -> Self {
        Self {
            id: t.id.clone(),
            slug: t.slug.clone(),
            name: t.name.clone(),
            description: t.description.clone(),
            tags: t.tags.clone(),
            sections: t.sections().into_iter().map(|s| s.key).collect(),
            placeholders: placeholders(&t.template_code)
                .iter()
                .map(ConfigPath::to_string)
                .collect(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Find a template by slug, then by id.
pub(crate) async fn find_template(state: &AppState, reference: &str) -> Result<Template, PersistenceError> {
    match state.persistence().get_template(reference).await {
        Err(e) if e.is_not_found() => state
            .persistence()
            .list_templates()
            .await?
            .into_iter()
            .find(|t| t.id == reference)
            .ok_or(e),
        other => other,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_templates(State(state): State<Arc<AppState>>) -> Result<Json<TemplateListResponse>, AppError> {
    let templates = state.persistence().list_templates().await?;
    Ok(Json(TemplateListResponse {
        templates: templates.iter().map(TemplateSummary::from).collect(),
    }))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Template>, AppError> {
    Ok(Json(find_template(&state, &slug).await?))
}

/// Create or replace a template. The path slug wins over an empty body slug;
/// a different body slug is rejected.
async fn put_template(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    Json(mut template): Json<Template>,
) -> Result<Json<Template>, AppError> {
    if template.slug.is_empty() {
        template.slug.clone_from(&slug);
    } else if template.slug != slug {
        return Err(AppError::BadRequest(format!(
            "template slug '{}' does not match path '{slug}'",
            template.slug
        )));
    }
    if template.id.is_empty() {
        template.id.clone_from(&slug);
    }
    if template.name.trim().is_empty() {
        return Err(AppError::BadRequest("template name must not be empty".to_owned()));
    }
    state
        .validator
        .check_schema(&template.config_schema)
        .map_err(|reason| AppError::BadRequest(format!("template schema is invalid: {reason}")))?;

    let stored = state.persistence().put_template(template).await?;
    info!(slug = %stored.slug, "template stored");
    Ok(Json(stored))
}
