//! The persistence collaborator: deployed apps, templates and uploaded
//! artifacts.
//!
//! [`crate::repository::Repository`] implements [`Persistence`] over a
//! storage backend; the CLI implements it over HTTP against the server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::schema::Template;
use crate::value::FieldValue;

// ── Deployed apps ────────────────────────────────────────────────────

/// A template instance bound to a configuration, exposed at `public_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedApp {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    /// Id of the template the app was created from.
    pub template_ref: String,
    /// The full configuration tree, stored as one opaque blob.
    pub configuration: FieldValue,
    /// Template source captured at deploy time.
    pub code: String,
    pub public_url: String,
    /// Incremented on every update; see [`AppUpdate::expected_version`].
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of the first deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAppRequest {
    pub template_id: String,
    pub name: String,
    pub slug: String,
    pub configuration: FieldValue,
    pub code: String,
}

/// Identity of a freshly created app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedApp {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub public_url: String,
}

impl From<&DeployedApp> for CreatedApp {
    fn from(app: &DeployedApp) -> Self {
        Self {
            id: app.id,
            slug: app.slug.clone(),
            name: app.name.clone(),
            public_url: app.public_url.clone(),
        }
    }
}

/// A partial or full update. `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// When set, the update is rejected with a conflict unless the stored
    /// version still equals it. When unset, the last write wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

// ── Artifacts ────────────────────────────────────────────────────────

/// A file uploaded for an app, e.g. a knowledge document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    /// Set once attached to a deployed app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<Uuid>,
    /// Set while the artifact waits in a temporary upload session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// An upload into a temporary session, before the app has an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactUpload {
    pub file_name: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub content: String,
}

fn default_content_type() -> String {
    "text/plain".to_owned()
}

// ── Collaborator ─────────────────────────────────────────────────────

/// Backend operations the engine depends on.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// # Errors
    ///
    /// [`PersistenceError::Conflict`] if the slug is taken,
    /// [`PersistenceError::InvalidRequest`] for an unusable slug or name.
    async fn create_deployed_app(&self, request: CreateAppRequest) -> Result<CreatedApp, PersistenceError>;

    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] for an unknown slug,
    /// [`PersistenceError::Conflict`] when `expected_version` is stale.
    async fn update_deployed_app(&self, slug: &str, update: AppUpdate) -> Result<DeployedApp, PersistenceError>;

    /// Irreversibly delete an app and its artifacts.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] for an unknown slug.
    async fn delete_deployed_app(&self, slug: &str) -> Result<(), PersistenceError>;

    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] for an unknown slug.
    async fn get_deployed_app(&self, slug: &str) -> Result<DeployedApp, PersistenceError>;

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backend fails.
    async fn list_deployed_apps(&self) -> Result<Vec<DeployedApp>, PersistenceError>;

    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] for an unknown slug.
    async fn get_template(&self, slug: &str) -> Result<Template, PersistenceError>;

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backend fails.
    async fn list_templates(&self) -> Result<Vec<Template>, PersistenceError>;

    /// Create or replace a template.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::InvalidRequest`] for an unusable slug.
    async fn put_template(&self, template: Template) -> Result<Template, PersistenceError>;

    /// Store an artifact in a temporary upload session.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::InvalidRequest`] for an unusable session id.
    async fn upload_pending_artifact(
        &self,
        session_id: &str,
        upload: ArtifactUpload,
    ) -> Result<Artifact, PersistenceError>;

    /// Move every artifact of `session_id` to the app.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] when the session holds nothing, which
    /// callers treat as "already attached".
    async fn attach_pending_artifacts(
        &self,
        app_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<Artifact>, PersistenceError>;
}
