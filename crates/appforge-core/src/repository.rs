//! [`Persistence`] over a key-value [`StorageBackend`].
//!
//! Documents are JSON. Key layout:
//!
//! | Key                                  | Document            |
//! |--------------------------------------|---------------------|
//! | `templates/{slug}`                   | [`Template`]        |
//! | `apps/{slug}`                        | [`DeployedApp`]     |
//! | `app-ids/{id}`                       | slug of the app     |
//! | `artifacts/pending/{session}/{id}`   | artifact + content  |
//! | `artifacts/apps/{app_id}/{id}`       | artifact + content  |
//!
//! Read-modify-write sequences run under one async mutex, so slug
//! uniqueness and version checks hold within a process.

use std::sync::Arc;

use appforge_storage::StorageBackend;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::deploy::is_valid_slug;
use crate::error::PersistenceError;
use crate::persistence::{
    AppUpdate, Artifact, ArtifactUpload, CreateAppRequest, CreatedApp, DeployedApp, Persistence,
};
use crate::schema::Template;

#[derive(Serialize, Deserialize)]
struct StoredArtifact {
    #[serde(flatten)]
    meta: Artifact,
    content: String,
}

/// Storage-backed persistence used by the server.
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    public_base_url: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// `public_base_url` prefixes every app's public URL, e.g.
    /// `https://apps.example.com` → `https://apps.example.com/apps/{slug}`.
    pub fn new(backend: Arc<dyn StorageBackend>, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_owned();
        Self {
            backend,
            public_base_url,
            write_lock: Mutex::new(()),
        }
    }

    /// Public URL of the app with this slug.
    #[must_use]
    pub fn public_url(&self, slug: &str) -> String {
        format!("{}/apps/{slug}", self.public_base_url)
    }

    /// Artifacts attached to an app, with their content.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backend fails.
    pub async fn app_artifacts(&self, app_id: Uuid) -> Result<Vec<(Artifact, String)>, PersistenceError> {
        let stored: Vec<StoredArtifact> = self.load_all(&format!("artifacts/apps/{app_id}/")).await?;
        Ok(stored.into_iter().map(|s| (s.meta, s.content)).collect())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PersistenceError> {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn load_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, PersistenceError> {
        let mut out = Vec::new();
        for key in self.backend.list(prefix).await? {
            if let Some(doc) = self.load(&key).await? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    async fn store<T: Serialize + Sync>(&self, key: &str, doc: &T) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(doc)?;
        self.backend.put(key, &bytes).await?;
        Ok(())
    }

    async fn app(&self, slug: &str) -> Result<DeployedApp, PersistenceError> {
        self.load(&app_key(slug))
            .await?
            .ok_or_else(|| PersistenceError::not_found(format!("deployed app '{slug}'")))
    }
}

fn app_key(slug: &str) -> String {
    format!("apps/{slug}")
}

fn check_slug(slug: &str) -> Result<(), PersistenceError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        Err(PersistenceError::InvalidRequest(format!(
            "slug '{slug}' may only contain lowercase letters, digits and '-'"
        )))
    }
}

fn check_session_id(session_id: &str) -> Result<(), PersistenceError> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::InvalidRequest(
            "upload session id may only contain alphanumeric characters, '_' and '-'".to_owned(),
        ))
    }
}

#[async_trait]
impl Persistence for Repository {
    async fn create_deployed_app(&self, request: CreateAppRequest) -> Result<CreatedApp, PersistenceError> {
        check_slug(&request.slug)?;
        if request.name.trim().is_empty() {
            return Err(PersistenceError::InvalidRequest("app name must not be empty".to_owned()));
        }

        let _guard = self.write_lock.lock().await;
        let key = app_key(&request.slug);
        if self.backend.exists(&key).await? {
            return Err(PersistenceError::Conflict(format!(
                "an app with slug '{}' already exists",
                request.slug
            )));
        }

        let now = Utc::now();
        let app = DeployedApp {
            id: Uuid::new_v4(),
            public_url: self.public_url(&request.slug),
            slug: request.slug,
            name: request.name,
            is_active: true,
            template_ref: request.template_id,
            configuration: request.configuration,
            code: request.code,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.store(&key, &app).await?;
        self.store(&format!("app-ids/{}", app.id), &app.slug).await?;

        info!(slug = %app.slug, id = %app.id, "deployed app created");
        Ok(CreatedApp::from(&app))
    }

    async fn update_deployed_app(&self, slug: &str, update: AppUpdate) -> Result<DeployedApp, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut app = self.app(slug).await?;

        if let Some(expected) = update.expected_version {
            if expected != app.version {
                return Err(PersistenceError::Conflict(format!(
                    "app '{slug}' changed since it was loaded (version {expected}, now {}); reload and retry",
                    app.version
                )));
            }
        }

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(PersistenceError::InvalidRequest("app name must not be empty".to_owned()));
            }
            app.name = name;
        }
        if let Some(is_active) = update.is_active {
            app.is_active = is_active;
        }
        if let Some(configuration) = update.configuration {
            app.configuration = configuration;
        }
        if let Some(code) = update.code {
            app.code = code;
        }
        app.version += 1;
        app.updated_at = Utc::now();

        self.store(&app_key(slug), &app).await?;
        debug!(slug, version = app.version, "deployed app updated");
        Ok(app)
    }

    async fn delete_deployed_app(&self, slug: &str) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let app = self.app(slug).await?;

        for key in self.backend.list(&format!("artifacts/apps/{}/", app.id)).await? {
            self.backend.delete(&key).await?;
        }
        self.backend.delete(&format!("app-ids/{}", app.id)).await?;
        self.backend.delete(&app_key(slug)).await?;

        info!(slug, id = %app.id, "deployed app deleted");
        Ok(())
    }

    async fn get_deployed_app(&self, slug: &str) -> Result<DeployedApp, PersistenceError> {
        self.app(slug).await
    }

    async fn list_deployed_apps(&self) -> Result<Vec<DeployedApp>, PersistenceError> {
        self.load_all("apps/").await
    }

    async fn get_template(&self, slug: &str) -> Result<Template, PersistenceError> {
        self.load(&format!("templates/{slug}"))
            .await?
            .ok_or_else(|| PersistenceError::not_found(format!("template '{slug}'")))
    }

    async fn list_templates(&self) -> Result<Vec<Template>, PersistenceError> {
        self.load_all("templates/").await
    }

    async fn put_template(&self, template: Template) -> Result<Template, PersistenceError> {
        check_slug(&template.slug)?;
        self.store(&format!("templates/{}", template.slug), &template)
            .await?;
        debug!(slug = %template.slug, "template stored");
        Ok(template)
    }

    async fn upload_pending_artifact(
        &self,
        session_id: &str,
        upload: ArtifactUpload,
    ) -> Result<Artifact, PersistenceError> {
        check_session_id(session_id)?;
        if upload.file_name.trim().is_empty() {
            return Err(PersistenceError::InvalidRequest("file name must not be empty".to_owned()));
        }

        let meta = Artifact {
            id: Uuid::new_v4(),
            file_name: upload.file_name,
            content_type: upload.content_type,
            size: upload.content.len() as u64,
            app_id: None,
            session_id: Some(session_id.to_owned()),
            uploaded_at: Utc::now(),
        };
        let key = format!("artifacts/pending/{session_id}/{}", meta.id);
        let stored = StoredArtifact {
            meta,
            content: upload.content,
        };
        self.store(&key, &stored).await?;
        debug!(session_id, artifact = %stored.meta.id, "pending artifact stored");
        Ok(stored.meta)
    }

    async fn attach_pending_artifacts(
        &self,
        app_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<Artifact>, PersistenceError> {
        check_session_id(session_id)?;
        let _guard = self.write_lock.lock().await;

        if !self.backend.exists(&format!("app-ids/{app_id}")).await? {
            return Err(PersistenceError::not_found(format!("deployed app {app_id}")));
        }

        let prefix = format!("artifacts/pending/{session_id}/");
        let keys = self.backend.list(&prefix).await?;
        if keys.is_empty() {
            return Err(PersistenceError::not_found(format!(
                "pending artifacts for upload session '{session_id}'"
            )));
        }

        let mut attached = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(mut stored) = self.load::<StoredArtifact>(&key).await? else {
                continue;
            };
            stored.meta.app_id = Some(app_id);
            stored.meta.session_id = None;
            self.store(&format!("artifacts/apps/{app_id}/{}", stored.meta.id), &stored)
                .await?;
            self.backend.delete(&key).await?;
            attached.push(stored.meta);
        }

        info!(%app_id, session_id, count = attached.len(), "pending artifacts attached");
        Ok(attached)
    }
}
