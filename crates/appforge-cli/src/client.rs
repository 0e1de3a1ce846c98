//! HTTP collaborators: the appforge server as a [`Persistence`] backend and
//! a remote key service as a [`CredentialSelector`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use appforge_core::credential::{Credential, CredentialFetch, CredentialFormat, CredentialSelector};
use appforge_core::error::PersistenceError;
use appforge_core::persistence::{
    AppUpdate, Artifact, ArtifactUpload, CreateAppRequest, CreatedApp, DeployedApp, Persistence,
};
use appforge_core::schema::Template;

/// Attempts for idempotent requests that fail before a response arrives.
const GET_ATTEMPTS: u32 = 3;

/// Map a non-success response to a [`PersistenceError`]. The server's
/// `message` field is used verbatim when present; a validation answer
/// without one is described by its field errors.
pub fn error_from_response(status: StatusCode, body: &str) -> PersistenceError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let fields: Vec<String> = parsed
        .as_ref()
        .and_then(|v| v.get("errors"))
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| {
                    let message = e.get("message")?.as_str()?;
                    match e.get("path").and_then(Value::as_str) {
                        Some(path) if !path.is_empty() => Some(format!("{path}: {message}")),
                        _ => Some(message.to_owned()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .filter(|m| !m.is_empty())
        .or_else(|| (!fields.is_empty()).then(|| fields.join("; ")))
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_owned()
            }
        });
    match status {
        StatusCode::NOT_FOUND => PersistenceError::NotFound {
            what: message.trim_end_matches(" not found").to_owned(),
        },
        StatusCode::CONFLICT => PersistenceError::Conflict(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PersistenceError::Unauthorized(message),
        StatusCode::BAD_REQUEST => PersistenceError::InvalidRequest(message),
        other => PersistenceError::Rejected {
            status: other.as_u16(),
            message,
        },
    }
}

// ── Persistence over HTTP ────────────────────────────────────────────

/// A template as listed by the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

/// A deployed app as listed by the server, without its configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_active: bool,
    pub template_ref: String,
    pub public_url: String,
    pub version: u64,
}

#[derive(Deserialize)]
struct TemplateList {
    templates: Vec<TemplateSummary>,
}

#[derive(Deserialize)]
struct AppList {
    apps: Vec<AppSummary>,
}

#[derive(Deserialize)]
struct Attached {
    artifacts: Vec<Artifact>,
}

/// The appforge server's REST API.
#[derive(Debug, Clone)]
pub struct HttpPersistence {
    http: reqwest::Client,
    addr: String,
    token: Option<String>,
}

impl HttpPersistence {
    pub fn new(addr: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            addr: addr.trim_end_matches('/').to_owned(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.addr)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, PersistenceError> {
        let response = builder
            .send()
            .await
            .map_err(|e| PersistenceError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PersistenceError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        let body = if body.is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    /// `GET` with retries on transport failures.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PersistenceError> {
        let mut attempt = 0;
        loop {
            match self.send(self.request(Method::GET, path)).await {
                Err(PersistenceError::Transport(reason)) if attempt + 1 < GET_ATTEMPTS => {
                    let backoff = Duration::from_millis(250 << attempt);
                    debug!(path, attempt = attempt + 1, %reason, "request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// `GET /v1/sys/health`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] when the server is unreachable or unhealthy.
    pub async fn health(&self) -> Result<Value, PersistenceError> {
        self.get("/v1/sys/health").await
    }

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the request fails.
    pub async fn template_summaries(&self) -> Result<Vec<TemplateSummary>, PersistenceError> {
        Ok(self.get::<TemplateList>("/v1/templates").await?.templates)
    }

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the request fails.
    pub async fn app_summaries(&self) -> Result<Vec<AppSummary>, PersistenceError> {
        Ok(self.get::<AppList>("/v1/apps").await?.apps)
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn create_deployed_app(&self, request: CreateAppRequest) -> Result<CreatedApp, PersistenceError> {
        self.send(self.request(Method::POST, "/v1/apps").json(&request))
            .await
    }

    async fn update_deployed_app(&self, slug: &str, update: AppUpdate) -> Result<DeployedApp, PersistenceError> {
        self.send(self.request(Method::PUT, &format!("/v1/apps/{slug}")).json(&update))
            .await
    }

    async fn delete_deployed_app(&self, slug: &str) -> Result<(), PersistenceError> {
        self.send::<Value>(self.request(Method::DELETE, &format!("/v1/apps/{slug}")))
            .await
            .map(|_| ())
    }

    async fn get_deployed_app(&self, slug: &str) -> Result<DeployedApp, PersistenceError> {
        self.get(&format!("/v1/apps/{slug}")).await
    }

    async fn list_deployed_apps(&self) -> Result<Vec<DeployedApp>, PersistenceError> {
        let mut apps = Vec::new();
        for summary in self.app_summaries().await? {
            apps.push(self.get_deployed_app(&summary.slug).await?);
        }
        Ok(apps)
    }

    async fn get_template(&self, slug: &str) -> Result<Template, PersistenceError> {
        self.get(&format!("/v1/templates/{slug}")).await
    }

    async fn list_templates(&self) -> Result<Vec<Template>, PersistenceError> {
        let mut templates = Vec::new();
        for summary in self.template_summaries().await? {
            templates.push(self.get_template(&summary.slug).await?);
        }
        Ok(templates)
    }

    async fn put_template(&self, template: Template) -> Result<Template, PersistenceError> {
        let path = format!("/v1/templates/{}", template.slug);
        self.send(self.request(Method::PUT, &path).json(&template)).await
    }

    async fn upload_pending_artifact(
        &self,
        session_id: &str,
        upload: ArtifactUpload,
    ) -> Result<Artifact, PersistenceError> {
        self.send(self.request(Method::POST, &format!("/v1/uploads/{session_id}")).json(&upload))
            .await
    }

    async fn attach_pending_artifacts(
        &self,
        app_id: Uuid,
        session_id: &str,
    ) -> Result<Vec<Artifact>, PersistenceError> {
        let path = format!("/v1/apps/{app_id}/artifacts/attach");
        let attached: Attached = self
            .send(self.request(Method::POST, &path).json(&json!({ "session_id": session_id })))
            .await?;
        Ok(attached.artifacts)
    }
}

// ── Credentials over HTTP ────────────────────────────────────────────

/// Why one key endpoint could not be used.
#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("key service denied access ({0})")]
    Denied(StatusCode),
    #[error("key service returned {0}")]
    Status(StatusCode),
    #[error("key service unreachable: {0}")]
    Transport(String),
    #[error("key service sent an unreadable list: {0}")]
    Body(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyList {
    Bare(Vec<Credential>),
    Wrapped {
        #[serde(alias = "data", alias = "api_keys")]
        keys: Vec<Credential>,
    },
}

impl From<KeyList> for Vec<Credential> {
    fn from(list: KeyList) -> Self {
        match list {
            KeyList::Bare(keys) | KeyList::Wrapped { keys } => keys,
        }
    }
}

/// Lists the user's API keys from a key service.
///
/// The primary endpoint is tried first. When it answers 401 or 403 the
/// secondary endpoint is tried. Anything else that goes wrong yields
/// [`CredentialFetch::Fallback`] with an empty list.
#[derive(Debug, Clone)]
pub struct HttpCredentialSelector {
    http: reqwest::Client,
    primary: Option<String>,
    secondary: Option<String>,
    token: Option<String>,
    format: CredentialFormat,
}

impl HttpCredentialSelector {
    pub fn new(
        primary: Option<String>,
        secondary: Option<String>,
        token: Option<String>,
        format: CredentialFormat,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            primary: primary.filter(|u| !u.trim().is_empty()),
            secondary: secondary.filter(|u| !u.trim().is_empty()),
            token,
            format,
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<Credential>, FetchError> {
        let mut builder = self.http.get(url);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        match response.status() {
            s if s.is_success() => response
                .json::<KeyList>()
                .await
                .map(Vec::from)
                .map_err(|e| FetchError::Body(e.to_string())),
            s @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => Err(FetchError::Denied(s)),
            s => Err(FetchError::Status(s)),
        }
    }
}

#[async_trait]
impl CredentialSelector for HttpCredentialSelector {
    async fn list_credentials(&self) -> CredentialFetch {
        let Some(primary) = &self.primary else {
            return CredentialFetch::Fallback {
                reason: "no key service configured".to_owned(),
            };
        };

        let result = match self.fetch(primary).await {
            Err(FetchError::Denied(status)) => match &self.secondary {
                Some(secondary) => {
                    debug!(%status, "primary key endpoint denied access, trying secondary");
                    self.fetch(secondary).await
                }
                None => Err(FetchError::Denied(status)),
            },
            other => other,
        };

        match result {
            Ok(credentials) => CredentialFetch::Live(credentials),
            Err(e) => {
                warn!(error = %e, "could not list credentials");
                CredentialFetch::Fallback { reason: e.to_string() }
            }
        }
    }

    fn format(&self) -> &CredentialFormat {
        &self.format
    }
}
