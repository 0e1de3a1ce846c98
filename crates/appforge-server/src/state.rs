//! Shared application state for the appforge server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use appforge_core::credential::CredentialFormat;
use appforge_core::persistence::Persistence;
use appforge_core::repository::Repository;
use appforge_core::validator::JsonSchemaValidator;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Templates, deployed apps and artifacts.
    pub repository: Arc<Repository>,
    /// Bearer token required on protected `/v1/*` routes. `None` disables
    /// the check.
    pub admin_token: Option<String>,
    /// Format every stored `api_key` must match.
    pub format: CredentialFormat,
    /// Checks submitted configurations against their template schema.
    pub validator: Arc<JsonSchemaValidator>,
    /// Name of the storage backend, reported by the health route.
    pub storage: &'static str,
}

impl AppState {
    #[must_use]
    pub fn new(repository: Arc<Repository>, storage: &'static str) -> Self {
        Self {
            repository,
            admin_token: None,
            format: CredentialFormat::default(),
            validator: Arc::new(JsonSchemaValidator::new()),
            storage,
        }
    }

    #[must_use]
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: CredentialFormat) -> Self {
        self.format = format;
        self
    }

    /// The repository as the persistence collaborator.
    #[must_use]
    pub fn persistence(&self) -> &dyn Persistence {
        self.repository.as_ref()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.storage)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "[redacted]"))
            .field("credential_pattern", &self.format.pattern())
            .finish_non_exhaustive()
    }
}
