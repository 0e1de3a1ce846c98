//! First deployment of a template.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::credential::{CREDENTIAL_KEY, CredentialFormat};
use crate::error::DeployError;
use crate::path::ConfigPath;
use crate::persistence::{Artifact, CreateAppRequest, CreatedApp, Persistence};
use crate::schema::Template;
use crate::store::set_path;
use crate::validator::{FieldError, JsonSchemaValidator, Validator};
use crate::value::{ConfigTree, FieldValue};

/// Error path of the app name in [`DeployError::Validation`].
pub const NAME_FIELD: &str = "$name";
/// Error path of the slug in [`DeployError::Validation`].
pub const SLUG_FIELD: &str = "$slug";

/// Name and slug entered in the wizard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    pub name: String,
    pub slug: String,
}

impl DeploymentMetadata {
    /// Problems with the name or slug.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(FieldError::new(NAME_FIELD, "name must not be empty"));
        }
        if !is_valid_slug(&self.slug) {
            errors.push(FieldError::new(
                SLUG_FIELD,
                "slug may only contain lowercase letters, digits and '-'",
            ));
        }
        errors
    }
}

/// Whether `slug` matches `^[a-z0-9-]+$`.
#[must_use]
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// A slug suggestion derived from an app name: `My App 2` → `my-app-2`.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_owned()
}

/// Everything one deployment needs.
#[derive(Debug, Clone, Copy)]
pub struct DeployRequest<'a> {
    pub template: &'a Template,
    pub tree: &'a ConfigTree,
    pub metadata: &'a DeploymentMetadata,
    /// The selected API key.
    pub credential: Option<&'a str>,
    /// Temporary upload session whose artifacts should follow the app.
    pub upload_session: Option<&'a str>,
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone)]
pub struct DeployReceipt {
    pub app: CreatedApp,
    /// The configuration exactly as submitted, credential included.
    pub configuration: ConfigTree,
    pub attached: Vec<Artifact>,
    /// Set when attaching uploaded artifacts failed for a reason other than
    /// there being nothing to attach. The app itself is deployed.
    pub attach_warning: Option<String>,
}

/// Validates and submits deployments.
pub struct DeploymentOrchestrator {
    persistence: Arc<dyn Persistence>,
    validator: Arc<dyn Validator>,
    format: CredentialFormat,
}

impl std::fmt::Debug for DeploymentOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentOrchestrator")
            .field("format", &self.format.pattern())
            .finish_non_exhaustive()
    }
}

impl DeploymentOrchestrator {
    pub fn new(persistence: Arc<dyn Persistence>, format: CredentialFormat) -> Self {
        Self {
            persistence,
            validator: Arc::new(JsonSchemaValidator::new()),
            format,
        }
    }

    /// Replace the default JSON-Schema validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub const fn format(&self) -> &CredentialFormat {
        &self.format
    }

    #[must_use]
    pub fn validator(&self) -> &dyn Validator {
        self.validator.as_ref()
    }

    /// Validate, inject the credential, create the app, then attach any
    /// pending uploads.
    ///
    /// Nothing is sent unless metadata, credential and configuration are
    /// all valid. The caller's tree and metadata are never consumed, so a
    /// failed attempt can simply be retried.
    ///
    /// # Errors
    ///
    /// [`DeployError::Validation`], [`DeployError::CredentialInvalid`], or
    /// [`DeployError::Persistence`] carrying the backend's message.
    pub async fn deploy(&self, request: DeployRequest<'_>) -> Result<DeployReceipt, DeployError> {
        let errors = request.metadata.validate();
        if !errors.is_empty() {
            return Err(DeployError::Validation(errors));
        }
        self.format.validate(request.credential)?;

        let key = request.credential.map(str::trim).unwrap_or_default();
        let configuration = set_path(
            request.tree,
            &ConfigPath::key(CREDENTIAL_KEY),
            FieldValue::text(key),
        );

        let errors = self
            .validator
            .validate(&request.template.config_schema, configuration.root());
        if !errors.is_empty() {
            return Err(DeployError::Validation(errors));
        }

        let payload = CreateAppRequest {
            template_id: request.template.id.clone(),
            name: request.metadata.name.trim().to_owned(),
            slug: request.metadata.slug.clone(),
            configuration: configuration.to_value(),
            code: request.template.template_code.clone(),
        };
        let app = match self.persistence.create_deployed_app(payload).await {
            Ok(app) => app,
            Err(e) => {
                warn!(slug = %request.metadata.slug, error = %e, "deployment rejected");
                return Err(e.into());
            }
        };
        info!(slug = %app.slug, id = %app.id, url = %app.public_url, "template deployed");

        let mut receipt = DeployReceipt {
            app,
            configuration,
            attached: Vec::new(),
            attach_warning: None,
        };
        if let Some(session) = request.upload_session {
            match self
                .persistence
                .attach_pending_artifacts(receipt.app.id, session)
                .await
            {
                Ok(attached) => {
                    info!(slug = %receipt.app.slug, count = attached.len(), "uploaded artifacts attached");
                    receipt.attached = attached;
                }
                Err(e) if e.is_not_found() => {
                    info!(slug = %receipt.app.slug, session, "no pending artifacts to attach");
                }
                Err(e) => {
                    warn!(slug = %receipt.app.slug, session, error = %e, "attaching uploaded artifacts failed");
                    receipt.attach_warning = Some(e.to_string());
                }
            }
        }
        Ok(receipt)
    }
}
