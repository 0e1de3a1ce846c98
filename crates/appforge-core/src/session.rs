//! The two screens that own a configuration store: the first-deployment
//! wizard and the edit view of a deployed app.
//!
//! Both are plain state holders. The only suspension points are calls to
//! the persistence collaborator (commits, deploy and artifact attachment)
//! and to the credential selector.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::credential::{CREDENTIAL_KEY, CredentialFetch, CredentialFormat, CredentialSelector, mask};
use crate::deploy::{DeployReceipt, DeployRequest, DeploymentMetadata, DeploymentOrchestrator, slugify};
use crate::error::{ChangeRejected, CommitError, DeleteError, DeployError, PersistenceError, TransitionError};
use crate::form::{self, FormInput, FormMode, FormView};
use crate::persistence::{AppUpdate, DeployedApp, Persistence};
use crate::preview::PreviewRenderer;
use crate::schema::Template;
use crate::section::{SectionEditController, SectionState};
use crate::store::ConfigStore;
use crate::validator::{FieldError, JsonSchemaValidator, Validator};
use crate::value::{ConfigTree, FieldValue};
use crate::view_state::{ViewStatePersistence, WizardStep, WizardViewState};

// ── Notifications ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "key")]
pub enum NotificationScope {
    Screen,
    Section(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
}

/// A message for the user, queued until the host drains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub scope: NotificationScope,
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    fn section(key: &str, level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            scope: NotificationScope::Section(key.to_owned()),
            level,
            message: message.into(),
        }
    }

    fn screen(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            scope: NotificationScope::Screen,
            level,
            message: message.into(),
        }
    }
}

// ── Edit view ────────────────────────────────────────────────────────

/// Settings shared by edit sessions.
#[derive(Clone)]
pub struct SessionOptions {
    pub format: CredentialFormat,
    pub validator: Arc<dyn Validator>,
    /// Attach the loaded version to every save so that a concurrent change
    /// is rejected instead of silently overwritten.
    pub strict_versioning: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            format: CredentialFormat::default(),
            validator: Arc::new(JsonSchemaValidator::new()),
            strict_versioning: false,
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("format", &self.format.pattern())
            .field("strict_versioning", &self.strict_versioning)
            .finish_non_exhaustive()
    }
}

/// A section save ready to be sent.
///
/// Carries the full tree as it was when the save started, so several saves
/// can be in flight while editing continues.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub section: String,
    pub slug: String,
    pub update: AppUpdate,
    tree: ConfigTree,
}

impl CommitRequest {
    /// The snapshot being saved.
    #[must_use]
    pub const fn tree(&self) -> &ConfigTree {
        &self.tree
    }
}

/// The edit view of one deployed app.
pub struct EditSession {
    template: Template,
    app: DeployedApp,
    store: ConfigStore,
    controller: SectionEditController,
    options: SessionOptions,
    preview: PreviewRenderer,
    notifications: Vec<Notification>,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("slug", &self.app.slug)
            .field("version", &self.app.version)
            .finish_non_exhaustive()
    }
}

impl EditSession {
    /// Load the app and its template.
    ///
    /// # Errors
    ///
    /// [`PersistenceError::NotFound`] if the app or its template is gone.
    pub async fn open(
        persistence: &dyn Persistence,
        slug: &str,
        options: SessionOptions,
    ) -> Result<Self, PersistenceError> {
        let app = persistence.get_deployed_app(slug).await?;
        let template = match persistence.get_template(&app.template_ref).await {
            Err(e) if e.is_not_found() => persistence
                .list_templates()
                .await?
                .into_iter()
                .find(|t| t.id == app.template_ref)
                .ok_or(e)?,
            other => other?,
        };
        Ok(Self::from_parts(template, app, options))
    }

    /// Build a session from an already loaded app and template.
    #[must_use]
    pub fn from_parts(template: Template, app: DeployedApp, options: SessionOptions) -> Self {
        let store = ConfigStore::from_persisted(template.defaults(), &app.configuration);
        Self {
            template,
            app,
            store,
            controller: SectionEditController::new(),
            options,
            preview: PreviewRenderer::default(),
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub const fn app(&self) -> &DeployedApp {
        &self.app
    }

    #[must_use]
    pub const fn template(&self) -> &Template {
        &self.template
    }

    #[must_use]
    pub const fn tree(&self) -> &ConfigTree {
        self.store.tree()
    }

    #[must_use]
    pub const fn controller(&self) -> &SectionEditController {
        &self.controller
    }

    #[must_use]
    pub fn section_state(&self, key: &str) -> SectionState {
        self.controller.state(key)
    }

    /// Code stored with the app, falling back to the template's.
    fn code(&self) -> &str {
        if self.app.code.is_empty() {
            &self.template.template_code
        } else {
            &self.app.code
        }
    }

    fn known_section(&self, key: &str) -> Result<(), CommitError> {
        if self.template.sections().iter().any(|s| s.key == key) {
            Ok(())
        } else {
            Err(CommitError::UnknownSection {
                section: key.to_owned(),
            })
        }
    }

    /// Unlock a section.
    ///
    /// # Errors
    ///
    /// [`CommitError::UnknownSection`] or [`CommitError::Transition`].
    pub fn edit_section(&mut self, key: &str) -> Result<(), CommitError> {
        self.known_section(key)?;
        self.controller.begin_edit(key)?;
        Ok(())
    }

    /// Lock a section again, discarding its unsaved edits.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] unless the section is being edited.
    pub fn cancel_section(&mut self, key: &str) -> Result<(), TransitionError> {
        self.controller.cancel(key)?;
        self.store.revert_section(key);
        Ok(())
    }

    /// Route one form edit.
    ///
    /// # Errors
    ///
    /// See [`form::route_change`].
    pub fn on_change(&mut self, raw_path: &str, value: FieldValue) -> Result<bool, ChangeRejected> {
        form::route_change(
            &self.template,
            FormMode::Sections(&self.controller),
            &mut self.store,
            raw_path,
            value,
        )
    }

    /// Replace the stored credential. It is checked when a section is saved.
    pub fn select_credential(&mut self, key: &str) {
        self.store.inject(CREDENTIAL_KEY, FieldValue::text(key.trim()));
    }

    /// Validate the section and the credential, move it to `Committing`
    /// and snapshot the whole tree.
    ///
    /// # Errors
    ///
    /// [`CommitError`] when the section is unknown or not being edited, or
    /// its values or the credential are invalid. The section stays in
    /// `Editing` in those cases.
    pub fn begin_commit(&mut self, key: &str) -> Result<CommitRequest, CommitError> {
        self.known_section(key)?;
        if self.controller.state(key) != SectionState::Editing {
            return Err(TransitionError {
                section: key.to_owned(),
                from: self.controller.state(key),
                action: "save",
            }
            .into());
        }

        let tree = self.store.tree().clone();
        if let Err(e) = self.options.format.validate_value(tree.section(CREDENTIAL_KEY)) {
            self.notifications
                .push(Notification::section(key, NotificationLevel::Error, e.to_string()));
            return Err(e.into());
        }
        let errors: Vec<FieldError> = self
            .options
            .validator
            .validate(&self.template.config_schema, tree.root())
            .into_iter()
            .filter(|e| e.section() == Some(key) || e.section().is_none())
            .collect();
        if !errors.is_empty() {
            let error = CommitError::Validation {
                section: key.to_owned(),
                errors,
            };
            self.notifications
                .push(Notification::section(key, NotificationLevel::Error, error.to_string()));
            return Err(error);
        }

        self.controller.begin_commit(key)?;
        debug!(slug = %self.app.slug, section = key, revision = tree.revision(), "section commit started");
        Ok(CommitRequest {
            section: key.to_owned(),
            slug: self.app.slug.clone(),
            update: AppUpdate {
                configuration: Some(tree.to_value()),
                code: Some(self.code().to_owned()),
                expected_version: self.options.strict_versioning.then_some(self.app.version),
                ..AppUpdate::default()
            },
            tree,
        })
    }

    /// Apply the outcome of a save started with [`EditSession::begin_commit`].
    ///
    /// # Errors
    ///
    /// [`CommitError::Persistence`] when the save failed; the section is
    /// back in `Editing` with its edits intact.
    pub fn finish_commit(
        &mut self,
        request: CommitRequest,
        result: Result<DeployedApp, PersistenceError>,
    ) -> Result<(), CommitError> {
        let key = request.section.as_str();
        match result {
            Ok(saved) => {
                self.controller.commit_succeeded(key)?;
                // Responses can arrive out of order; only the newest version
                // describes what the backend holds.
                if saved.version >= self.app.version {
                    self.store.mark_persisted(&request.tree);
                    self.app = saved;
                }
                let title = self.section_title(key);
                info!(slug = %self.app.slug, section = key, version = self.app.version, "section saved");
                self.notifications.push(Notification::section(
                    key,
                    NotificationLevel::Success,
                    format!("{title} saved"),
                ));
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    PersistenceError::Conflict(_) => {
                        "this app was changed elsewhere; reload and retry".to_owned()
                    }
                    other => other.to_string(),
                };
                self.controller.commit_failed(key, message.clone())?;
                warn!(slug = %self.app.slug, section = key, error = %e, "section save failed");
                self.notifications
                    .push(Notification::section(key, NotificationLevel::Error, message));
                Err(e.into())
            }
        }
    }

    /// Save one section: [`EditSession::begin_commit`], send, then
    /// [`EditSession::finish_commit`].
    ///
    /// # Errors
    ///
    /// See those two methods.
    pub async fn commit_section(&mut self, persistence: &dyn Persistence, key: &str) -> Result<(), CommitError> {
        let request = self.begin_commit(key)?;
        let result = persistence
            .update_deployed_app(&request.slug, request.update.clone())
            .await;
        self.finish_commit(request, result)
    }

    /// Reload the stored configuration, overwriting unsaved edits. Open
    /// sections stay open so a rejected save can be redone.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the app cannot be fetched.
    pub async fn reload(&mut self, persistence: &dyn Persistence) -> Result<(), PersistenceError> {
        let app = persistence.get_deployed_app(&self.app.slug).await?;
        self.store.load(&app.configuration);
        self.app = app;
        debug!(slug = %self.app.slug, version = self.app.version, "deployed app reloaded");
        Ok(())
    }

    /// Change the app's name or active flag.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backend rejects the update.
    pub async fn update_settings(
        &mut self,
        persistence: &dyn Persistence,
        name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<&DeployedApp, PersistenceError> {
        let update = AppUpdate {
            name,
            is_active,
            expected_version: self.options.strict_versioning.then_some(self.app.version),
            ..AppUpdate::default()
        };
        match persistence.update_deployed_app(&self.app.slug, update).await {
            Ok(app) => {
                self.app = app;
                self.notifications
                    .push(Notification::screen(NotificationLevel::Success, "Settings saved"));
                Ok(&self.app)
            }
            Err(e) => {
                warn!(slug = %self.app.slug, error = %e, "settings update failed");
                self.notifications
                    .push(Notification::screen(NotificationLevel::Error, e.to_string()));
                Err(e)
            }
        }
    }

    /// The form for the current state.
    #[must_use]
    pub fn form(&self) -> FormView {
        let errors = self
            .options
            .validator
            .validate(&self.template.config_schema, self.store.tree().root());
        let credential = self
            .options
            .format
            .validate_value(self.store.tree().section(CREDENTIAL_KEY));
        let mut view = form::render(&FormInput {
            template: &self.template,
            tree: self.store.tree(),
            mode: FormMode::Sections(&self.controller),
            errors: &errors,
            credential: credential.as_ref().map(|_| ()),
        });
        form::mark_dirty(&mut view, &self.store);
        view
    }

    /// The resolved document for the current tree.
    pub fn preview(&mut self) -> Arc<str> {
        let code = self.code().to_owned();
        self.preview.update(Some(&code), Some(self.store.tree()))
    }

    pub fn preview_renderer(&mut self) -> &mut PreviewRenderer {
        &mut self.preview
    }

    /// Take all queued notifications.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    fn section_title(&self, key: &str) -> String {
        self.template
            .sections()
            .into_iter()
            .find(|s| s.key == key)
            .map_or_else(|| key.to_owned(), |s| s.title)
    }
}

/// Delete a deployed app after the user typed its slug to confirm.
///
/// # Errors
///
/// [`DeleteError::ConfirmationMismatch`] without contacting the backend,
/// or [`DeleteError::Persistence`].
pub async fn delete_deployed_app(
    persistence: &dyn Persistence,
    slug: &str,
    confirmation: &str,
) -> Result<(), DeleteError> {
    if confirmation.trim() != slug {
        return Err(DeleteError::ConfirmationMismatch {
            slug: slug.to_owned(),
        });
    }
    persistence.delete_deployed_app(slug).await?;
    info!(slug, "deployed app deleted");
    Ok(())
}

// ── Wizard ───────────────────────────────────────────────────────────

/// Everything the wizard screen draws.
#[derive(Debug, Clone, Serialize)]
pub struct WizardView {
    pub step: WizardStep,
    pub metadata: DeploymentMetadata,
    pub metadata_errors: Vec<FieldError>,
    /// The selected key, masked.
    pub credential: Option<String>,
    pub form: FormView,
    pub deploy_enabled: bool,
}

/// The first-deployment wizard of one template.
pub struct WizardSession {
    template: Template,
    store: ConfigStore,
    metadata: DeploymentMetadata,
    slug_edited: bool,
    credential: Option<String>,
    view: WizardViewState,
    view_state: Arc<dyn ViewStatePersistence>,
    orchestrator: DeploymentOrchestrator,
    preview: PreviewRenderer,
    deployed: Option<DeployReceipt>,
    notifications: Vec<Notification>,
}

impl std::fmt::Debug for WizardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardSession")
            .field("template", &self.template.slug)
            .field("metadata", &self.metadata)
            .field("step", &self.view.active_step)
            .finish_non_exhaustive()
    }
}

impl WizardSession {
    /// Open the wizard, restoring the last step and pending upload session
    /// for this template when they were saved.
    pub async fn start(
        template: Template,
        view_state: Arc<dyn ViewStatePersistence>,
        orchestrator: DeploymentOrchestrator,
    ) -> Self {
        let view = match view_state.load(&template.slug).await {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!(template = %template.slug, error = %e, "wizard view state unavailable");
                WizardViewState::default()
            }
        };
        Self {
            store: ConfigStore::new(template.defaults()),
            template,
            metadata: DeploymentMetadata::default(),
            slug_edited: false,
            credential: None,
            view,
            view_state,
            orchestrator,
            preview: PreviewRenderer::default(),
            deployed: None,
            notifications: Vec::new(),
        }
    }

    #[must_use]
    pub const fn template(&self) -> &Template {
        &self.template
    }

    #[must_use]
    pub const fn tree(&self) -> &ConfigTree {
        self.store.tree()
    }

    #[must_use]
    pub const fn metadata(&self) -> &DeploymentMetadata {
        &self.metadata
    }

    #[must_use]
    pub const fn step(&self) -> WizardStep {
        self.view.active_step
    }

    #[must_use]
    pub fn upload_session(&self) -> Option<&str> {
        self.view.pending_upload_session.as_deref()
    }

    #[must_use]
    pub const fn receipt(&self) -> Option<&DeployReceipt> {
        self.deployed.as_ref()
    }

    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        self.deployed.is_some()
    }

    /// Set the app name. Until the slug is edited by hand it follows the name.
    pub fn set_name(&mut self, name: &str) {
        self.metadata.name = name.to_owned();
        if !self.slug_edited {
            self.metadata.slug = slugify(name);
        }
    }

    pub fn set_slug(&mut self, slug: &str) {
        self.metadata.slug = slug.trim().to_owned();
        self.slug_edited = true;
    }

    /// Fetch the user's credentials. A fallback is reported to the user;
    /// no key is chosen on their behalf.
    pub async fn load_credentials(&mut self, selector: &dyn CredentialSelector) -> CredentialFetch {
        let fetch = selector.list_credentials().await;
        if let CredentialFetch::Fallback { reason } = &fetch {
            warn!(%reason, "credential list unavailable");
            self.notifications.push(Notification::screen(
                NotificationLevel::Error,
                format!("Could not load your API keys ({reason}); enter one manually"),
            ));
        }
        fetch
    }

    /// Select the API key and inject it into the tree.
    pub fn select_credential(&mut self, key: &str) {
        let key = key.trim().to_owned();
        self.store.inject(CREDENTIAL_KEY, FieldValue::text(key.clone()));
        self.credential = Some(key);
    }

    /// Route one form edit. Every section is open in the wizard.
    ///
    /// # Errors
    ///
    /// See [`form::route_change`].
    pub fn on_change(&mut self, raw_path: &str, value: FieldValue) -> Result<bool, ChangeRejected> {
        form::route_change(&self.template, FormMode::Wizard, &mut self.store, raw_path, value)
    }

    /// Move to `step` and remember it.
    pub async fn go_to(&mut self, step: WizardStep) {
        self.view.active_step = step;
        self.persist_view().await;
    }

    /// Advance one step. Returns `false` on the last step.
    pub async fn next_step(&mut self) -> bool {
        match self.view.active_step.next() {
            Some(step) => {
                self.go_to(step).await;
                true
            }
            None => false,
        }
    }

    /// Go back one step. Returns `false` on the first step.
    pub async fn prev_step(&mut self) -> bool {
        match self.view.active_step.prev() {
            Some(step) => {
                self.go_to(step).await;
                true
            }
            None => false,
        }
    }

    /// Remember the temporary upload session artifacts were uploaded into.
    pub async fn set_upload_session(&mut self, session_id: &str) {
        self.view.pending_upload_session = Some(session_id.to_owned());
        self.persist_view().await;
    }

    async fn persist_view(&self) {
        if let Err(e) = self.view_state.save(&self.template.slug, &self.view).await {
            warn!(template = %self.template.slug, error = %e, "could not save wizard view state");
        }
    }

    /// The wizard screen.
    #[must_use]
    pub fn view(&self) -> WizardView {
        let errors = self
            .orchestrator
            .validator()
            .validate(&self.template.config_schema, self.store.tree().root());
        let credential = self.orchestrator.format().validate(self.credential.as_deref());
        let form = form::render(&FormInput {
            template: &self.template,
            tree: self.store.tree(),
            mode: FormMode::Wizard,
            errors: &errors,
            credential: credential.as_ref().map(|_| ()),
        });
        let metadata_errors = self.metadata.validate();
        WizardView {
            step: self.view.active_step,
            metadata: self.metadata.clone(),
            credential: self
                .store
                .tree()
                .section(CREDENTIAL_KEY)
                .and_then(FieldValue::as_str)
                .map(mask),
            deploy_enabled: form.deploy_enabled && metadata_errors.is_empty() && !self.is_deployed(),
            metadata_errors,
            form,
        }
    }

    /// The resolved document for the current tree.
    pub fn preview(&mut self) -> Arc<str> {
        self.preview
            .update(Some(&self.template.template_code), Some(self.store.tree()))
    }

    pub fn preview_renderer(&mut self) -> &mut PreviewRenderer {
        &mut self.preview
    }

    /// Deploy the template. On success the saved view state is cleared; on
    /// failure everything entered is kept for another attempt.
    ///
    /// # Errors
    ///
    /// [`DeployError::AlreadyDeployed`] after a successful deploy, otherwise
    /// whatever [`DeploymentOrchestrator::deploy`] reports.
    pub async fn deploy(&mut self) -> Result<DeployReceipt, DeployError> {
        if let Some(receipt) = &self.deployed {
            return Err(DeployError::AlreadyDeployed {
                slug: receipt.app.slug.clone(),
            });
        }

        let result = self
            .orchestrator
            .deploy(DeployRequest {
                template: &self.template,
                tree: self.store.tree(),
                metadata: &self.metadata,
                credential: self.credential.as_deref(),
                upload_session: self.view.pending_upload_session.as_deref(),
            })
            .await;

        match result {
            Ok(receipt) => {
                self.store.mark_persisted(&receipt.configuration);
                if let Err(e) = self.view_state.clear(&self.template.slug).await {
                    warn!(template = %self.template.slug, error = %e, "could not clear wizard view state");
                }
                self.view = WizardViewState::default();
                self.notifications.push(Notification::screen(
                    NotificationLevel::Success,
                    format!("Deployed at {}", receipt.app.public_url),
                ));
                if let Some(warning) = &receipt.attach_warning {
                    self.notifications.push(Notification::screen(
                        NotificationLevel::Error,
                        format!("Uploaded files could not be attached: {warning}"),
                    ));
                }
                self.deployed = Some(receipt.clone());
                Ok(receipt)
            }
            Err(e) => {
                self.notifications
                    .push(Notification::screen(NotificationLevel::Error, e.to_string()));
                Err(e)
            }
        }
    }

    /// Take all queued notifications.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}
