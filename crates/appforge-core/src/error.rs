//! Error types for `appforge-core`.
//!
//! Pure computations (placeholder resolution, store updates) have no error
//! type on purpose: bad input degrades to an empty substitution or an
//! unchanged tree. Everything here belongs to an operation that talks to a
//! collaborator or guards a user action.

use appforge_storage::StorageError;

use crate::section::SectionState;
use crate::validator::FieldError;

/// A configuration path that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed configuration path '{0}'")]
pub struct MalformedPath(pub String);

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The template, app, or pending upload session does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// Duplicate slug, or a stale version on an optimistic update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend refused our credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was malformed from the backend's point of view.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Any other non-success response. The message is the backend's own.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The backend could not be reached.
    #[error("persistence transport error: {0}")]
    Transport(String),

    /// The storage backend failed underneath the repository.
    #[error("persistence storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored document could not be encoded or decoded.
    #[error("persistence serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Shorthand for [`PersistenceError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether this is a not-found answer.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors from the credential format check.
///
/// Messages never echo the candidate credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// No credential was selected.
    #[error("an API key is required")]
    Missing,

    /// The selected value does not look like an API key.
    #[error("API key does not match the expected format ({expected})")]
    Malformed { expected: String },

    /// The configured format pattern is not a valid regular expression.
    #[error("invalid credential pattern: {reason}")]
    InvalidPattern { reason: String },
}

/// An illegal section state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} section '{section}' while it is {from:?}")]
pub struct TransitionError {
    pub section: String,
    pub from: SectionState,
    pub action: &'static str,
}

/// Why a form change was not written to the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangeRejected {
    /// The target path does not parse.
    #[error("malformed field path '{path}'")]
    Malformed { path: String },

    /// Section mode: the owning section is not being edited.
    #[error("section '{section}' is locked; press edit first")]
    SectionLocked { section: String },

    /// The field is disabled by a UI hint.
    #[error("field '{path}' is read-only")]
    Disabled { path: String },

    /// The reserved credential key is only written by the credential selector.
    #[error("'{key}' is set through the credential selector")]
    Reserved { key: String },
}

/// Errors from committing one section of a deployed app.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The section key is not part of the template schema.
    #[error("unknown section '{section}'")]
    UnknownSection { section: String },

    /// The section is not in a state that allows the action.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The section's values fail validation; nothing was sent.
    #[error("section '{section}' has validation errors: {}", summarize(.errors))]
    Validation {
        section: String,
        errors: Vec<FieldError>,
    },

    /// The configured credential is missing or malformed; nothing was sent.
    #[error(transparent)]
    CredentialInvalid(#[from] CredentialError),

    /// The persistence collaborator rejected the save.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors from the first deployment of a template.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Name, slug, or configuration values are invalid; nothing was sent.
    #[error("deployment is not valid: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    /// The credential is missing or malformed; nothing was sent.
    #[error(transparent)]
    CredentialInvalid(#[from] CredentialError),

    /// This wizard already produced a deployed app.
    #[error("template was already deployed as '{slug}'")]
    AlreadyDeployed { slug: String },

    /// The persistence collaborator refused the deployment. Displays the
    /// backend's raw message.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors from deleting a deployed app.
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    /// The typed confirmation did not match the app slug.
    #[error("confirmation does not match '{slug}'; nothing was deleted")]
    ConfirmationMismatch { slug: String },

    /// The persistence collaborator failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
