//! Wizard view state kept between visits, keyed by template slug.
//!
//! Purely an optimisation: losing it only means the wizard starts at the
//! first step without a pending upload session.

use std::collections::HashMap;
use std::sync::Arc;

use appforge_storage::StorageBackend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PersistenceError;

/// Steps of the first-deployment wizard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    /// Name, slug and credential.
    #[default]
    Details,
    /// The configuration sections.
    Configure,
    /// Preview and deploy.
    Review,
}

impl WizardStep {
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Details => Some(Self::Configure),
            Self::Configure => Some(Self::Review),
            Self::Review => None,
        }
    }

    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self {
            Self::Details => None,
            Self::Configure => Some(Self::Details),
            Self::Review => Some(Self::Configure),
        }
    }
}

/// What the wizard restores when it is opened again for a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardViewState {
    #[serde(default)]
    pub active_step: WizardStep,
    /// Upload session holding artifacts uploaded before the app existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_upload_session: Option<String>,
}

/// Loads and stores [`WizardViewState`] per template slug.
#[async_trait]
pub trait ViewStatePersistence: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the state cannot be read.
    async fn load(&self, template_slug: &str) -> Result<Option<WizardViewState>, PersistenceError>;

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the state cannot be written.
    async fn save(&self, template_slug: &str, state: &WizardViewState) -> Result<(), PersistenceError>;

    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the state cannot be removed.
    async fn clear(&self, template_slug: &str) -> Result<(), PersistenceError>;
}

/// Process-local view state.
#[derive(Debug, Clone, Default)]
pub struct MemoryViewState {
    states: Arc<RwLock<HashMap<String, WizardViewState>>>,
}

impl MemoryViewState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViewStatePersistence for MemoryViewState {
    async fn load(&self, template_slug: &str) -> Result<Option<WizardViewState>, PersistenceError> {
        Ok(self.states.read().await.get(template_slug).cloned())
    }

    async fn save(&self, template_slug: &str, state: &WizardViewState) -> Result<(), PersistenceError> {
        self.states
            .write()
            .await
            .insert(template_slug.to_owned(), state.clone());
        Ok(())
    }

    async fn clear(&self, template_slug: &str) -> Result<(), PersistenceError> {
        self.states.write().await.remove(template_slug);
        Ok(())
    }
}

/// View state stored as JSON documents under `view/{slug}` in any backend.
#[derive(Clone)]
pub struct StoredViewState {
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for StoredViewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredViewState").finish_non_exhaustive()
    }
}

impl StoredViewState {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn key(template_slug: &str) -> String {
        format!("view/{template_slug}")
    }
}

#[async_trait]
impl ViewStatePersistence for StoredViewState {
    async fn load(&self, template_slug: &str) -> Result<Option<WizardViewState>, PersistenceError> {
        match self.backend.get(&Self::key(template_slug)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, template_slug: &str, state: &WizardViewState) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(state)?;
        self.backend.put(&Self::key(template_slug), &bytes).await?;
        Ok(())
    }

    async fn clear(&self, template_slug: &str) -> Result<(), PersistenceError> {
        self.backend.delete(&Self::key(template_slug)).await?;
        Ok(())
    }
}
