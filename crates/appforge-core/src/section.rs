//! Per-section edit state machine for a deployed app.
//!
//! ```text
//!            begin_edit            begin_commit
//!   Locked ─────────────▶ Editing ─────────────▶ Committing
//!     ▲   ◀─────────────    ▲                       │  │
//!     │       cancel        └─────commit_failed─────┘  │
//!     └──────────────────────commit_succeeded──────────┘
//! ```
//!
//! Sections are independent: any number may be `Editing` or `Committing`
//! at once. The controller only tracks states; the store and the
//! persistence collaborator are driven by [`crate::session::EditSession`].

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::TransitionError;

/// Lifecycle state of one section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionState {
    #[default]
    Locked,
    Editing,
    Committing,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    state: SectionState,
    error: Option<String>,
}

/// Tracks which sections are unlocked. Sections never mentioned are `Locked`.
#[derive(Debug, Clone, Default)]
pub struct SectionEditController {
    sections: BTreeMap<String, Entry>,
}

impl SectionEditController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, section: &str) -> SectionState {
        self.sections
            .get(section)
            .map_or(SectionState::Locked, |entry| entry.state)
    }

    /// Sections currently open, including those with a save in flight.
    pub fn editing_sections(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .filter(|(_, entry)| entry.state != SectionState::Locked)
            .map(|(key, _)| key.as_str())
    }

    /// Whether form input may be written into this section right now.
    #[must_use]
    pub fn is_editable(&self, section: &str) -> bool {
        self.state(section) == SectionState::Editing
    }

    /// Last commit error of the section, kept until the next transition out
    /// of `Editing`.
    #[must_use]
    pub fn section_error(&self, section: &str) -> Option<&str> {
        self.sections.get(section)?.error.as_deref()
    }

    /// `Locked → Editing`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the section is not `Locked`.
    pub fn begin_edit(&mut self, section: &str) -> Result<(), TransitionError> {
        self.transition(section, "edit", SectionState::Locked, SectionState::Editing)?;
        debug!(section, "section unlocked");
        Ok(())
    }

    /// `Editing → Committing`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the section is not `Editing`.
    pub fn begin_commit(&mut self, section: &str) -> Result<(), TransitionError> {
        self.transition(section, "save", SectionState::Editing, SectionState::Committing)?;
        if let Some(entry) = self.sections.get_mut(section) {
            entry.error = None;
        }
        Ok(())
    }

    /// `Committing → Locked`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if no save is in flight for the section.
    pub fn commit_succeeded(&mut self, section: &str) -> Result<(), TransitionError> {
        self.transition(section, "finish saving", SectionState::Committing, SectionState::Locked)?;
        self.sections.remove(section);
        Ok(())
    }

    /// `Committing → Editing`, remembering `error` for display.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if no save is in flight for the section.
    pub fn commit_failed(
        &mut self,
        section: &str,
        error: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(section, "fail saving", SectionState::Committing, SectionState::Editing)?;
        if let Some(entry) = self.sections.get_mut(section) {
            entry.error = Some(error.into());
        }
        Ok(())
    }

    /// `Editing → Locked`. In-flight saves cannot be cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the section is not `Editing`.
    pub fn cancel(&mut self, section: &str) -> Result<(), TransitionError> {
        self.transition(section, "cancel", SectionState::Editing, SectionState::Locked)?;
        self.sections.remove(section);
        debug!(section, "section edit cancelled");
        Ok(())
    }

    fn transition(
        &mut self,
        section: &str,
        action: &'static str,
        from: SectionState,
        to: SectionState,
    ) -> Result<(), TransitionError> {
        let current = self.state(section);
        if current != from {
            return Err(TransitionError {
                section: section.to_owned(),
                from: current,
                action,
            });
        }
        self.sections.entry(section.to_owned()).or_default().state = to;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sections_start_locked() {
        let controller = SectionEditController::new();
        assert_eq!(controller.state("styling"), SectionState::Locked);
        assert!(!controller.is_editable("styling"));
        assert_eq!(controller.editing_sections().count(), 0);
    }

    #[test]
    fn successful_save_relocks() {
        let mut c = SectionEditController::new();
        c.begin_edit("styling").unwrap();
        assert!(c.is_editable("styling"));
        c.begin_commit("styling").unwrap();
        assert_eq!(c.state("styling"), SectionState::Committing);
        assert!(!c.is_editable("styling"));
        assert_eq!(c.editing_sections().collect::<Vec<_>>(), vec!["styling"]);
        c.commit_succeeded("styling").unwrap();
        assert_eq!(c.state("styling"), SectionState::Locked);
        assert_eq!(c.editing_sections().count(), 0);
    }

    #[test]
    fn failed_save_returns_to_editing_with_error() {
        let mut c = SectionEditController::new();
        c.begin_edit("general").unwrap();
        c.begin_commit("general").unwrap();
        c.commit_failed("general", "backend unavailable").unwrap();
        assert_eq!(c.state("general"), SectionState::Editing);
        assert_eq!(c.section_error("general"), Some("backend unavailable"));

        c.begin_commit("general").unwrap();
        assert_eq!(c.section_error("general"), None);
    }

    #[test]
    fn cancel_only_from_editing() {
        let mut c = SectionEditController::new();
        let err = c.cancel("general").unwrap_err();
        assert_eq!(err.from, SectionState::Locked);

        c.begin_edit("general").unwrap();
        c.begin_commit("general").unwrap();
        assert!(c.cancel("general").is_err());
        c.commit_failed("general", "boom").unwrap();
        c.cancel("general").unwrap();
        assert_eq!(c.state("general"), SectionState::Locked);
        assert_eq!(c.section_error("general"), None);
    }

    #[test]
    fn several_sections_open_independently() {
        let mut c = SectionEditController::new();
        c.begin_edit("styling").unwrap();
        c.begin_edit("documents").unwrap();
        c.begin_commit("styling").unwrap();
        assert!(c.is_editable("documents"));
        assert!(c.begin_edit("documents").is_err());
        let open: Vec<&str> = c.editing_sections().collect();
        assert_eq!(open, vec!["documents", "styling"]);
    }

    #[test]
    fn transition_error_names_the_action() {
        let mut c = SectionEditController::new();
        let err = c.commit_succeeded("general").unwrap_err();
        assert_eq!(err.to_string(), "cannot finish saving section 'general' while it is Locked");
    }
}
