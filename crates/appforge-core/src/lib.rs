//! Core library for appforge.
//!
//! Turns a template (HTML/JS source with `{{path}}` placeholders plus a
//! JSON-Schema configuration form) and a configuration value tree into a
//! deployable mini-application. The crate contains the placeholder
//! resolver, the configuration store, the per-section edit state machine,
//! the schema-to-form mapping, the sandboxed preview renderer and the
//! deployment orchestrator. Persistence is reached through the
//! [`persistence::Persistence`] trait; [`repository::Repository`] implements
//! it on top of any `appforge-storage` backend.

pub mod credential;
pub mod deploy;
pub mod error;
pub mod form;
pub mod path;
pub mod persistence;
pub mod preview;
pub mod repository;
pub mod resolver;
pub mod schema;
pub mod section;
pub mod session;
pub mod store;
pub mod validator;
pub mod value;
pub mod view_state;

pub use path::ConfigPath;
pub use resolver::resolve;
pub use value::{ConfigTree, FieldValue};
pub use session::{EditSession, WizardSession};
