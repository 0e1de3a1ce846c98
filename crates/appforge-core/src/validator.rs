//! Field-level validation of a configuration tree against its schema.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::path::{ConfigPath, Segment};
use crate::value::FieldValue;

/// One validation problem. `path` is a dotted path into the tree; the empty
/// path means the problem concerns the whole screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The owning top-level section, if the error is not screen-scoped.
    #[must_use]
    pub fn section(&self) -> Option<&str> {
        let end = self.path.find(['.', '[']).unwrap_or(self.path.len());
        Some(&self.path[..end]).filter(|s| !s.is_empty())
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Validates configuration values against a template schema.
pub trait Validator: Send + Sync {
    /// Every problem found. Empty means valid.
    fn validate(&self, schema: &Value, values: &FieldValue) -> Vec<FieldError>;
}

/// [`Validator`] backed by the `jsonschema` crate.
///
/// The compiled schema is cached and reused while the same schema is passed
/// in, which is the common case of one form validating on every change.
#[derive(Default)]
pub struct JsonSchemaValidator {
    compiled: Mutex<Option<(Value, Arc<jsonschema::Validator>)>>,
}

impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl JsonSchemaValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, schema: &Value) -> Result<Arc<jsonschema::Validator>, String> {
        let mut cache = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, validator)) = cache.as_ref().filter(|(cached, _)| cached == schema) {
            return Ok(Arc::clone(validator));
        }
        let validator = Arc::new(jsonschema::validator_for(schema).map_err(|e| e.to_string())?);
        *cache = Some((schema.clone(), Arc::clone(&validator)));
        Ok(validator)
    }

    /// Check that `schema` compiles. A null schema is accepted.
    ///
    /// # Errors
    ///
    /// Returns the compiler's message for an invalid schema.
    pub fn check_schema(&self, schema: &Value) -> Result<(), String> {
        if schema.is_null() {
            return Ok(());
        }
        self.compile(schema).map(|_| ())
    }
}

impl Validator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, values: &FieldValue) -> Vec<FieldError> {
        if schema.is_null() {
            return Vec::new();
        }
        let validator = match self.compile(schema) {
            Ok(v) => v,
            Err(reason) => {
                warn!(%reason, "template schema does not compile");
                return vec![FieldError::new("", format!("template schema is invalid: {reason}"))];
            }
        };

        let instance = Value::from(values);
        validator
            .iter_errors(&instance)
            .map(|error| {
                let pointer = error.instance_path.to_string();
                FieldError::new(dotted(&pointer, values), error.to_string())
            })
            .collect()
    }
}

/// `/documents/0/title` → `documents[0].title`. Numeric tokens are indices
/// only where the tree holds a list at that point.
fn dotted(pointer: &str, values: &FieldValue) -> String {
    let mut path = ConfigPath::root();
    let mut node = Some(values);
    for token in pointer.split('/').skip(1) {
        let token = token.replace("~1", "/").replace("~0", "~");
        let segment = match (node, token.parse::<usize>()) {
            (Some(FieldValue::List(_)), Ok(index)) => Segment::Index(index),
            _ => Segment::Key(token),
        };
        node = node.and_then(|n| match &segment {
            Segment::Key(k) => n.get(k),
            Segment::Index(i) => n.as_list().and_then(|items| items.get(*i)),
        });
        path.push(segment);
    }
    path.to_string()
}
