//! API-key credentials injected into the configuration at deploy and save
//! time.
//!
//! The credential is written under the reserved top-level key
//! [`CREDENTIAL_KEY`]. A missing or malformed credential blocks submission;
//! nothing in this crate ever substitutes a stand-in key.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CredentialError;
use crate::value::FieldValue;

/// Reserved configuration key holding the selected API key.
pub const CREDENTIAL_KEY: &str = "api_key";

/// Default accepted shape: an `sk-` or `ak-` prefix and at least 16 more
/// characters.
pub const DEFAULT_CREDENTIAL_PATTERN: &str = r"^(sk|ak)-[A-Za-z0-9_-]{16,}$";

#[allow(clippy::expect_used)]
static DEFAULT_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_CREDENTIAL_PATTERN).expect("default credential pattern is valid"));

/// The recognisable format an API key must have.
#[derive(Debug, Clone)]
pub struct CredentialFormat {
    pattern: Regex,
}

impl Default for CredentialFormat {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_FORMAT.clone(),
        }
    }
}

impl CredentialFormat {
    /// A format from a custom regular expression.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::InvalidPattern`] if `pattern` does not compile.
    pub fn new(pattern: &str) -> Result<Self, CredentialError> {
        Regex::new(pattern)
            .map(|pattern| Self { pattern })
            .map_err(|e| CredentialError::InvalidPattern {
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Check a candidate key.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Missing`] for `None` or blank input,
    /// [`CredentialError::Malformed`] when the pattern does not match.
    pub fn validate(&self, candidate: Option<&str>) -> Result<(), CredentialError> {
        let candidate = candidate.map(str::trim).unwrap_or_default();
        if candidate.is_empty() {
            return Err(CredentialError::Missing);
        }
        if self.pattern.is_match(candidate) {
            Ok(())
        } else {
            Err(CredentialError::Malformed {
                expected: self.pattern().to_owned(),
            })
        }
    }

    /// Check the credential stored in a configuration tree.
    ///
    /// # Errors
    ///
    /// As [`CredentialFormat::validate`]; a non-text value counts as missing.
    pub fn validate_value(&self, value: Option<&FieldValue>) -> Result<(), CredentialError> {
        self.validate(value.and_then(FieldValue::as_str))
    }
}

/// A selectable API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    #[serde(default, alias = "name")]
    pub label: String,
    #[serde(alias = "api_key")]
    pub key: String,
}

impl Credential {
    #[must_use]
    pub fn masked(&self) -> String {
        mask(&self.key)
    }
}

/// The key with everything but its prefix and last four characters hidden.
#[must_use]
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("key", &self.masked())
            .finish()
    }
}

/// Outcome of fetching the available credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialFetch {
    /// The list came from the credential service.
    Live(Vec<Credential>),
    /// Every source failed. The user has to enter a key by hand; no
    /// credential is made up in its place.
    Fallback { reason: String },
}

impl CredentialFetch {
    /// Available credentials; empty on fallback.
    #[must_use]
    pub fn credentials(&self) -> &[Credential] {
        match self {
            Self::Live(list) => list,
            Self::Fallback { .. } => &[],
        }
    }

    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Supplies the user's credentials and the format they must have.
#[async_trait]
pub trait CredentialSelector: Send + Sync {
    /// Fetch the credentials the user may pick from.
    async fn list_credentials(&self) -> CredentialFetch;

    /// The accepted key format.
    fn format(&self) -> &CredentialFormat;

    /// Check a chosen key against [`CredentialSelector::format`].
    ///
    /// # Errors
    ///
    /// See [`CredentialFormat::validate`].
    fn validate_format(&self, key: Option<&str>) -> Result<(), CredentialError> {
        self.format().validate(key)
    }
}

/// A fixed credential list, for hosts that already know the user's keys.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Vec<Credential>,
    format: CredentialFormat,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Vec<Credential>, format: CredentialFormat) -> Self {
        Self {
            credentials,
            format,
        }
    }
}

#[async_trait]
impl CredentialSelector for StaticCredentials {
    async fn list_credentials(&self) -> CredentialFetch {
        CredentialFetch::Live(self.credentials.clone())
    }

    fn format(&self) -> &CredentialFormat {
        &self.format
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GOOD: &str = "sk-0123456789abcdefXYZ";

    #[test]
    fn default_format_accepts_prefixed_keys() {
        let format = CredentialFormat::default();
        assert!(format.validate(Some(GOOD)).is_ok());
        assert!(format.validate(Some("ak-ABCDEFGHIJKLMNOP_-")).is_ok());
    }

    #[test]
    fn blank_and_missing_are_missing() {
        let format = CredentialFormat::default();
        assert_eq!(format.validate(None), Err(CredentialError::Missing));
        assert_eq!(format.validate(Some("   ")), Err(CredentialError::Missing));
        assert_eq!(format.validate_value(Some(&FieldValue::from(42))), Err(CredentialError::Missing));
    }

    #[test]
    fn wrong_prefix_or_short_key_is_malformed() {
        let format = CredentialFormat::default();
        for bad in ["pk-0123456789abcdefXYZ", "sk-short", "test-key", "sk-0123456789abcdef XYZ"] {
            assert!(
                matches!(format.validate(Some(bad)), Err(CredentialError::Malformed { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn custom_patterns_compile_or_report() {
        let format = CredentialFormat::new("^key_[0-9]+$").unwrap();
        assert!(format.validate(Some("key_42")).is_ok());
        assert!(matches!(
            CredentialFormat::new("(unclosed"),
            Err(CredentialError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn debug_output_masks_the_key() {
        let credential = Credential {
            id: "c1".into(),
            label: "Production".into(),
            key: GOOD.into(),
        };
        let debug = format!("{credential:?}");
        assert!(!debug.contains(GOOD));
        assert!(debug.contains("sk-…fXYZ"));
    }

    #[test]
    fn fallback_has_no_credentials() {
        let fetch = CredentialFetch::Fallback {
            reason: "credential service unreachable".into(),
        };
        assert!(fetch.is_fallback());
        assert!(fetch.credentials().is_empty());
    }

    #[tokio::test]
    async fn static_selector_lists_and_validates() {
        let selector = StaticCredentials::new(
            vec![Credential {
                id: "c1".into(),
                label: "Main".into(),
                key: GOOD.into(),
            }],
            CredentialFormat::default(),
        );
        let fetch = selector.list_credentials().await;
        assert_eq!(fetch.credentials().len(), 1);
        assert!(selector.validate_format(Some(GOOD)).is_ok());
        assert!(selector.validate_format(Some("nope")).is_err());
    }
}
