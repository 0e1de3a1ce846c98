//! Parsing of `--set path=value` assignments, values files and uploads.

use std::path::Path;

use anyhow::{Context, Result, bail};
use appforge_core::persistence::ArtifactUpload;
use appforge_core::{ConfigPath, FieldValue};

/// Parse `path=value`. The value is read as JSON when it parses and as a
/// plain string otherwise, so `count=3` sets a number and `title=Hi` a string.
pub fn parse_assignment(raw: &str) -> Result<(String, FieldValue)> {
    let Some((path, value)) = raw.split_once('=') else {
        bail!("invalid assignment '{raw}': expected path=value");
    };
    let path = path.trim();
    if ConfigPath::parse(path).is_none_or(|p| p.is_root()) {
        bail!("invalid assignment '{raw}': '{path}' is not a configuration path");
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map_or_else(|_| FieldValue::text(value), FieldValue::from);
    Ok((path.to_owned(), value))
}

/// Every `--set` assignment, in order.
pub fn parse_assignments(raw: &[String]) -> Result<Vec<(String, FieldValue)>> {
    raw.iter().map(|r| parse_assignment(r)).collect()
}

/// Read a JSON values file and flatten it into leaf assignments.
pub fn load_values(path: &Path) -> Result<Vec<(String, FieldValue)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read values file {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    if !json.is_object() {
        bail!("{} must contain a JSON object", path.display());
    }
    let values = FieldValue::from(json);
    Ok(values
        .leaves()
        .into_iter()
        .filter(|(p, _)| !p.is_root())
        .map(|(p, v)| (p.to_string(), v.clone()))
        .collect())
}

/// Read a file to upload as an artifact.
pub fn read_upload(path: &Path) -> Result<ArtifactUpload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} (only text files can be uploaded)", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ArtifactUpload {
        content_type: content_type(&file_name).to_owned(),
        file_name,
        content,
    })
}

fn content_type(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("json") => "application/json",
        Some("md" | "markdown") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("csv") => "text/csv",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        _ => "text/plain",
    }
}
