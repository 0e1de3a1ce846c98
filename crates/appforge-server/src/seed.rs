//! Startup template seeding from a directory of JSON files.

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use appforge_core::persistence::Persistence;
use appforge_core::schema::Template;

/// Store every `*.json` template found directly in `dir`. Files that do not
/// parse are skipped with a warning. Returns the number stored.
///
/// # Errors
///
/// Fails when the directory cannot be read or the repository rejects a write.
pub async fn seed_templates(persistence: &dyn Persistence, dir: &Path) -> anyhow::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read templates directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut stored = 0;
    for path in paths {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut template: Template = match serde_json::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unparsable template");
                continue;
            }
        };
        if template.id.is_empty() {
            template.id.clone_from(&template.slug);
        }
        let slug = template.slug.clone();
        persistence
            .put_template(template)
            .await
            .with_context(|| format!("failed to store template '{slug}'"))?;
        info!(slug = %slug, "template seeded");
        stored += 1;
    }
    Ok(stored)
}
