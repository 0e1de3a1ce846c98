//! The configuration store.
//!
//! Holds the live [`ConfigTree`] of one screen. Every update goes through
//! [`set_path`], which never mutates a snapshot in place: it returns either
//! the same snapshot (nothing changed, or the write was not possible) or a
//! new one with a fresh revision.

use tracing::debug;

use crate::error::MalformedPath;
use crate::path::{ConfigPath, Segment};
use crate::value::{ConfigTree, FieldValue};

/// Largest list index [`set_path`] will pad up to.
pub const MAX_LIST_INDEX: usize = 4096;

/// Deep-clone `defaults`, then overlay `overrides` leaf by leaf.
///
/// An override wins wherever it has a value, including `null`. Lists are
/// leaves and are replaced whole. Keys only present in `defaults` keep the
/// default. A `null` root override counts as no override at all.
#[must_use]
pub fn initialize(defaults: &FieldValue, overrides: Option<&FieldValue>) -> ConfigTree {
    let mut root = defaults.clone();
    if let Some(overrides) = overrides.filter(|o| !o.is_null()) {
        deep_merge(&mut root, overrides);
    }
    ConfigTree::new(root)
}

/// Merge `overlay` into `base` in place.
pub fn deep_merge(base: &mut FieldValue, overlay: &FieldValue) {
    match (base, overlay) {
        (FieldValue::Object(base_map), FieldValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Write `value` at `path`, returning the resulting snapshot.
///
/// Intermediate objects and lists are created as needed; lists are padded
/// with `null`. Siblings of every node on the path are preserved. The input
/// snapshot is returned unchanged when the value is already there, when the
/// path is the root, or when the path runs into the wrong kind of container
/// (a key into a list, an index into an object, or an index past
/// [`MAX_LIST_INDEX`]).
#[must_use]
pub fn set_path(tree: &ConfigTree, path: &ConfigPath, value: FieldValue) -> ConfigTree {
    if path.is_root() {
        debug!("ignoring write to the configuration root");
        return tree.clone();
    }
    if tree.get(path) == Some(&value) {
        return tree.clone();
    }

    let mut root = tree.to_value();
    if write(&mut root, path.segments(), value) {
        ConfigTree::new(root)
    } else {
        debug!(%path, "path conflicts with the shape of the configuration, write ignored");
        tree.clone()
    }
}

fn write(node: &mut FieldValue, segments: &[Segment], value: FieldValue) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return true;
    };

    match first {
        Segment::Key(key) => {
            match node {
                FieldValue::List(_) => return false,
                FieldValue::Object(_) => {}
                FieldValue::Null | FieldValue::Scalar(_) => *node = FieldValue::object(),
            }
            let FieldValue::Object(map) = node else {
                return false;
            };
            write(map.entry(key.clone()).or_default(), rest, value)
        }
        Segment::Index(index) => {
            if *index > MAX_LIST_INDEX {
                return false;
            }
            match node {
                FieldValue::Object(_) => return false,
                FieldValue::List(_) => {}
                FieldValue::Null | FieldValue::Scalar(_) => *node = FieldValue::List(Vec::new()),
            }
            let FieldValue::List(items) = node else {
                return false;
            };
            if items.len() <= *index {
                items.resize(index + 1, FieldValue::Null);
            }
            items
                .get_mut(*index)
                .is_some_and(|slot| write(slot, rest, value))
        }
    }
}

/// The live configuration of one screen plus the last persisted baseline.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    defaults: FieldValue,
    current: ConfigTree,
    persisted: ConfigTree,
}

impl ConfigStore {
    /// A store seeded from defaults only (first deployment).
    #[must_use]
    pub fn new(defaults: FieldValue) -> Self {
        let current = initialize(&defaults, None);
        Self {
            defaults,
            persisted: current.clone(),
            current,
        }
    }

    /// A store for an already deployed configuration. Absent keys are
    /// filled from `defaults`; everything stored wins.
    #[must_use]
    pub fn from_persisted(defaults: FieldValue, persisted: &FieldValue) -> Self {
        let current = initialize(&defaults, Some(persisted));
        Self {
            defaults,
            persisted: current.clone(),
            current,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub const fn tree(&self) -> &ConfigTree {
        &self.current
    }

    #[must_use]
    pub const fn defaults(&self) -> &FieldValue {
        &self.defaults
    }

    /// The snapshot last confirmed by the persistence collaborator.
    #[must_use]
    pub const fn persisted(&self) -> &ConfigTree {
        &self.persisted
    }

    /// Set one value. Returns whether the tree changed.
    pub fn set(&mut self, path: &ConfigPath, value: FieldValue) -> bool {
        let next = set_path(&self.current, path, value);
        let changed = !ConfigTree::same(&next, &self.current);
        self.current = next;
        changed
    }

    /// [`ConfigStore::set`] with an unparsed path.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedPath`] if `raw` is not a valid path.
    pub fn set_raw(&mut self, raw: &str, value: FieldValue) -> Result<bool, MalformedPath> {
        let path = ConfigPath::parse(raw).ok_or_else(|| MalformedPath(raw.to_owned()))?;
        Ok(self.set(&path, value))
    }

    /// Write a system-computed top-level value such as the selected credential.
    pub fn inject(&mut self, key: &str, value: FieldValue) -> bool {
        self.set(&ConfigPath::key(key), value)
    }

    /// Replace the live tree with a stored configuration, filling only
    /// genuinely absent keys from the defaults.
    pub fn load(&mut self, persisted: &FieldValue) {
        self.current = initialize(&self.defaults, Some(persisted));
        self.persisted = self.current.clone();
    }

    /// Record `tree` as what the backend now holds.
    pub fn mark_persisted(&mut self, tree: &ConfigTree) {
        self.persisted = tree.clone();
    }

    /// Whether the section differs from the persisted baseline.
    #[must_use]
    pub fn is_dirty_section(&self, key: &str) -> bool {
        self.current.section(key) != self.persisted.section(key)
    }

    /// Discard unsaved edits to one section, leaving all others untouched.
    pub fn revert_section(&mut self, key: &str) {
        match self.persisted.section(key).cloned() {
            Some(saved) => {
                self.set(&ConfigPath::key(key), saved);
            }
            None if self.current.section(key).is_some() => {
                let mut root = self.current.to_value();
                if let FieldValue::Object(map) = &mut root {
                    map.remove(key);
                }
                self.current = ConfigTree::new(root);
            }
            None => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fv(v: serde_json::Value) -> FieldValue {
        FieldValue::from(v)
    }

    fn path(raw: &str) -> ConfigPath {
        ConfigPath::parse(raw).unwrap()
    }

    fn defaults() -> FieldValue {
        fv(json!({
            "general": {"title": "Assistant", "welcome": "Hi", "max_tokens": 512},
            "styling": {"colors": {"primary": "#000000", "accent": "#ffffff"}, "rounded": true},
            "documents": [{"title": "Default"}]
        }))
    }

    #[test]
    fn overrides_win_at_leaves_and_defaults_fill_the_rest() {
        let overrides = fv(json!({
            "general": {"title": "Support bot", "welcome": null},
            "styling": {"colors": {"primary": "#112233"}},
            "documents": [],
            "extra": {"flag": true}
        }));
        let merged = initialize(&defaults(), Some(&overrides));

        for (leaf, value) in overrides.leaves() {
            assert_eq!(merged.get(&leaf), Some(value), "override leaf {leaf}");
        }
        let untouched = ["general.max_tokens", "styling.colors.accent", "styling.rounded"];
        for raw in untouched {
            let p = path(raw);
            assert_eq!(merged.get(&p), defaults().lookup(&p), "default leaf {raw}");
        }
    }

    #[test]
    fn initialize_without_overrides_copies_defaults() {
        let tree = initialize(&defaults(), None);
        assert_eq!(tree.root(), &defaults());
    }

    #[test]
    fn null_stored_configuration_keeps_defaults() {
        let tree = initialize(&defaults(), Some(&FieldValue::Null));
        assert_eq!(tree.root(), &defaults());
    }

    #[test]
    fn empty_object_override_keeps_the_defaults_below_it() {
        let overrides = fv(json!({"styling": {}}));
        assert!(overrides.leaves().is_empty());
        let merged = initialize(&defaults(), Some(&overrides));
        assert_eq!(merged.root(), &defaults());
    }

    #[test]
    fn set_path_keeps_siblings() {
        let before = initialize(&defaults(), None);
        let after = set_path(&before, &path("styling.colors.primary"), FieldValue::text("#abcdef"));

        assert!(!ConfigTree::same(&before, &after));
        assert!(after.revision() > before.revision());
        assert_eq!(after.get(&path("styling.colors.accent")), before.get(&path("styling.colors.accent")));
        assert_eq!(after.section("general"), before.section("general"));
        assert_eq!(after.section("documents"), before.section("documents"));
        // The previous snapshot is untouched.
        assert_eq!(before.get(&path("styling.colors.primary")), Some(&FieldValue::text("#000000")));
    }

    #[test]
    fn unchanged_value_returns_same_snapshot() {
        let before = initialize(&defaults(), None);
        let after = set_path(&before, &path("general.title"), FieldValue::text("Assistant"));
        assert!(ConfigTree::same(&before, &after));
    }

    #[test]
    fn creates_intermediate_containers() {
        let before = ConfigTree::empty();
        let after = set_path(&before, &path("documents[2].title"), FieldValue::text("Third"));
        assert_eq!(
            serde_json::to_value(&after).unwrap(),
            json!({"documents": [null, null, {"title": "Third"}]})
        );
        let replaced = set_path(&after, &path("documents[0]"), FieldValue::text("first"));
        assert_eq!(
            serde_json::to_value(&replaced).unwrap(),
            json!({"documents": ["first", null, {"title": "Third"}]})
        );
    }

    #[test]
    fn conflicting_shapes_are_ignored() {
        let before = initialize(&defaults(), None);
        for raw in ["documents.title", "general[0]", "documents[100000]"] {
            let after = set_path(&before, &path(raw), FieldValue::text("x"));
            assert!(ConfigTree::same(&before, &after), "path {raw}");
        }
        let root = set_path(&before, &ConfigPath::root(), FieldValue::object());
        assert!(ConfigTree::same(&before, &root));
    }

    #[test]
    fn key_into_scalar_replaces_it_with_an_object() {
        let before = initialize(&defaults(), None);
        let after = set_path(&before, &path("general.title.text"), FieldValue::text("x"));
        assert_eq!(after.get(&path("general.title")), Some(&fv(json!({"text": "x"}))));
    }

    #[test]
    fn store_tracks_dirty_sections_and_reverts_one() {
        let mut store = ConfigStore::from_persisted(defaults(), &fv(json!({"general": {"title": "Bot"}})));
        assert!(store.set(&path("general.title"), FieldValue::text("Edited")));
        assert!(store.set(&path("styling.rounded"), FieldValue::from(false)));
        assert!(!store.set(&path("styling.rounded"), FieldValue::from(false)));
        assert!(store.is_dirty_section("general"));
        assert!(store.is_dirty_section("styling"));

        store.revert_section("general");
        assert!(!store.is_dirty_section("general"));
        assert_eq!(store.tree().get(&path("general.title")), Some(&FieldValue::text("Bot")));
        assert!(store.is_dirty_section("styling"));
    }

    #[test]
    fn revert_removes_section_absent_from_baseline() {
        let mut store = ConfigStore::new(defaults());
        store.inject("api_key", FieldValue::text("sk-abc"));
        store.revert_section("api_key");
        assert!(store.tree().section("api_key").is_none());
    }

    #[test]
    fn load_overwrites_live_edits() {
        let mut store = ConfigStore::new(defaults());
        store.set(&path("general.title"), FieldValue::text("Unsaved"));
        store.load(&fv(json!({"general": {"title": "Stored"}})));
        assert_eq!(store.tree().get(&path("general.title")), Some(&FieldValue::text("Stored")));
        assert_eq!(store.tree().get(&path("general.welcome")), Some(&FieldValue::text("Hi")));
        assert!(!store.is_dirty_section("general"));
    }

    #[test]
    fn set_raw_rejects_malformed_paths() {
        let mut store = ConfigStore::new(defaults());
        assert_eq!(
            store.set_raw("general..title", FieldValue::Null),
            Err(MalformedPath("general..title".into()))
        );
        assert_eq!(store.set_raw("general.title", FieldValue::text("New")), Ok(true));
    }

    fn arb_value() -> impl Strategy<Value = FieldValue> {
        let leaf = prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::from),
            (0i64..100).prop_map(FieldValue::from),
            "[a-z]{0,4}".prop_map(FieldValue::text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(FieldValue::List),
                prop::collection::btree_map("[a-c]", inner, 0..4).prop_map(FieldValue::Object),
            ]
        })
    }

    /// Whether merging `overrides` replaces whatever sits at `leaf`: some
    /// override is stored at `leaf` itself, or at an ancestor as a non-object.
    fn overridden(overrides: &FieldValue, leaf: &ConfigPath) -> bool {
        let mut prefix = ConfigPath::root();
        for segment in leaf.segments() {
            prefix = match segment {
                Segment::Key(key) => prefix.child(key.clone()),
                Segment::Index(i) => prefix.index(*i),
            };
            match overrides.lookup(&prefix) {
                Some(FieldValue::Object(_)) if &prefix != leaf => {}
                Some(_) => return true,
                None => return false,
            }
        }
        false
    }

    fn arb_object() -> impl Strategy<Value = FieldValue> {
        prop::collection::btree_map("[a-c]", arb_value(), 0..4).prop_map(FieldValue::Object)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_override_leaves_win(defaults in arb_object(), overrides in arb_object()) {
            let merged = initialize(&defaults, Some(&overrides));
            for (leaf, value) in overrides.leaves() {
                prop_assert_eq!(merged.get(&leaf), Some(value), "override leaf {}", leaf);
            }
        }

        #[test]
        fn prop_default_leaves_survive_where_not_overridden(
            defaults in arb_object(),
            overrides in arb_object(),
        ) {
            let merged = initialize(&defaults, Some(&overrides));
            for (leaf, value) in defaults.leaves() {
                if !overridden(&overrides, &leaf) {
                    prop_assert_eq!(merged.get(&leaf), Some(value), "default leaf {}", leaf);
                }
            }
        }
    }
}
