//! The configuration value model.
//!
//! [`FieldValue`] is a tagged union over the JSON shapes a template form can
//! produce. [`ConfigTree`] is an immutable, shareable snapshot of the whole
//! configuration: updates build a new tree, so consumers can compare trees
//! by identity ([`ConfigTree::same`]) or by [`ConfigTree::revision`] to
//! decide whether anything needs re-rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};

use crate::path::{ConfigPath, Segment};

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(Number),
    Bool(bool),
}

/// Any value stored in a configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum FieldValue {
    #[default]
    Null,
    Scalar(Scalar),
    Object(BTreeMap<String, FieldValue>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// An empty object.
    #[must_use]
    pub const fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// A text scalar.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(s.into()))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Scalar(Scalar::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// JSON type name, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(Scalar::Text(_)) => "string",
            Self::Scalar(Scalar::Number(_)) => "number",
            Self::Scalar(Scalar::Bool(_)) => "boolean",
            Self::Object(_) => "object",
            Self::List(_) => "array",
        }
    }

    /// Object member lookup. `None` on non-objects.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Walk `path` from this value. `None` as soon as a segment is absent
    /// or addresses the wrong container kind.
    #[must_use]
    pub fn lookup(&self, path: &ConfigPath) -> Option<&Self> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| match (segment, node) {
                (Segment::Key(k), Self::Object(map)) => map.get(k),
                (Segment::Index(i), Self::List(items)) => items.get(*i),
                _ => None,
            })
    }

    /// Text substituted for a placeholder resolving to this value.
    ///
    /// Strings verbatim, numbers and booleans in literal form, `null` as the
    /// empty string, objects and lists as compact JSON with sorted keys.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Scalar(Scalar::Text(s)) => s.clone(),
            Self::Scalar(Scalar::Number(n)) => n.to_string(),
            Self::Scalar(Scalar::Bool(b)) => b.to_string(),
            Self::Object(_) | Self::List(_) => {
                let mut json = CompactJson::default();
                self.walk(&mut json);
                json.out
            }
        }
    }

    /// Walk the value depth-first, reporting every node to `visitor`.
    pub fn walk<'v, V: Visitor<'v> + ?Sized>(&'v self, visitor: &mut V) {
        let mut path = ConfigPath::root();
        self.walk_at(&mut path, visitor);
    }

    fn walk_at<'v, V: Visitor<'v> + ?Sized>(&'v self, path: &mut ConfigPath, visitor: &mut V) {
        if !visitor.visit(path, self) {
            return;
        }
        match self {
            Self::Null | Self::Scalar(_) => {}
            Self::Object(map) => {
                for (key, child) in map {
                    path.push(Segment::Key(key.clone()));
                    child.walk_at(path, visitor);
                    path.pop();
                }
                visitor.leave(path, self);
            }
            Self::List(items) => {
                for (i, child) in items.iter().enumerate() {
                    path.push(Segment::Index(i));
                    child.walk_at(path, visitor);
                    path.pop();
                }
                visitor.leave(path, self);
            }
        }
    }

    /// Every leaf path with its value. Lists count as leaves: they are
    /// replaced wholesale by merges, never spliced. Empty objects are not
    /// leaves, matching merges where they overlay nothing.
    #[must_use]
    pub fn leaves(&self) -> Vec<(ConfigPath, &Self)> {
        let mut leaves = Leaves(Vec::new());
        self.walk(&mut leaves);
        leaves.0
    }
}

/// Depth-first observer for [`FieldValue::walk`].
pub trait Visitor<'v> {
    /// Called for every node before its children. Returning `false` skips
    /// the children of an object or list.
    fn visit(&mut self, path: &ConfigPath, value: &'v FieldValue) -> bool;

    /// Called after the children of a container that was descended into.
    fn leave(&mut self, _path: &ConfigPath, _value: &'v FieldValue) {}
}

struct Leaves<'v>(Vec<(ConfigPath, &'v FieldValue)>);

impl<'v> Visitor<'v> for Leaves<'v> {
    fn visit(&mut self, path: &ConfigPath, value: &'v FieldValue) -> bool {
        if matches!(value, FieldValue::Object(_)) {
            return true;
        }
        self.0.push((path.clone(), value));
        false
    }
}

/// Canonical text of composite values: compact JSON, keys in map order.
#[derive(Default)]
struct CompactJson {
    out: String,
    /// Per open container, whether it has no member written yet.
    first: Vec<bool>,
}

impl CompactJson {
    fn separate(&mut self, path: &ConfigPath) {
        let Some(first) = self.first.last_mut() else {
            return;
        };
        if !std::mem::replace(first, false) {
            self.out.push(',');
        }
        if let Some(Segment::Key(key)) = path.segments().last() {
            self.out.push_str(&Value::from(key.as_str()).to_string());
            self.out.push(':');
        }
    }
}

impl<'v> Visitor<'v> for CompactJson {
    fn visit(&mut self, path: &ConfigPath, value: &'v FieldValue) -> bool {
        self.separate(path);
        match value {
            FieldValue::Null => self.out.push_str("null"),
            FieldValue::Scalar(Scalar::Text(s)) => self.out.push_str(&Value::from(s.as_str()).to_string()),
            FieldValue::Scalar(Scalar::Number(n)) => self.out.push_str(&n.to_string()),
            FieldValue::Scalar(Scalar::Bool(b)) => self.out.push_str(if *b { "true" } else { "false" }),
            FieldValue::Object(_) => {
                self.out.push('{');
                self.first.push(true);
            }
            FieldValue::List(_) => {
                self.out.push('[');
                self.first.push(true);
            }
        }
        true
    }

    fn leave(&mut self, _path: &ConfigPath, value: &'v FieldValue) {
        self.first.pop();
        self.out.push(if matches!(value, FieldValue::Object(_)) { '}' } else { ']' });
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Scalar(Scalar::Text(s)) => serializer.serialize_str(s),
            Self::Scalar(Scalar::Number(n)) => n.serialize(serializer),
            Self::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Self::Object(map) => map.serialize(serializer),
            Self::List(items) => items.serialize(serializer),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Self::Scalar(Scalar::Number(n)),
            Value::String(s) => Self::Scalar(Scalar::Text(s)),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&FieldValue> for Value {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Self::Null,
            FieldValue::Scalar(Scalar::Text(s)) => Self::String(s.clone()),
            FieldValue::Scalar(Scalar::Number(n)) => Self::Number(n.clone()),
            FieldValue::Scalar(Scalar::Bool(b)) => Self::Bool(*b),
            FieldValue::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
            FieldValue::List(items) => Self::Array(items.iter().map(Self::from).collect()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Scalar(Scalar::Number(n.into()))
    }
}

impl From<f64> for FieldValue {
    /// Non-finite numbers have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, |n| Self::Scalar(Scalar::Number(n)))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

/// An immutable snapshot of a configuration value tree.
///
/// The root is always an object. Cloning is cheap (shared `Arc`).
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: Arc<FieldValue>,
    revision: u64,
}

impl ConfigTree {
    /// Wrap `root` in a fresh snapshot. A non-object root becomes `{}`.
    #[must_use]
    pub fn new(root: FieldValue) -> Self {
        let root = match root {
            FieldValue::Object(_) => root,
            _ => FieldValue::object(),
        };
        Self {
            root: Arc::new(root),
            revision: NEXT_REVISION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// An empty tree.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(FieldValue::object())
    }

    #[must_use]
    pub fn root(&self) -> &FieldValue {
        &self.root
    }

    /// Process-unique, increasing with every new snapshot.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Identity comparison: `true` when both handles share one snapshot.
    #[must_use]
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.root, &b.root)
    }

    #[must_use]
    pub fn get(&self, path: &ConfigPath) -> Option<&FieldValue> {
        self.root.lookup(path)
    }

    /// The value of one top-level section.
    #[must_use]
    pub fn section(&self, key: &str) -> Option<&FieldValue> {
        self.root.get(key)
    }

    /// Top-level keys in order.
    pub fn section_keys(&self) -> impl Iterator<Item = &str> {
        self.root
            .as_object()
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    /// Deep copy of the root, for building payloads or the next snapshot.
    #[must_use]
    pub fn to_value(&self) -> FieldValue {
        (*self.root).clone()
    }
}

impl PartialEq for ConfigTree {
    fn eq(&self, other: &Self) -> bool {
        Self::same(self, other) || self.root == other.root
    }
}

impl Serialize for ConfigTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.root.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConfigTree {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FieldValue::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> FieldValue {
        FieldValue::from(json!({
            "styling": {"colors": {"primary": "#112233"}, "radius": 8, "dark": false},
            "documents": [{"title": "Intro"}, {"title": "FAQ"}],
            "note": null
        }))
    }

    #[test]
    fn lookup_walks_keys_and_indices() {
        let v = sample();
        let primary = ConfigPath::parse("styling.colors.primary").unwrap();
        assert_eq!(v.lookup(&primary).and_then(FieldValue::as_str), Some("#112233"));
        let faq = ConfigPath::parse("documents[1].title").unwrap();
        assert_eq!(v.lookup(&faq).and_then(FieldValue::as_str), Some("FAQ"));
        assert!(v.lookup(&ConfigPath::parse("documents[5].title").unwrap()).is_none());
        assert!(v.lookup(&ConfigPath::parse("styling[0]").unwrap()).is_none());
    }

    #[test]
    fn to_text_renders_literal_forms() {
        let v = sample();
        assert_eq!(v.get("styling").unwrap().get("radius").unwrap().to_text(), "8");
        assert_eq!(v.get("styling").unwrap().get("dark").unwrap().to_text(), "false");
        assert_eq!(v.get("note").unwrap().to_text(), "");
        assert_eq!(
            v.get("documents").unwrap().to_text(),
            r#"[{"title":"Intro"},{"title":"FAQ"}]"#
        );
    }

    #[test]
    fn json_conversion_preserves_shape() {
        let original = json!({"a": [1, 2.5, "x", true, null], "b": {"c": {}}});
        let value = FieldValue::from(original.clone());
        assert_eq!(Value::from(&value), original);
        assert_eq!(serde_json::to_value(&value).unwrap(), original);
        let back: FieldValue = serde_json::from_value(original).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn leaves_treat_lists_as_leaves() {
        let v = sample();
        let paths: Vec<String> = v.leaves().into_iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(
            paths,
            vec![
                "documents",
                "note",
                "styling.colors.primary",
                "styling.dark",
                "styling.radius",
            ]
        );
    }

    #[test]
    fn visitor_can_prune_and_sees_every_scalar() {
        struct Scalars(Vec<String>);
        impl<'v> Visitor<'v> for Scalars {
            fn visit(&mut self, path: &ConfigPath, value: &'v FieldValue) -> bool {
                if matches!(value, FieldValue::Scalar(_)) {
                    self.0.push(path.to_string());
                }
                path.to_string() != "styling"
            }
        }
        let mut scalars = Scalars(Vec::new());
        sample().walk(&mut scalars);
        assert!(scalars.0.contains(&"documents[1].title".to_owned()));
        assert!(!scalars.0.iter().any(|p| p.starts_with("styling")));
        assert_eq!(scalars.0.len(), 2);
    }

    #[test]
    fn composite_text_is_escaped_compact_json() {
        let v = FieldValue::from(json!({
            "z": {"q\"": [1, null, "a\nb", false, {}]},
            "a": []
        }));
        assert_eq!(v.to_text(), r#"{"a":[],"z":{"q\"":[1,null,"a\nb",false,{}]}}"#);
        assert_eq!(v.to_text(), serde_json::to_string(&v).unwrap());
    }

    #[test]
    fn empty_objects_are_not_leaves() {
        let v = FieldValue::from(json!({"s": {}, "t": {"u": {}, "v": 1}, "l": []}));
        let paths: Vec<String> = v.leaves().into_iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["l", "t.v"]);
    }

    #[test]
    fn tree_identity_and_revision() {
        let a = ConfigTree::new(sample());
        let b = a.clone();
        let c = ConfigTree::new(sample());
        assert!(ConfigTree::same(&a, &b));
        assert!(!ConfigTree::same(&a, &c));
        assert_eq!(a, c);
        assert!(c.revision() > a.revision());
    }

    #[test]
    fn non_object_root_becomes_empty_object() {
        let tree = ConfigTree::new(FieldValue::text("oops"));
        assert_eq!(tree.root(), &FieldValue::object());
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert!(FieldValue::from(f64::NAN).is_null());
        assert_eq!(FieldValue::from(1.5).to_text(), "1.5");
    }
}
