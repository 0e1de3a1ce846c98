//! Placeholder resolution.
//!
//! `{{path}}` tokens in template source are replaced by the text form of the
//! value at `path` in a configuration tree. Resolution is total: a missing
//! or malformed path substitutes the empty string, and the output never
//! contains a placeholder token, whatever the values hold.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, trace};

use crate::path::ConfigPath;
use crate::value::{ConfigTree, FieldValue};

/// `{{` + anything without braces + `}}`.
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("placeholder pattern is valid"));

/// Substitute every placeholder in `template` from `values`.
///
/// # Examples
///
/// ```
/// use appforge_core::{ConfigTree, FieldValue, resolve};
///
/// let values = ConfigTree::new(FieldValue::from(serde_json::json!({"name": "Ana"})));
/// assert_eq!(resolve("Hello {{name}}, key={{api_key}}", &values), "Hello Ana, key=");
/// ```
#[must_use]
pub fn resolve(template: &str, values: &ConfigTree) -> String {
    resolve_value(template, values.root())
}

/// [`resolve`] against a bare value instead of a snapshot.
#[must_use]
pub fn resolve_value(template: &str, values: &FieldValue) -> String {
    let substituted =
        PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| substitution(&caps[1], values));
    scrub(&substituted)
}

fn substitution(raw: &str, values: &FieldValue) -> String {
    let Some(path) = ConfigPath::parse(raw) else {
        debug!(placeholder = raw, "malformed placeholder path, substituting empty text");
        return String::new();
    };
    values.lookup(&path).map_or_else(
        || {
            trace!(%path, "unbound placeholder");
            String::new()
        },
        FieldValue::to_text,
    )
}

/// Where the scan stands relative to the innermost `{{` that could still
/// close into a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    /// Nothing can close.
    Dead,
    /// Output ends with a single `{` that may become an opening.
    Open,
    /// Opening at this offset, no braces after it.
    Clean(usize),
    /// As `Clean`, followed by one `}`.
    Close(usize),
}

impl Tail {
    const fn opening(self) -> Option<usize> {
        match self {
            Self::Clean(start) | Self::Close(start) => Some(start),
            Self::Dead | Self::Open => None,
        }
    }
}

/// Remove placeholder-shaped text that substitution produced, either copied
/// from a value or formed by a value next to a literal brace. Substituted
/// values are data and are never resolved themselves.
///
/// The result is what repeatedly deleting the innermost `{{…}}` would leave,
/// computed in one pass: an opening interrupted by a newer `{{` is
/// suspended and resumes once the newer placeholder is cut.
fn scrub(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut suspended: Vec<Tail> = Vec::new();
    let mut tail = Tail::Dead;
    let mut removed = 0usize;

    for c in text.chars() {
        let len = out.len();
        tail = match (tail, c) {
            (Tail::Close(start), '}') => {
                out.truncate(start);
                removed += 1;
                reopen(&out, &mut suspended, start)
            }
            (Tail::Close(_), '{') => {
                suspended.push(tail);
                out.push(c);
                Tail::Open
            }
            (Tail::Clean(start), '{') => {
                suspended.push(tail);
                out.push(c);
                if len == start + 2 {
                    Tail::Clean(start + 1)
                } else {
                    Tail::Open
                }
            }
            (Tail::Clean(start), '}') => {
                out.push(c);
                Tail::Close(start)
            }
            (Tail::Clean(_), _) => {
                out.push(c);
                tail
            }
            (Tail::Open, '{') => {
                out.push(c);
                Tail::Clean(len - 1)
            }
            (Tail::Dead | Tail::Open | Tail::Close(_), _) => {
                suspended.clear();
                out.push(c);
                if c == '{' { Tail::Open } else { Tail::Dead }
            }
        };
    }

    if removed > 0 {
        debug!(removed, "removed placeholder-shaped text left after substitution");
    }
    out
}

fn innermost(suspended: &[Tail]) -> Option<usize> {
    suspended.last().and_then(|t| t.opening())
}

/// State after the placeholder opened at `start` was cut from `out`.
fn reopen(out: &str, suspended: &mut Vec<Tail>, start: usize) -> Tail {
    // An opening overlapping the removed one lost its second brace.
    if innermost(suspended).is_some_and(|p| p + 1 == start) {
        suspended.pop();
        if innermost(suspended).is_some_and(|q| q + 2 == start) {
            return suspended.pop().unwrap_or(Tail::Open);
        }
        return Tail::Open;
    }
    suspended.pop().unwrap_or_else(|| {
        if out.ends_with('{') { Tail::Open } else { Tail::Dead }
    })
}

/// Distinct well-formed placeholder paths used by `template`.
#[must_use]
pub fn placeholders(template: &str) -> BTreeSet<ConfigPath> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| ConfigPath::parse(&caps[1]))
        .collect()
}

/// Placeholder paths of `template` that `values` does not bind. Useful for
/// warning template authors; resolution itself substitutes empty text.
#[must_use]
pub fn unbound_placeholders(template: &str, values: &ConfigTree) -> Vec<ConfigPath> {
    placeholders(template)
        .into_iter()
        .filter(|path| values.get(path).is_none())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tree(v: serde_json::Value) -> ConfigTree {
        ConfigTree::new(FieldValue::from(v))
    }

    fn sample() -> ConfigTree {
        tree(json!({
            "name": "Ana",
            "styling": {"colors": {"primary": "#112233"}, "radius": 8, "dark": false},
            "documents": [{"title": "Intro"}, {"title": "FAQ"}],
            "note": null,
            "limits": {"b": 2, "a": [1, 2]},
            "sneaky": "{{name}}",
            "brace": "{x}"
        }))
    }

    #[test]
    fn missing_value_uses_empty_text() {
        let values = tree(json!({"name": "Ana"}));
        assert_eq!(resolve("Hello {{name}}, key={{api_key}}", &values), "Hello Ana, key=");
    }

    #[test]
    fn nested_path_resolves_leaf() {
        let values = tree(json!({"styling": {"colors": {"primary": "#112233"}}}));
        assert_eq!(resolve("{{styling.colors.primary}}", &values), "#112233");
    }

    #[test]
    fn deep_missing_path_is_empty() {
        assert_eq!(resolve("{{a.b.c}}", &ConfigTree::empty()), "");
    }

    #[test]
    fn scalars_render_literally() {
        let out = resolve("r={{styling.radius}} d={{styling.dark}} n=[{{note}}]", &sample());
        assert_eq!(out, "r=8 d=false n=[]");
    }

    #[test]
    fn list_indexing() {
        let out = resolve("{{documents[1].title}}|{{documents[5].title}}", &sample());
        assert_eq!(out, "FAQ|");
    }

    #[test]
    fn composite_leaf_renders_sorted_compact_json() {
        assert_eq!(resolve("{{limits}}", &sample()), r#"{"a":[1,2],"b":2}"#);
        assert_eq!(
            resolve("{{documents}}", &sample()),
            r#"[{"title":"Intro"},{"title":"FAQ"}]"#
        );
    }

    #[test]
    fn whitespace_inside_braces_is_trimmed() {
        assert_eq!(resolve("{{ name }}", &sample()), "Ana");
    }

    #[test]
    fn malformed_paths_never_fail() {
        for template in ["{{}}", "{{a..b}}", "{{documents[x]}}", "{{documents[0}}", "{{ . }}"] {
            assert_eq!(resolve(template, &sample()), "", "template {template}");
        }
    }

    #[test]
    fn wrong_container_kind_is_empty() {
        assert_eq!(resolve("{{name.first}}|{{styling[0]}}", &sample()), "|");
    }

    #[test]
    fn eight_levels_deep() {
        let values = tree(json!({"a": {"b": {"c": {"d": {"e": {"f": {"g": {"h": "deep"}}}}}}}}));
        assert_eq!(resolve("{{a.b.c.d.e.f.g.h}}", &values), "deep");
    }

    #[test]
    fn substituted_values_are_not_resolved_again() {
        assert_eq!(resolve("<{{sneaky}}>", &sample()), "<>");
    }

    #[test]
    fn output_never_contains_placeholders() {
        let values = sample();
        let templates = [
            "{{{brace}}}",
            "{{{{name}}}}",
            "{{sneaky}}{{sneaky}}",
            "{ {{name}} }",
            "{{missing}} and {{a..b}} and {{documents[0]}}",
            "}}{{",
            "<script>var c = {{styling}};</script>",
        ];
        for template in templates {
            let out = resolve(template, &values);
            assert!(!PLACEHOLDER.is_match(&out), "template {template} produced {out}");
        }
    }

    #[test]
    fn resolving_output_again_is_stable() {
        let values = sample();
        let templates = [
            "Hello {{name}}!",
            "<p style=\"color: {{styling.colors.primary}}\">{{documents[0].title}}</p>",
            "{{{brace}}}",
            "{{sneaky}} {{note}} {{limits}}",
            "no placeholders at all",
        ];
        for template in templates {
            let once = resolve(template, &values);
            assert_eq!(resolve(&once, &values), once, "template {template}");
        }
    }

    #[test]
    fn nested_braces_collapse_from_the_inside() {
        let values = sample();
        assert_eq!(resolve("{{{{x}}}}", &values), "");
        assert_eq!(resolve("{{{x}}", &values), "{");
        // The lone `}` after `{{` pairs up once the inner placeholder is cut.
        assert_eq!(resolve("{{}{{}}}", &values), "");
        assert_eq!(resolve("{{a{{b}}c}}", &values), "");
        assert_eq!(resolve("{{a}b}}", &values), "{{a}b}}");
    }

    #[test]
    fn deep_brace_nesting_resolves_in_linear_time() {
        let depth = 100_000;
        let even = format!("{}x{}", "{".repeat(2 * depth), "}".repeat(2 * depth));
        assert_eq!(resolve(&even, &sample()), "");
        let odd = format!("{}x{}", "{".repeat(2 * depth + 1), "}".repeat(2 * depth));
        assert_eq!(resolve(&odd, &sample()), "{");
    }

    #[test]
    fn literal_braces_without_placeholders_pass_through() {
        let css = "body { margin: 0 } .a{{}";
        assert_eq!(resolve("body { margin: 0 }", &sample()), "body { margin: 0 }");
        assert_eq!(resolve(css, &sample()), css);
    }

    #[test]
    fn placeholder_inventory() {
        let template = "{{name}} {{styling.colors.primary}} {{name}} {{a..b}} {{api_key}}";
        let found: Vec<String> = placeholders(template).iter().map(ToString::to_string).collect();
        assert_eq!(found, vec!["api_key", "name", "styling.colors.primary"]);

        let unbound = unbound_placeholders(template, &sample());
        assert_eq!(unbound, vec![ConfigPath::key("api_key")]);
    }

    fn scrub_by_repetition(text: &str) -> String {
        let mut text = text.to_owned();
        while PLACEHOLDER.is_match(&text) {
            text = PLACEHOLDER.replace_all(&text, "").into_owned();
        }
        text
    }

    fn arb_value() -> impl Strategy<Value = FieldValue> {
        let leaf = prop_oneof![
            Just(FieldValue::Null),
            any::<bool>().prop_map(FieldValue::from),
            any::<i64>().prop_map(FieldValue::from),
            "[a-c{} .]{0,8}".prop_map(FieldValue::text),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::List),
                prop::collection::btree_map("[a-c]", inner, 0..4).prop_map(FieldValue::Object),
            ]
        })
    }

    fn arb_values() -> impl Strategy<Value = ConfigTree> {
        prop::collection::btree_map("[a-c]", arb_value(), 0..4)
            .prop_map(|map| ConfigTree::new(FieldValue::Object(map)))
    }

    /// Placeholders mixed with loose braces, dots and text.
    fn arb_template() -> impl Strategy<Value = String> {
        let piece = prop_oneof![
            r"\{\{ ?[a-c](\.[a-c]|\[[0-2]\])? ?\}\}",
            "[{}a-c. ]{1,4}",
        ];
        prop::collection::vec(piece, 0..12).prop_map(|parts| parts.concat())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_output_has_no_placeholders(template in arb_template(), values in arb_values()) {
            let out = resolve(&template, &values);
            prop_assert!(!PLACEHOLDER.is_match(&out), "{:?} produced {:?}", template, out);
        }

        #[test]
        fn prop_resolution_is_idempotent(template in arb_template(), values in arb_values()) {
            let once = resolve(&template, &values);
            prop_assert_eq!(resolve(&once, &values), once);
        }

        #[test]
        fn prop_single_pass_matches_repeated_removal(text in "[{}x.]{0,48}") {
            prop_assert_eq!(scrub(&text), scrub_by_repetition(&text));
        }
    }
}
