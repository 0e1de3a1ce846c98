//! Templates and their configuration schema.
//!
//! A template's `config_schema` is a JSON-Schema object document. Each
//! top-level property is a *section*; nested properties become fields.
//! Only the subset needed to build forms and defaults is interpreted here;
//! full validation is the [`crate::validator`]'s job.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::ConfigPath;
use crate::value::FieldValue;

/// A reusable app template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub id: String,
    /// Unique, URL-safe identifier.
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// HTML/JS source containing `{{path}}` placeholders.
    pub template_code: String,
    #[serde(default)]
    pub config_schema: Value,
    /// Section → field → value, same shape as the schema.
    #[serde(default)]
    pub default_values: FieldValue,
    #[serde(default)]
    pub ui_hints: UiHints,
}

impl Template {
    /// The schema's sections, one per top-level property.
    #[must_use]
    pub fn sections(&self) -> Vec<SectionSchema> {
        sections(&self.config_schema)
    }

    /// Defaults declared in the schema, overlaid with `default_values`.
    #[must_use]
    pub fn defaults(&self) -> FieldValue {
        let mut base = defaults(&self.config_schema);
        if !self.default_values.is_null() {
            crate::store::deep_merge(&mut base, &self.default_values);
        }
        match base {
            FieldValue::Object(_) => base,
            _ => FieldValue::object(),
        }
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Enum,
}

impl FieldType {
    fn from_schema(schema: &Value) -> Self {
        if schema.get("enum").is_some_and(Value::is_array) {
            return Self::Enum;
        }
        let declared = match schema.get("type") {
            Some(Value::String(t)) => Some(t.as_str()),
            // `["string", "null"]` style unions: first non-null member.
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null"),
            _ => None,
        };
        match declared {
            Some("number") => Self::Number,
            Some("integer") => Self::Integer,
            Some("boolean") => Self::Boolean,
            Some("object") => Self::Object,
            Some("array") => Self::Array,
            Some(_) => Self::String,
            None if schema.get("properties").is_some() => Self::Object,
            None if schema.get("items").is_some() => Self::Array,
            None => Self::String,
        }
    }

    /// Whether `value` has this type. `Null` never type-checks.
    #[must_use]
    pub fn accepts(self, value: &FieldValue) -> bool {
        use crate::value::Scalar;
        match (self, value) {
            (Self::String, FieldValue::Scalar(Scalar::Text(_)))
            | (Self::Number, FieldValue::Scalar(Scalar::Number(_)))
            | (Self::Boolean, FieldValue::Scalar(Scalar::Bool(_)))
            | (Self::Object, FieldValue::Object(_))
            | (Self::Array, FieldValue::List(_))
            | (Self::Enum, FieldValue::Scalar(_)) => true,
            (Self::Integer, FieldValue::Scalar(Scalar::Number(n))) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

/// One field of the configuration form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub key: String,
    pub field_type: FieldType,
    pub title: String,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<FieldValue>,
    /// Allowed values for [`FieldType::Enum`].
    pub enum_values: Vec<FieldValue>,
    /// JSON-Schema `format`, e.g. `color` or `uri`.
    pub format: Option<String>,
    /// Properties of an object field.
    pub children: Vec<FieldSchema>,
    /// Item schema of an array field.
    pub items: Option<Box<FieldSchema>>,
}

/// A top-level group of fields, independently editable after deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionSchema {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    /// The object's properties, or the property itself for scalar sections.
    pub fields: Vec<FieldSchema>,
    /// Whether the section is a single scalar field rather than a group.
    pub scalar: bool,
}

/// Sections of a schema document, in property order.
#[must_use]
pub fn sections(schema: &Value) -> Vec<SectionSchema> {
    let required = required_keys(schema);
    properties(schema)
        .map(|(key, prop)| {
            let field = field(key, prop, required.contains(key.as_str()));
            if field.field_type == FieldType::Object {
                SectionSchema {
                    key: field.key,
                    title: field.title,
                    description: field.description,
                    fields: field.children,
                    scalar: false,
                }
            } else {
                SectionSchema {
                    key: field.key.clone(),
                    title: field.title.clone(),
                    description: field.description.clone(),
                    fields: vec![field],
                    scalar: true,
                }
            }
        })
        .collect()
}

/// Default values declared by `default` keywords, as an object tree.
#[must_use]
pub fn defaults(schema: &Value) -> FieldValue {
    schema_default(schema).unwrap_or_else(FieldValue::object)
}

fn schema_default(schema: &Value) -> Option<FieldValue> {
    if let Some(explicit) = schema.get("default") {
        return Some(FieldValue::from(explicit.clone()));
    }
    if FieldType::from_schema(schema) != FieldType::Object {
        return None;
    }
    let map: BTreeMap<String, FieldValue> = properties(schema)
        .filter_map(|(key, prop)| schema_default(prop).map(|v| (key.clone(), v)))
        .collect();
    Some(FieldValue::Object(map))
}

fn properties(schema: &Value) -> impl Iterator<Item = (&String, &Value)> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|props| props.iter())
}

fn required_keys(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn field(key: &str, schema: &Value, required: bool) -> FieldSchema {
    let field_type = FieldType::from_schema(schema);
    let nested_required = required_keys(schema);
    let children = if field_type == FieldType::Object {
        properties(schema)
            .map(|(k, v)| field(k, v, nested_required.contains(k.as_str())))
            .collect()
    } else {
        Vec::new()
    };
    let items = (field_type == FieldType::Array)
        .then(|| schema.get("items"))
        .flatten()
        .map(|item| Box::new(field("item", item, false)));

    FieldSchema {
        key: key.to_owned(),
        field_type,
        title: schema
            .get("title")
            .and_then(Value::as_str)
            .map_or_else(|| humanize(key), str::to_owned),
        description: schema
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
        required,
        default: schema.get("default").cloned().map(FieldValue::from),
        enum_values: schema
            .get("enum")
            .and_then(Value::as_array)
            .map(|vals| vals.iter().cloned().map(FieldValue::from).collect())
            .unwrap_or_default(),
        format: schema
            .get("format")
            .and_then(Value::as_str)
            .map(str::to_owned),
        children,
        items,
    }
}

/// `primary_color` → `Primary color`.
fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Widget a field is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Widget {
    Text,
    TextArea,
    Color,
    Number,
    Toggle,
    Select,
    Password,
    Group,
    List,
    #[serde(other)]
    Auto,
}

/// Rendering directives for one field or section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiHint {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<Widget>,
}

/// Hints keyed by dotted path (`styling` or `styling.primary_color`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UiHints(pub BTreeMap<String, UiHint>);

impl UiHints {
    /// The hint registered for exactly this path.
    #[must_use]
    pub fn get(&self, path: &ConfigPath) -> Option<&UiHint> {
        self.0.get(&path.to_string())
    }

    /// Disabled when the path or any ancestor (e.g. its section) is disabled.
    #[must_use]
    pub fn is_disabled(&self, path: &ConfigPath) -> bool {
        let mut prefix = ConfigPath::root();
        path.segments().iter().any(|segment| {
            prefix.push(segment.clone());
            self.get(&prefix).is_some_and(|hint| hint.disabled)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["general"],
            "properties": {
                "general": {
                    "type": "object",
                    "title": "General",
                    "required": ["title"],
                    "properties": {
                        "title": {"type": "string", "default": "My assistant"},
                        "welcome_message": {"type": "string"},
                        "max_tokens": {"type": "integer", "default": 512}
                    }
                },
                "styling": {
                    "type": "object",
                    "properties": {
                        "primary_color": {"type": "string", "format": "color", "default": "#3366ff"},
                        "theme": {"enum": ["light", "dark"], "default": "light"},
                        "rounded": {"type": "boolean"}
                    }
                },
                "documents": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"title": {"type": "string"}}}
                },
                "api_key": {"type": ["string", "null"]}
            }
        })
    }

    #[test]
    fn sections_follow_top_level_properties() {
        let sections = sections(&schema());
        let mut keys: Vec<&str> = sections.iter().map(|s| s.key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["api_key", "documents", "general", "styling"]);

        let general = sections.iter().find(|s| s.key == "general").unwrap();
        assert!(!general.scalar);
        assert_eq!(general.title, "General");
        let title = general.fields.iter().find(|f| f.key == "title").unwrap();
        assert!(title.required);
        let welcome = general.fields.iter().find(|f| f.key == "welcome_message").unwrap();
        assert_eq!(welcome.title, "Welcome message");
        assert!(!welcome.required);

        let documents = sections.iter().find(|s| s.key == "documents").unwrap();
        assert!(documents.scalar);
        let items = documents.fields[0].items.as_ref().unwrap();
        assert_eq!(items.field_type, FieldType::Object);
        assert_eq!(items.children[0].key, "title");

        let api_key = sections.iter().find(|s| s.key == "api_key").unwrap();
        assert_eq!(api_key.fields[0].field_type, FieldType::String);
    }

    #[test]
    fn enum_fields_collect_options() {
        let sections = sections(&schema());
        let styling = sections.iter().find(|s| s.key == "styling").unwrap();
        let theme = styling.fields.iter().find(|f| f.key == "theme").unwrap();
        assert_eq!(theme.field_type, FieldType::Enum);
        assert_eq!(theme.enum_values, vec![FieldValue::text("light"), FieldValue::text("dark")]);
    }

    #[test]
    fn defaults_collect_nested_default_keywords() {
        let d = defaults(&schema());
        assert_eq!(
            serde_json::to_value(&d).unwrap(),
            json!({
                "general": {"title": "My assistant", "max_tokens": 512},
                "styling": {"primary_color": "#3366ff", "theme": "light"}
            })
        );
    }

    #[test]
    fn template_default_values_override_schema_defaults() {
        let template = Template {
            id: "t1".into(),
            slug: "assistant".into(),
            name: "Assistant".into(),
            description: String::new(),
            tags: BTreeSet::new(),
            template_code: String::new(),
            config_schema: schema(),
            default_values: FieldValue::from(json!({"styling": {"theme": "dark"}})),
            ui_hints: UiHints::default(),
        };
        let d = template.defaults();
        let theme = ConfigPath::parse("styling.theme").unwrap();
        let color = ConfigPath::parse("styling.primary_color").unwrap();
        assert_eq!(d.lookup(&theme), Some(&FieldValue::text("dark")));
        assert_eq!(d.lookup(&color), Some(&FieldValue::text("#3366ff")));
    }

    #[test]
    fn template_without_default_values_keeps_schema_defaults() {
        let template: Template = serde_json::from_value(json!({
            "slug": "assistant",
            "name": "Assistant",
            "template_code": "<h1>{{general.title}}</h1>",
            "config_schema": schema()
        }))
        .unwrap();
        assert!(template.default_values.is_null());
        assert_eq!(template.defaults(), defaults(&schema()));
    }

    #[test]
    fn type_check_accepts_matching_values() {
        assert!(FieldType::Integer.accepts(&FieldValue::from(3)));
        assert!(!FieldType::Integer.accepts(&FieldValue::from(3.5)));
        assert!(FieldType::Boolean.accepts(&FieldValue::from(true)));
        assert!(!FieldType::String.accepts(&FieldValue::Null));
    }

    #[test]
    fn section_hint_disables_nested_fields() {
        let hints: UiHints = serde_json::from_value(json!({
            "general": {"disabled": true},
            "styling.primary_color": {"help": "Brand color", "widget": "color"},
            "styling.theme": {"widget": "carousel"}
        }))
        .unwrap();
        assert!(hints.is_disabled(&ConfigPath::parse("general.title").unwrap()));
        assert!(!hints.is_disabled(&ConfigPath::parse("styling.primary_color").unwrap()));
        let color = hints.get(&ConfigPath::parse("styling.primary_color").unwrap()).unwrap();
        assert_eq!(color.widget, Some(Widget::Color));
        let theme = hints.get(&ConfigPath::parse("styling.theme").unwrap()).unwrap();
        assert_eq!(theme.widget, Some(Widget::Auto));
    }
}
