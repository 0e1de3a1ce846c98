//! Schema-driven form model.
//!
//! [`render`] maps a template schema plus the live tree to a [`FormView`]
//! that any front end (the CLI, a web page) can draw. [`route_change`] is
//! the single entry point for user input: it decides whether a change may be
//! written and forwards it to the store.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::credential::CREDENTIAL_KEY;
use crate::error::{ChangeRejected, CredentialError};
use crate::path::ConfigPath;
use crate::schema::{FieldSchema, FieldType, SectionSchema, Template, Widget};
use crate::section::{SectionEditController, SectionState};
use crate::store::ConfigStore;
use crate::validator::FieldError;
use crate::value::{ConfigTree, FieldValue};

/// How the sections are composed.
#[derive(Debug, Clone, Copy)]
pub enum FormMode<'a> {
    /// First deployment: every section is open at once.
    Wizard,
    /// A deployed app: sections are locked unless the controller says
    /// otherwise.
    Sections(&'a SectionEditController),
}

impl FormMode<'_> {
    fn section_state(&self, key: &str) -> SectionState {
        match self {
            Self::Wizard => SectionState::Editing,
            Self::Sections(controller) => controller.state(key),
        }
    }
}

/// Inputs of one render.
#[derive(Debug, Clone, Copy)]
pub struct FormInput<'a> {
    pub template: &'a Template,
    pub tree: &'a ConfigTree,
    pub mode: FormMode<'a>,
    /// Validation errors of the current tree, from a [`crate::validator::Validator`].
    pub errors: &'a [FieldError],
    /// Outcome of the credential format check.
    pub credential: Result<(), &'a CredentialError>,
}

/// A drawable form.
#[derive(Debug, Clone, Serialize)]
pub struct FormView {
    pub sections: Vec<SectionView>,
    /// Errors not attributable to a section.
    pub screen_errors: Vec<String>,
    /// Error shown next to the credential selector.
    pub credential_error: Option<String>,
    /// Wizard only: whether the Deploy action is enabled.
    pub deploy_enabled: bool,
}

impl FormView {
    #[must_use]
    pub fn section(&self, key: &str) -> Option<&SectionView> {
        self.sections.iter().find(|s| s.key == key)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionView {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    pub state: SectionState,
    /// Whether inputs accept changes right now.
    pub editable: bool,
    /// Unsaved changes relative to the last save.
    pub dirty: bool,
    pub fields: Vec<FieldView>,
    /// Errors on the section as a whole or on paths without a field.
    pub errors: Vec<String>,
    /// The last failed save, if the section is back in editing.
    pub commit_error: Option<String>,
    /// Section mode only: whether Save is enabled.
    pub can_save: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub path: String,
    pub title: String,
    pub description: Option<String>,
    pub help: Option<String>,
    pub field_type: FieldType,
    pub widget: Widget,
    pub required: bool,
    /// Read-only because of a UI hint or because it is system-managed.
    pub disabled: bool,
    pub value: FieldValue,
    pub options: Vec<FieldValue>,
    pub errors: Vec<String>,
    /// Object fields: one view per property.
    pub children: Vec<FieldView>,
    /// List fields: one view per element.
    pub items: Vec<FieldView>,
}

/// Build the form for the current tree.
#[must_use]
pub fn render(input: &FormInput<'_>) -> FormView {
    let mut pending: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut screen_errors = Vec::new();
    let schema_sections = input.template.sections();
    for error in input.errors {
        match error.section() {
            Some(section) if schema_sections.iter().any(|s| s.key == section) => pending
                .entry(error.path.clone())
                .or_default()
                .push(error.message.clone()),
            _ => screen_errors.push(error.to_string()),
        }
    }

    let credential_error = input.credential.err().map(ToString::to_string);
    let credential_ok = credential_error.is_none();

    let mut sections = Vec::with_capacity(schema_sections.len());
    for schema in &schema_sections {
        sections.push(render_section(input, schema, &mut pending, credential_ok));
    }

    let deploy_enabled = matches!(input.mode, FormMode::Wizard)
        && credential_ok
        && screen_errors.is_empty()
        && sections.iter().all(|s| !has_errors(s));

    FormView {
        sections,
        screen_errors,
        credential_error,
        deploy_enabled,
    }
}

fn render_section(
    input: &FormInput<'_>,
    schema: &SectionSchema,
    pending: &mut BTreeMap<String, Vec<String>>,
    credential_ok: bool,
) -> SectionView {
    let state = input.mode.section_state(&schema.key);
    let editable = state == SectionState::Editing;
    let base = if schema.scalar {
        ConfigPath::root()
    } else {
        ConfigPath::key(schema.key.clone())
    };

    let fields: Vec<FieldView> = schema
        .fields
        .iter()
        .map(|field| render_field(input, field, base.child(field.key.clone()), editable, pending))
        .collect();

    // Whatever is left under this section has no field of its own.
    let prefix = ConfigPath::key(schema.key.clone());
    let leftover: Vec<String> = pending
        .keys()
        .filter(|path| ConfigPath::parse(path).is_some_and(|p| p.starts_with(&prefix)))
        .cloned()
        .collect();
    let errors = leftover
        .iter()
        .filter_map(|path| pending.remove(path))
        .flatten()
        .collect();

    let commit_error = match input.mode {
        FormMode::Wizard => None,
        FormMode::Sections(controller) => controller.section_error(&schema.key).map(str::to_owned),
    };

    let mut view = SectionView {
        key: schema.key.clone(),
        title: schema.title.clone(),
        description: schema.description.clone(),
        state,
        editable,
        dirty: false,
        fields,
        errors,
        commit_error,
        can_save: false,
    };
    view.can_save =
        matches!(input.mode, FormMode::Sections(_)) && editable && credential_ok && !has_errors(&view);
    view
}

fn render_field(
    input: &FormInput<'_>,
    schema: &FieldSchema,
    path: ConfigPath,
    editable: bool,
    pending: &mut BTreeMap<String, Vec<String>>,
) -> FieldView {
    let value = input.tree.get(&path).cloned().unwrap_or_default();
    let hint = input.template.ui_hints.get(&path);
    let reserved = path.section() == Some(CREDENTIAL_KEY);
    let disabled = reserved || input.template.ui_hints.is_disabled(&path);

    let children = schema
        .children
        .iter()
        .map(|child| render_field(input, child, path.child(child.key.clone()), editable, pending))
        .collect();
    let items = match (&schema.items, value.as_list()) {
        (Some(item_schema), Some(list)) => (0..list.len())
            .map(|i| render_field(input, item_schema, path.index(i), editable, pending))
            .collect(),
        _ => Vec::new(),
    };

    let key = path.to_string();
    FieldView {
        errors: pending.remove(&key).unwrap_or_default(),
        path: key,
        title: schema.title.clone(),
        description: schema.description.clone(),
        help: hint.and_then(|h| h.help.clone()),
        field_type: schema.field_type,
        widget: widget_for(schema, hint.and_then(|h| h.widget), reserved),
        required: schema.required,
        disabled: disabled || !editable,
        value,
        options: schema.enum_values.clone(),
        children,
        items,
    }
}

fn widget_for(schema: &FieldSchema, hinted: Option<Widget>, reserved: bool) -> Widget {
    if reserved {
        return Widget::Password;
    }
    if let Some(widget) = hinted.filter(|w| *w != Widget::Auto) {
        return widget;
    }
    match schema.field_type {
        FieldType::Boolean => Widget::Toggle,
        FieldType::Number | FieldType::Integer => Widget::Number,
        FieldType::Enum => Widget::Select,
        FieldType::Object => Widget::Group,
        FieldType::Array => Widget::List,
        FieldType::String => match schema.format.as_deref() {
            Some("color") => Widget::Color,
            Some("password") => Widget::Password,
            Some("textarea" | "markdown" | "html") => Widget::TextArea,
            _ => Widget::Text,
        },
    }
}

fn has_errors(section: &SectionView) -> bool {
    fn field_has_errors(field: &FieldView) -> bool {
        !field.errors.is_empty()
            || field.children.iter().any(field_has_errors)
            || field.items.iter().any(field_has_errors)
    }
    !section.errors.is_empty() || section.fields.iter().any(field_has_errors)
}

/// Mark sections with unsaved changes. Kept apart from [`render`] because
/// only the edit view has a persisted baseline.
pub fn mark_dirty(view: &mut FormView, store: &ConfigStore) {
    for section in &mut view.sections {
        section.dirty = store.is_dirty_section(&section.key);
    }
}

/// Apply one user edit.
///
/// Returns whether the tree changed.
///
/// # Errors
///
/// [`ChangeRejected`] when the path is malformed, targets the reserved
/// credential key, targets a disabled field, or (section mode) targets a
/// section that is not being edited. The store is untouched in every case.
pub fn route_change(
    template: &Template,
    mode: FormMode<'_>,
    store: &mut ConfigStore,
    raw_path: &str,
    value: FieldValue,
) -> Result<bool, ChangeRejected> {
    let path = ConfigPath::parse(raw_path).ok_or_else(|| ChangeRejected::Malformed {
        path: raw_path.to_owned(),
    })?;
    let Some(section) = path.section() else {
        return Err(ChangeRejected::Malformed {
            path: raw_path.to_owned(),
        });
    };
    if section == CREDENTIAL_KEY {
        return Err(ChangeRejected::Reserved {
            key: CREDENTIAL_KEY.to_owned(),
        });
    }
    if template.ui_hints.is_disabled(&path) {
        return Err(ChangeRejected::Disabled {
            path: path.to_string(),
        });
    }
    if let FormMode::Sections(controller) = mode {
        if !controller.is_editable(section) {
            debug!(%path, section, "edit to locked section ignored");
            return Err(ChangeRejected::SectionLocked {
                section: section.to_owned(),
            });
        }
    }
    Ok(store.set(&path, value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::deploy::tests::template;
    use crate::schema::{UiHint, UiHints};
    use serde_json::json;

    fn hinted_template() -> Template {
        let mut template = template();
        template.ui_hints = UiHints(BTreeMap::from([
            (
                "styling".to_owned(),
                UiHint {
                    disabled: false,
                    help: Some("Brand settings".into()),
                    widget: None,
                },
            ),
            (
                "general.title".to_owned(),
                UiHint {
                    disabled: true,
                    help: Some("Set by your administrator".into()),
                    widget: Some(Widget::TextArea),
                },
            ),
        ]));
        template
    }

    fn tree_with_documents() -> ConfigTree {
        ConfigTree::new(FieldValue::from(json!({
            "general": {"title": "Assistant"},
            "styling": {"primary_color": "#3366ff"},
            "documents": [{"title": "Intro"}, {"title": "FAQ"}]
        })))
    }

    fn wizard_input<'a>(template: &'a Template, tree: &'a ConfigTree, errors: &'a [FieldError]) -> FormInput<'a> {
        FormInput {
            template,
            tree,
            mode: FormMode::Wizard,
            errors,
            credential: Ok(()),
        }
    }

    #[test]
    fn wizard_opens_every_section() {
        let template = template();
        let tree = tree_with_documents();
        let view = render(&wizard_input(&template, &tree, &[]));
        assert!(view.sections.iter().all(|s| s.editable && s.state == SectionState::Editing));
        assert!(view.deploy_enabled);
        assert!(view.sections.iter().all(|s| !s.can_save));
    }

    #[test]
    fn fields_carry_values_widgets_and_hints() {
        let template = hinted_template();
        let tree = tree_with_documents();
        let view = render(&wizard_input(&template, &tree, &[]));

        let general = view.section("general").unwrap();
        let title = &general.fields[0];
        assert_eq!(title.path, "general.title");
        assert_eq!(title.value, FieldValue::text("Assistant"));
        assert!(title.disabled);
        assert_eq!(title.widget, Widget::TextArea);
        assert_eq!(title.help.as_deref(), Some("Set by your administrator"));

        let color = &view.section("styling").unwrap().fields[0];
        assert_eq!(color.widget, Widget::Color);
        assert!(!color.disabled);

        let documents = view.section("documents").unwrap();
        let list = &documents.fields[0];
        assert_eq!(list.path, "documents");
        assert_eq!(list.widget, Widget::List);
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[1].children[0].path, "documents[1].title");
        assert_eq!(list.items[1].children[0].value, FieldValue::text("FAQ"));

        let api_key = &view.section("api_key").unwrap().fields[0];
        assert_eq!(api_key.widget, Widget::Password);
        assert!(api_key.disabled);
    }

    #[test]
    fn errors_route_to_fields_sections_and_screen() {
        let template = template();
        let tree = tree_with_documents();
        let errors = vec![
            FieldError::new("documents[1].title", "must be a string"),
            FieldError::new("general", "\"title\" is a required property"),
            FieldError::new("", "template schema is invalid"),
            FieldError::new("unknown.path", "unexpected"),
        ];
        let view = render(&wizard_input(&template, &tree, &errors));

        let documents = view.section("documents").unwrap();
        assert_eq!(documents.fields[0].items[1].children[0].errors, vec!["must be a string"]);
        assert_eq!(view.section("general").unwrap().errors.len(), 1);
        assert!(view.section("styling").unwrap().errors.is_empty());
        assert_eq!(view.screen_errors.len(), 2);
        assert!(!view.deploy_enabled);
    }

    #[test]
    fn invalid_credential_disables_submission() {
        let template = template();
        let tree = tree_with_documents();
        let err = CredentialError::Missing;
        let mut input = wizard_input(&template, &tree, &[]);
        input.credential = Err(&err);
        let view = render(&input);
        assert!(!view.deploy_enabled);
        assert_eq!(view.credential_error.as_deref(), Some("an API key is required"));

        let mut controller = SectionEditController::new();
        controller.begin_edit("styling").unwrap();
        input.mode = FormMode::Sections(&controller);
        let view = render(&input);
        assert!(!view.section("styling").unwrap().can_save);
    }

    #[test]
    fn section_mode_locks_all_but_open_sections() {
        let template = template();
        let tree = tree_with_documents();
        let mut controller = SectionEditController::new();
        controller.begin_edit("styling").unwrap();
        let errors = vec![FieldError::new("general.title", "too short")];
        let view = render(&FormInput {
            template: &template,
            tree: &tree,
            mode: FormMode::Sections(&controller),
            errors: &errors,
            credential: Ok(()),
        });

        let styling = view.section("styling").unwrap();
        assert!(styling.editable && styling.can_save);
        let general = view.section("general").unwrap();
        assert!(!general.editable && !general.can_save);
        assert!(general.fields[0].disabled);
        assert!(!view.deploy_enabled);
    }

    #[test]
    fn route_change_guards() {
        let template = hinted_template();
        let mut store = ConfigStore::new(template.defaults());
        let initial = store.tree().clone();
        let mut controller = SectionEditController::new();

        let err = route_change(&template, FormMode::Wizard, &mut store, "styling..x", FieldValue::Null);
        assert!(matches!(err, Err(ChangeRejected::Malformed { .. })));

        let err = route_change(&template, FormMode::Wizard, &mut store, "api_key", FieldValue::text("sk-x"));
        assert!(matches!(err, Err(ChangeRejected::Reserved { .. })));

        let err = route_change(&template, FormMode::Wizard, &mut store, "general.title", FieldValue::text("x"));
        assert!(matches!(err, Err(ChangeRejected::Disabled { .. })));

        let err = route_change(
            &template,
            FormMode::Sections(&controller),
            &mut store,
            "styling.primary_color",
            FieldValue::text("#000000"),
        );
        assert_eq!(
            err,
            Err(ChangeRejected::SectionLocked {
                section: "styling".into()
            })
        );
        assert!(ConfigTree::same(&initial, store.tree()));

        controller.begin_edit("styling").unwrap();
        let changed = route_change(
            &template,
            FormMode::Sections(&controller),
            &mut store,
            "styling.primary_color",
            FieldValue::text("#000000"),
        );
        assert_eq!(changed, Ok(true));
        assert_eq!(
            store.tree().get(&ConfigPath::parse("styling.primary_color").unwrap()),
            Some(&FieldValue::text("#000000"))
        );
    }

    #[test]
    fn dirty_flags_follow_the_store() {
        let template = template();
        let mut store = ConfigStore::from_persisted(template.defaults(), &FieldValue::object());
        store.set(&ConfigPath::parse("styling.primary_color").unwrap(), FieldValue::text("#000"));
        let controller = SectionEditController::new();
        let mut view = render(&FormInput {
            template: &template,
            tree: store.tree(),
            mode: FormMode::Sections(&controller),
            errors: &[],
            credential: Ok(()),
        });
        mark_dirty(&mut view, &store);
        assert!(view.section("styling").unwrap().dirty);
        assert!(!view.section("general").unwrap().dirty);
    }
}
