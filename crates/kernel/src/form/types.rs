//! Form field types.

use std::sync::Arc;

use serde::Serialize;

use super::action::{AccessCheck, ActionHandler, ActionRegistry, Dispatchable};
use super::binder::DataRecord;
use super::submission::{FieldValue, Submission};
use super::validation::{ContentType, Severity};

/// Prefix that marks a submitted key as an action selector.
pub const ACTION_PREFIX: &str = "action_";

/// A message displayed next to a field (or the form itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMessage {
    pub text: String,
    pub severity: Severity,
    pub content_type: ContentType,
}

impl FieldMessage {
    /// Create a message.
    pub fn new(text: impl Into<String>, severity: Severity, content_type: ContentType) -> Self {
        Self {
            text: text.into(),
            severity,
            content_type,
        }
    }
}

/// A form field, action button or structural element.
#[derive(Debug, Clone, Serialize)]
pub struct FormField {
    /// Declared name; may use bracket notation (`contact[email]`).
    pub name: String,

    /// Field type with type-specific configuration.
    #[serde(flatten)]
    pub kind: FieldKind,

    /// Field title/label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Help text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Current value.
    value: FieldValue,

    /// Whether the default validator should require this field.
    pub required: bool,

    /// Read-only fields are displayed and restored but never saved.
    pub readonly: bool,

    /// Disabled fields are never saved.
    pub disabled: bool,

    /// Message attached for the current render.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<FieldMessage>,

    /// Child fields (fieldsets, containers).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FormField>,

    /// Handlers this field exposes to the form (`action_<name>` targets).
    #[serde(skip)]
    handlers: Option<Arc<ActionRegistry>>,

    /// Self-gating check for action buttons.
    #[serde(skip)]
    access: Option<AccessCheck>,

    /// The full submission this field was last bound from.
    #[serde(skip)]
    context: Option<Arc<Submission>>,
}

impl FormField {
    /// Create a textfield.
    pub fn textfield(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Textfield { max_length: None })
    }

    /// Create a textarea.
    pub fn textarea(name: impl Into<String>, rows: u32) -> Self {
        Self::new(name, FieldKind::Textarea { rows })
    }

    /// Create a select element.
    pub fn select(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                options,
                multiple: false,
            },
        )
    }

    /// Create a multi-select element.
    pub fn multi_select(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(
            name,
            FieldKind::Select {
                options,
                multiple: true,
            },
        )
    }

    /// Create a checkbox.
    pub fn checkbox(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Checkbox)
    }

    /// Create a checkbox group.
    pub fn checkboxes(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(name, FieldKind::Checkboxes { options })
    }

    /// Create a radio group.
    pub fn radio(name: impl Into<String>, options: Vec<(String, String)>) -> Self {
        Self::new(name, FieldKind::Radio { options })
    }

    /// Create a hidden field.
    pub fn hidden(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Hidden)
    }

    /// Create a password field.
    pub fn password(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Password)
    }

    /// Create an action button. The submitted key is `action_<action>`.
    pub fn action(action: impl AsRef<str>, title: impl Into<String>) -> Self {
        let mut field = Self::new(
            format!("{ACTION_PREFIX}{}", action.as_ref()),
            FieldKind::Action {
                validation_exempt: false,
            },
        );
        field.title = Some(title.into());
        field
    }

    /// Create a fieldset.
    pub fn fieldset(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Fieldset {
                collapsible: false,
                collapsed: false,
            },
        )
    }

    /// Create a collapsible fieldset.
    pub fn fieldset_collapsible(name: impl Into<String>, collapsed: bool) -> Self {
        Self::new(
            name,
            FieldKind::Fieldset {
                collapsible: true,
                collapsed,
            },
        )
    }

    /// Create a display-only markup element.
    pub fn markup(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Markup {
                content: content.into(),
            },
        )
    }

    /// Create a generic container.
    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Container)
    }

    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            title: None,
            description: None,
            value: FieldValue::Null,
            required: false,
            readonly: false,
            disabled: false,
            message: None,
            children: Vec::new(),
            handlers: None,
            access: None,
            context: None,
        }
    }

    /// Set the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the initial value.
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.value = value.into();
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as read-only.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Mark as disabled.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Set max length for a textfield.
    pub fn max_length(mut self, max: usize) -> Self {
        if let FieldKind::Textfield { ref mut max_length } = self.kind {
            *max_length = Some(max);
        }
        self
    }

    /// Add a child field.
    pub fn child(mut self, child: FormField) -> Self {
        self.children.push(child);
        self
    }

    /// Skip form validation when this action is submitted.
    pub fn validation_exempt(mut self) -> Self {
        if let FieldKind::Action {
            ref mut validation_exempt,
        } = self.kind
        {
            *validation_exempt = true;
        }
        self
    }

    /// Gate this action button behind a check.
    pub fn access(mut self, check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.access = Some(AccessCheck::new(check));
        self
    }

    /// Expose handlers on this field (reachable as `action_<name>`).
    pub fn with_handlers(mut self, handlers: ActionRegistry) -> Self {
        self.handlers = Some(Arc::new(handlers));
        self
    }

    /// Current value.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Replace the value without any submission context.
    pub fn set_value(&mut self, value: FieldValue) {
        self.value = value;
        self.context = None;
    }

    /// Replace the value, remembering the submission it came from so fields
    /// that depend on sibling values can read them.
    pub fn bind_value(&mut self, value: FieldValue, context: Option<Arc<Submission>>) {
        self.value = value;
        self.context = context;
    }

    /// The submission this field was last bound from.
    pub fn submission_context(&self) -> Option<&Submission> {
        self.context.as_deref()
    }

    /// Attach a message.
    pub fn set_message(
        &mut self,
        text: impl Into<String>,
        severity: Severity,
        content_type: ContentType,
    ) {
        self.message = Some(FieldMessage::new(text, severity, content_type));
    }

    /// Write this field's value into a record.
    pub fn save_into(&self, record: &mut dyn DataRecord) {
        record.set_field(&self.name, self.value.clone());
    }

    /// Whether this field groups other fields.
    pub fn is_composite(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Fieldset { .. } | FieldKind::Container
        ) || !self.children.is_empty()
    }

    /// Whether this is an action button.
    pub fn is_action(&self) -> bool {
        matches!(self.kind, FieldKind::Action { .. })
    }

    /// Whether this field carries data (participates in binding).
    pub fn is_data_field(&self) -> bool {
        !self.is_composite() && !self.is_action() && !matches!(self.kind, FieldKind::Markup { .. })
    }

    /// Whether submitted data may be saved into this field.
    pub fn is_saveable(&self) -> bool {
        self.is_data_field() && !self.readonly && !self.disabled
    }

    /// The action name of a button (`action_save` → `save`).
    pub fn action_name(&self) -> Option<&str> {
        if !self.is_action() {
            return None;
        }
        Some(self.name.strip_prefix(ACTION_PREFIX).unwrap_or(&self.name))
    }

    /// Whether this is a validation-exempt action button.
    pub fn is_validation_exempt(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Action {
                validation_exempt: true
            }
        )
    }

    /// Whether an action button lets itself be used.
    pub fn permits(&self) -> bool {
        let action = self.action_name().unwrap_or(&self.name);
        self.access.as_ref().is_none_or(|check| check.allows(action))
    }

    /// The handler this field exposes for `action`, if it allows it.
    pub(crate) fn exposed_handler(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        let handlers = self.handlers.as_ref()?;
        if handlers.has_action(action) && handlers.check_access(action) {
            handlers.handler(action)
        } else {
            None
        }
    }
}

/// Field type variants with type-specific configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// Single-line text input.
    Textfield {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },

    /// Multi-line text input.
    Textarea { rows: u32 },

    /// Dropdown select.
    Select {
        options: Vec<(String, String)>,
        multiple: bool,
    },

    /// Single checkbox.
    Checkbox,

    /// Multiple checkboxes.
    Checkboxes { options: Vec<(String, String)> },

    /// Radio button group.
    Radio { options: Vec<(String, String)> },

    /// Hidden field.
    Hidden,

    /// Password field.
    Password,

    /// Submit button selecting an action.
    Action {
        validation_exempt: bool,
    },

    /// Fieldset/group.
    Fieldset {
        collapsible: bool,
        collapsed: bool,
    },

    /// Display-only markup.
    Markup { content: String },

    /// Generic container.
    Container,
}

impl FieldKind {
    /// Get the type name as a string.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Textfield { .. } => "textfield",
            FieldKind::Textarea { .. } => "textarea",
            FieldKind::Select { .. } => "select",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Checkboxes { .. } => "checkboxes",
            FieldKind::Radio { .. } => "radio",
            FieldKind::Hidden => "hidden",
            FieldKind::Password => "password",
            FieldKind::Action { .. } => "action",
            FieldKind::Fieldset { .. } => "fieldset",
            FieldKind::Markup { .. } => "markup",
            FieldKind::Container => "container",
        }
    }
}

/// Ordered collection of fields.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct FieldList(Vec<FormField>);

impl FieldList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn push(&mut self, field: FormField) {
        self.0.push(field);
    }

    /// Append a field, builder style.
    pub fn with(mut self, field: FormField) -> Self {
        self.0.push(field);
        self
    }

    /// Top-level fields.
    pub fn iter(&self) -> impl Iterator<Item = &FormField> {
        self.0.iter()
    }

    /// Top-level fields, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut FormField> {
        self.0.iter_mut()
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First top-level field.
    pub fn first(&self) -> Option<&FormField> {
        self.0.first()
    }

    /// Top-level fields as a slice.
    pub fn as_slice(&self) -> &[FormField] {
        &self.0
    }

    /// Data fields in tree order, composites unwrapped.
    pub fn data_fields(&self) -> Vec<&FormField> {
        let mut out = Vec::new();
        collect_data(&self.0, &mut out);
        out
    }

    /// Data fields in tree order, mutably.
    pub fn data_fields_mut(&mut self) -> Vec<&mut FormField> {
        let mut out = Vec::new();
        collect_data_mut(&mut self.0, &mut out);
        out
    }

    /// Names of fields that submitted data may be written to.
    pub fn saveable_names(&self) -> Vec<String> {
        self.data_fields()
            .into_iter()
            .filter(|f| f.is_saveable())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Find a data field by name.
    pub fn data_field_by_name(&self, name: &str) -> Option<&FormField> {
        self.data_fields().into_iter().find(|f| f.name == name)
    }

    /// Find a data field by name, mutably.
    pub fn data_field_by_name_mut(&mut self, name: &str) -> Option<&mut FormField> {
        self.data_fields_mut().into_iter().find(|f| f.name == name)
    }

    /// Find any field by name, preferring data fields over structural ones.
    pub fn field_by_name(&self, name: &str) -> Option<&FormField> {
        self.data_field_by_name(name)
            .or_else(|| find_any(&self.0, &|f: &FormField| f.name == name))
    }

    /// Action buttons anywhere in the tree.
    pub fn actions(&self) -> Vec<&FormField> {
        let mut out = Vec::new();
        collect_actions(&self.0, &mut out);
        out
    }

    /// Find the first field in tree order that exposes an allowed handler
    /// for `action`. Composites are searched through their children only.
    pub fn find_field_handler(&self, action: &str) -> Option<(String, Arc<dyn ActionHandler>)> {
        find_handler(&self.0, action)
    }

    /// Mark every field in the tree read-only.
    pub fn make_readonly(&mut self) {
        fn walk(fields: &mut [FormField]) {
            for field in fields {
                field.readonly = true;
                walk(&mut field.children);
            }
        }
        walk(&mut self.0);
    }

    /// Remove every attached message.
    pub fn clear_messages(&mut self) {
        fn walk(fields: &mut [FormField]) {
            for field in fields {
                field.message = None;
                walk(&mut field.children);
            }
        }
        walk(&mut self.0);
    }
}

impl FromIterator<FormField> for FieldList {
    fn from_iter<T: IntoIterator<Item = FormField>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<FormField>> for FieldList {
    fn from(fields: Vec<FormField>) -> Self {
        Self(fields)
    }
}

fn collect_data<'a>(fields: &'a [FormField], out: &mut Vec<&'a FormField>) {
    for field in fields {
        if field.is_composite() {
            collect_data(&field.children, out);
        } else if field.is_data_field() {
            out.push(field);
        }
    }
}

fn collect_data_mut<'a>(fields: &'a mut [FormField], out: &mut Vec<&'a mut FormField>) {
    for field in fields {
        if field.is_composite() {
            collect_data_mut(&mut field.children, out);
        } else if field.is_data_field() {
            out.push(field);
        }
    }
}

fn collect_actions<'a>(fields: &'a [FormField], out: &mut Vec<&'a FormField>) {
    for field in fields {
        if field.is_action() {
            out.push(field);
        }
        collect_actions(&field.children, out);
    }
}

fn find_any<'a>(
    fields: &'a [FormField],
    predicate: &dyn Fn(&FormField) -> bool,
) -> Option<&'a FormField> {
    for field in fields {
        if predicate(field) {
            return Some(field);
        }
        if let Some(found) = find_any(&field.children, predicate) {
            return Some(found);
        }
    }
    None
}

fn find_handler(fields: &[FormField], action: &str) -> Option<(String, Arc<dyn ActionHandler>)> {
    for field in fields {
        if field.is_composite() {
            if let Some(found) = find_handler(&field.children, action) {
                return Some(found);
            }
        } else if let Some(handler) = field.exposed_handler(action) {
            return Some((field.name.clone(), handler));
        }
    }
    None
}
