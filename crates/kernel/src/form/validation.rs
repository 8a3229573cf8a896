//! Validation results and pluggable validators.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::types::FieldList;

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Good,
    Bad,
    Warning,
}

/// How message text should be treated when displayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Html,
}

/// A single message, scoped to a field or (when `field_name` is `None`) the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationMessage {
    pub field_name: Option<String>,
    pub message: String,
    #[serde(rename = "messageType")]
    pub severity: Severity,
    #[serde(rename = "messageCast")]
    pub content_type: ContentType,
}

/// Ordered collection of validation messages plus an overall verdict.
///
/// A fresh result is valid. Adding an error (a `Bad` message) makes it
/// invalid; good and warning messages leave the verdict alone.
/// Duplicate messages are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    messages: Vec<ValidationMessage>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// Create an empty, valid result.
    pub fn new() -> Self {
        Self {
            valid: true,
            messages: Vec::new(),
        }
    }

    /// Add a form-level error.
    pub fn add_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.add_message(None, message, Severity::Bad, ContentType::Text)
    }

    /// Add an error scoped to a field.
    pub fn add_field_error(
        &mut self,
        field_name: impl Into<String>,
        message: impl Into<String>,
    ) -> &mut Self {
        self.add_message(
            Some(field_name.into()),
            message,
            Severity::Bad,
            ContentType::Text,
        )
    }

    /// Add a message with explicit scope, severity and content type.
    pub fn add_message(
        &mut self,
        field_name: Option<String>,
        message: impl Into<String>,
        severity: Severity,
        content_type: ContentType,
    ) -> &mut Self {
        if severity == Severity::Bad {
            self.valid = false;
        }
        self.messages.push(ValidationMessage {
            field_name,
            message: message.into(),
            severity,
            content_type,
        });
        self
    }

    /// Whether the result is valid.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Messages in the order they were added.
    pub fn messages(&self) -> &[ValidationMessage] {
        &self.messages
    }

    /// Messages scoped to the given field.
    pub fn field_messages<'a>(
        &'a self,
        field_name: &'a str,
    ) -> impl Iterator<Item = &'a ValidationMessage> + 'a {
        self.messages
            .iter()
            .filter(move |m| m.field_name.as_deref() == Some(field_name))
    }

    /// Fold another result into this one. Messages are concatenated and the
    /// verdict is the AND of both.
    pub fn combine_and(&mut self, other: ValidationResult) -> &mut Self {
        self.valid = self.valid && other.valid;
        self.messages.extend(other.messages);
        self
    }
}

/// A validation strategy for a form's bound fields.
pub trait Validator: Send + Sync {
    /// Validate the current field values.
    fn validate(&self, fields: &FieldList) -> ValidationResult;

    /// Drop all rules (used when a form is made read-only).
    fn remove_validation(&mut self) {}
}

/// Validator that never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _fields: &FieldList) -> ValidationResult {
        ValidationResult::new()
    }
}

/// Require a set of fields to be present and non-blank.
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    required: Vec<String>,
}

impl RequiredFields {
    /// Require the given field names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Add a required field.
    pub fn add_required_field(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// Stop requiring a field.
    pub fn remove_required_field(&mut self, name: &str) -> &mut Self {
        self.required.retain(|n| n != name);
        self
    }

    /// The configured field names.
    pub fn required(&self) -> &[String] {
        &self.required
    }
}

impl Validator for RequiredFields {
    fn validate(&self, fields: &FieldList) -> ValidationResult {
        let mut result = ValidationResult::new();

        for name in &self.required {
            let field = fields.data_field_by_name(name);
            let blank = field.is_none_or(|f| f.value().is_blank());
            if blank {
                let label = field
                    .and_then(|f| f.title.as_deref())
                    .filter(|t| !t.is_empty())
                    .unwrap_or(name);
                result.add_field_error(name.clone(), format!("\"{label}\" is required"));
            }
        }

        result
    }

    fn remove_validation(&mut self) {
        self.required.clear();
    }
}

/// Validator backed by a closure, for one-off rules.
#[derive(Clone)]
pub struct CallbackValidator {
    callback: Arc<dyn Fn(&FieldList) -> ValidationResult + Send + Sync>,
    enabled: bool,
}

impl CallbackValidator {
    /// Wrap a closure.
    pub fn new(callback: impl Fn(&FieldList) -> ValidationResult + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
            enabled: true,
        }
    }
}

impl Validator for CallbackValidator {
    fn validate(&self, fields: &FieldList) -> ValidationResult {
        if self.enabled {
            (self.callback)(fields)
        } else {
            ValidationResult::new()
        }
    }

    fn remove_validation(&mut self) {
        self.enabled = false;
    }
}

impl std::fmt::Debug for CallbackValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackValidator")
            .field("enabled", &self.enabled)
            .finish()
    }
}
