//! The form: fields, actions, validator and per-form submission settings.

use std::sync::Arc;

use anyhow::Result;
use axum::http::Method;
use axum::response::Response;

use super::action::{ActionRegistry, Dispatchable};
use super::binder::{BindSource, DataBinder, DataRecord, MergePolicy};
use super::csrf::SecurityToken;
use super::render::{FormRenderer, FormView, TokenView};
use super::request::FormRequest;
use super::state::FormStateStore;
use super::submission::Submission;
use super::types::{FieldList, FieldMessage, FormField};
use super::validation::{
    ContentType, NoopValidator, RequiredFields, Severity, ValidationResult, Validator,
};
use crate::config::FormDefaults;
use crate::error::FormResult;

/// Replaces the default response when validation fails.
pub type ValidationResponseCallback =
    Arc<dyn Fn(&ValidationResult) -> Option<Response> + Send + Sync>;

/// A form hosted by a controller.
pub struct Form {
    name: String,
    controller: Arc<dyn Dispatchable>,
    fields: FieldList,
    actions: FieldList,
    handlers: ActionRegistry,
    validator: Box<dyn Validator>,
    method: Method,
    strict_method_check: bool,
    redirect_to_form_on_error: bool,
    validation_exempt_actions: Vec<String>,
    security_token: SecurityToken,
    has_default_action: bool,
    button_clicked: Option<String>,
    message: Option<FieldMessage>,
    html_id: Option<String>,
    action_url: Option<String>,
    validation_response_callback: Option<ValidationResponseCallback>,
}

impl Form {
    /// Create a form. Fields marked `required()` seed a [`RequiredFields`]
    /// validator.
    pub fn new(
        controller: Arc<dyn Dispatchable>,
        name: impl Into<String>,
        fields: FieldList,
        actions: FieldList,
    ) -> Self {
        let required: Vec<String> = fields
            .data_fields()
            .into_iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect();

        Self {
            name: name.into(),
            controller,
            fields,
            actions,
            handlers: ActionRegistry::default(),
            validator: Box::new(RequiredFields::new(required)),
            method: Method::POST,
            strict_method_check: false,
            redirect_to_form_on_error: false,
            validation_exempt_actions: Vec::new(),
            security_token: SecurityToken::new(),
            has_default_action: true,
            button_clicked: None,
            message: None,
            html_id: None,
            action_url: None,
            validation_response_callback: None,
        }
    }

    /// Register form-level action handlers.
    pub fn with_handlers(mut self, handlers: ActionRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Replace the validator.
    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Set the expected HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Only accept submissions made with the form's method, and only read
    /// variables from the matching part of the request.
    pub fn strict_method_check(mut self, strict: bool) -> Self {
        self.strict_method_check = strict;
        self
    }

    /// Redirect failed submissions to `#<form name>` on the referring page.
    pub fn redirect_to_form_on_error(mut self, enabled: bool) -> Self {
        self.redirect_to_form_on_error = enabled;
        self
    }

    /// Actions that bypass validation, whether or not a button exists.
    pub fn validation_exempt_actions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_validation_exempt_actions(names);
        self
    }

    pub fn security_token(mut self, token: SecurityToken) -> Self {
        self.security_token = token;
        self
    }

    pub fn disable_security_token(mut self) -> Self {
        self.security_token = SecurityToken::disabled();
        self
    }

    /// Don't fall back to the first action when none was submitted.
    pub fn disable_default_action(mut self) -> Self {
        self.has_default_action = false;
        self
    }

    pub fn html_id(mut self, id: impl Into<String>) -> Self {
        self.html_id = Some(id.into());
        self
    }

    /// URL the rendered form posts to.
    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn validation_response_callback(
        mut self,
        callback: impl Fn(&ValidationResult) -> Option<Response> + Send + Sync + 'static,
    ) -> Self {
        self.validation_response_callback = Some(Arc::new(callback));
        self
    }

    /// Apply site-wide defaults.
    pub fn with_defaults(mut self, defaults: &FormDefaults) -> Self {
        self.strict_method_check = defaults.strict_method_check;
        self.redirect_to_form_on_error = defaults.redirect_to_form_on_error;
        if !defaults.security_token_enabled {
            self.security_token = SecurityToken::disabled();
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity used for flash state and the redirect anchor.
    pub fn form_name(&self) -> String {
        let raw = match &self.html_id {
            Some(id) => id.clone(),
            None => format!("{}_{}", self.controller.name(), self.name),
        };
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    pub fn controller(&self) -> &dyn Dispatchable {
        self.controller.as_ref()
    }

    pub fn handlers(&self) -> &ActionRegistry {
        &self.handlers
    }

    pub fn fields(&self) -> &FieldList {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldList {
        &mut self.fields
    }

    pub fn actions(&self) -> &FieldList {
        &self.actions
    }

    pub fn form_method(&self) -> &Method {
        &self.method
    }

    /// Change the method, optionally turning on strict checking.
    pub fn set_form_method(&mut self, method: Method, strict: bool) {
        self.method = method;
        self.strict_method_check = strict;
    }

    pub fn is_strict_method_check(&self) -> bool {
        self.strict_method_check
    }

    pub fn redirects_to_form_on_error(&self) -> bool {
        self.redirect_to_form_on_error
    }

    pub fn set_validation_exempt_actions<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validation_exempt_actions = names.into_iter().map(Into::into).collect();
    }

    pub fn get_security_token(&self) -> &SecurityToken {
        &self.security_token
    }

    pub fn get_validation_response_callback(&self) -> Option<&ValidationResponseCallback> {
        self.validation_response_callback.as_ref()
    }

    /// The first action, unless the fallback is disabled.
    pub fn default_action(&self) -> Option<&FormField> {
        if !self.has_default_action {
            return None;
        }
        self.actions.actions().into_iter().next()
    }

    pub fn default_action_name(&self) -> Option<String> {
        self.default_action()
            .and_then(FormField::action_name)
            .map(str::to_string)
    }

    pub fn set_button_clicked(&mut self, action: impl Into<String>) {
        self.button_clicked = Some(action.into());
    }

    /// The button that submitted the form, if it permits itself.
    pub fn button_clicked(&self) -> Option<&FormField> {
        let name = self.button_clicked.as_deref()?;
        self.find_action(name).filter(|b| b.permits())
    }

    /// The action name recorded during submission.
    pub fn button_clicked_name(&self) -> Option<&str> {
        self.button_clicked.as_deref()
    }

    /// Find an action button by action name in fields, then actions.
    pub fn find_action(&self, action: &str) -> Option<&FormField> {
        self.fields
            .actions()
            .into_iter()
            .chain(self.actions.actions())
            .find(|f| f.action_name() == Some(action))
    }

    pub fn action_is_validation_exempt(&self, action: &str) -> bool {
        self.validation_exempt_actions.iter().any(|a| a == action)
            || self
                .find_action(action)
                .is_some_and(FormField::is_validation_exempt)
    }

    /// Validate the bound data, unless the clicked action is exempt.
    /// Messages of a failed result are attached to the fields.
    pub fn validation_result(&mut self) -> ValidationResult {
        if let Some(action) = self.button_clicked.as_deref() {
            if self.action_is_validation_exempt(action) {
                return ValidationResult::new();
            }
        }
        let result = self.validator.validate(&self.fields);
        if !result.is_valid() {
            self.load_messages_from(&result);
        }
        result
    }

    /// Attach each message to its data field. Messages for unknown fields,
    /// and form-level messages, become the form message.
    pub fn load_messages_from(&mut self, result: &ValidationResult) {
        for message in result.messages() {
            let field = message
                .field_name
                .as_deref()
                .and_then(|name| self.fields.data_field_by_name_mut(name));
            match field {
                Some(field) => field.set_message(
                    message.message.clone(),
                    message.severity,
                    message.content_type,
                ),
                None => {
                    self.message = Some(FieldMessage::new(
                        message.message.clone(),
                        message.severity,
                        message.content_type,
                    ));
                }
            }
        }
    }

    pub fn set_field_message(
        &mut self,
        name: &str,
        text: impl Into<String>,
        severity: Severity,
        content_type: ContentType,
    ) {
        match self.fields.data_field_by_name_mut(name) {
            Some(field) => field.set_message(text, severity, content_type),
            None => self.set_message(text, severity, content_type),
        }
    }

    pub fn set_message(&mut self, text: impl Into<String>, severity: Severity, content_type: ContentType) {
        self.message = Some(FieldMessage::new(text, severity, content_type));
    }

    pub fn message(&self) -> Option<&FieldMessage> {
        self.message.as_ref()
    }

    /// Drop the form message and every field message.
    pub fn clear_messages(&mut self) {
        self.message = None;
        self.fields.clear_messages();
        self.actions.clear_messages();
    }

    /// Every data field's current value.
    pub fn get_data(&self) -> Submission {
        self.fields
            .data_fields()
            .into_iter()
            .map(|f| (f.name.clone(), f.value().clone()))
            .collect()
    }

    /// Write saveable fields into `record`, optionally limited to `only`.
    pub fn save_into(&self, record: &mut dyn DataRecord, only: Option<&[String]>) {
        for field in self.fields.data_fields() {
            if !field.is_saveable() {
                continue;
            }
            if only.is_some_and(|names| !names.iter().any(|n| *n == field.name)) {
                continue;
            }
            field.save_into(record);
        }
    }

    pub fn load_data_from(
        &mut self,
        source: BindSource<'_>,
        policy: MergePolicy,
        allowed: Option<&[String]>,
    ) -> FormResult<usize> {
        DataBinder::bind(&mut self.fields, source, policy, allowed)
    }

    /// Make every field and action read-only and drop validation.
    pub fn make_readonly(&mut self) {
        self.fields.make_readonly();
        self.actions.make_readonly();
        self.remove_validator();
    }

    pub fn set_validator(&mut self, validator: Box<dyn Validator>) {
        self.validator = validator;
    }

    pub fn get_validator(&self) -> &dyn Validator {
        self.validator.as_ref()
    }

    /// Install the no-op validator.
    pub fn remove_validator(&mut self) {
        self.validator = Box::new(NoopValidator);
    }

    /// Snapshot for rendering.
    pub fn view<'a>(&'a self, form_name: &'a str, token: Option<TokenView>) -> FormView<'a> {
        FormView {
            name: form_name,
            action: self.action_url.as_deref().unwrap_or(""),
            method: if self.method == Method::GET { "get" } else { "post" },
            method_override: (self.method != Method::GET && self.method != Method::POST)
                .then_some(self.method.as_str()),
            message: self.message.as_ref(),
            fields: self.fields.as_slice(),
            actions: self.actions.as_slice(),
            token,
        }
    }

    /// Reload data and messages left behind by a failed submission.
    pub async fn restore_state(&mut self, store: &dyn FormStateStore) -> Result<()> {
        let record = store.load(&self.form_name()).await?;
        if let Some(result) = &record.result {
            self.load_messages_from(result);
        }
        if let Some(data) = &record.data {
            self.load_data_from(BindSource::Mapping(data), MergePolicy::DEFAULT, None)?;
        }
        Ok(())
    }

    pub async fn clear_form_state(&self, store: &dyn FormStateStore) -> Result<()> {
        store.clear(&self.form_name()).await
    }

    /// Clear all messages, in memory and in the flash state.
    pub async fn clear_message(&mut self, store: &dyn FormStateStore) -> Result<()> {
        self.clear_messages();
        self.clear_form_state(store).await
    }

    /// Persist a form-level message for the next render.
    pub async fn session_message(
        &self,
        store: &dyn FormStateStore,
        text: impl Into<String> + Send,
        severity: Severity,
        content_type: ContentType,
    ) -> Result<()> {
        let mut result = ValidationResult::new();
        result.add_message(None, text, severity, content_type);
        store.save_result(&self.form_name(), result, true).await
    }

    /// Persist a form-level error for the next render.
    pub async fn session_error(
        &self,
        store: &dyn FormStateStore,
        text: impl Into<String> + Send,
    ) -> Result<()> {
        self.session_message(store, text, Severity::Bad, ContentType::Text)
            .await
    }

    /// Render the form, then clear its messages and flash state so they
    /// show exactly once.
    pub async fn for_template(
        &mut self,
        renderer: &dyn FormRenderer,
        request: &FormRequest,
    ) -> Result<String> {
        let token = match self.security_token.value(request.session().as_ref()).await? {
            Some(value) => Some(TokenView {
                name: self.security_token.name().to_string(),
                value,
            }),
            None => None,
        };

        let form_name = self.form_name();
        let html = renderer.render(&self.view(&form_name, token))?;

        self.clear_messages();
        self.clear_form_state(&request.form_state()).await?;
        Ok(html)
    }
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Form")
            .field("name", &self.name)
            .field("controller", &self.controller.name())
            .field("method", &self.method)
            .field("fields", &self.fields.len())
            .field("actions", &self.actions.len())
            .field("button_clicked", &self.button_clicked)
            .finish_non_exhaustive()
    }
}
