//! Action handlers, registries, and action resolution.
//!
//! Anything that can receive a submission implements [`Dispatchable`]: it
//! answers "do you have an action called X", "may X be called", and hands
//! out the handler. [`ActionRegistry`] is the standard implementation, used
//! for controllers, for form-level handlers, and for handlers exposed by
//! individual fields.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use tracing::debug;

use super::definition::Form;
use super::request::FormRequest;
use super::submission::Submission;
use super::types::ACTION_PREFIX;
use super::validation::ValidationResult;

/// What a handler produced.
#[derive(Debug)]
pub enum ActionOutcome {
    /// The handler's response, passed through unchanged.
    Dispatched(Response),

    /// Action-specific validation failed; handled like a validator failure.
    ValidationFailed(ValidationResult),
}

/// A target for a submitted action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handle the bound submission.
    async fn handle(
        &self,
        data: &Submission,
        form: &mut Form,
        request: &FormRequest,
    ) -> ActionOutcome;
}

/// Adapter turning a plain function into an [`ActionHandler`].
pub struct FnHandler<F>(F);

/// Wrap a synchronous function as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Submission, &mut Form, &FormRequest) -> ActionOutcome + Send + Sync + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&Submission, &mut Form, &FormRequest) -> ActionOutcome + Send + Sync + 'static,
{
    async fn handle(
        &self,
        data: &Submission,
        form: &mut Form,
        request: &FormRequest,
    ) -> ActionOutcome {
        (self.0)(data, form, request)
    }
}

/// Predicate deciding whether an action may be invoked.
#[derive(Clone)]
pub struct AccessCheck(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl AccessCheck {
    /// Wrap a predicate.
    pub fn new(check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// Evaluate for `action`.
    pub fn allows(&self, action: &str) -> bool {
        (self.0)(action)
    }
}

impl std::fmt::Debug for AccessCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessCheck")
    }
}

/// Something that can serve as an action target.
pub trait Dispatchable: Send + Sync {
    /// Name used in form identity and error messages.
    fn name(&self) -> &str;

    /// Whether an action of this name exists.
    fn has_action(&self, action: &str) -> bool;

    /// Whether the action may be invoked.
    fn check_access(&self, action: &str) -> bool;

    /// The handler for the action.
    fn handler(&self, action: &str) -> Option<Arc<dyn ActionHandler>>;
}

#[derive(Clone)]
struct RegisteredAction {
    name: String,
    handler: Arc<dyn ActionHandler>,
    access: Option<AccessCheck>,
}

/// Explicit mapping from action names to handlers and access checks.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    name: String,
    actions: Vec<RegisteredAction>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Register an action anyone may invoke.
    pub fn action(mut self, name: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.register(name.into(), Arc::new(handler), None);
        self
    }

    /// Register an action gated by `access`.
    pub fn guarded_action(
        mut self,
        name: impl Into<String>,
        access: impl Fn(&str) -> bool + Send + Sync + 'static,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        self.register(name.into(), Arc::new(handler), Some(AccessCheck::new(access)));
        self
    }

    /// Registered action names, in registration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn register(&mut self, name: String, handler: Arc<dyn ActionHandler>, access: Option<AccessCheck>) {
        self.actions.retain(|a| a.name != name);
        self.actions.push(RegisteredAction {
            name,
            handler,
            access,
        });
    }

    fn find(&self, action: &str) -> Option<&RegisteredAction> {
        self.actions.iter().find(|a| a.name == action)
    }
}

impl Dispatchable for ActionRegistry {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_action(&self, action: &str) -> bool {
        self.find(action).is_some()
    }

    fn check_access(&self, action: &str) -> bool {
        self.find(action)
            .is_some_and(|a| a.access.as_ref().is_none_or(|check| check.allows(action)))
    }

    fn handler(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.find(action).map(|a| Arc::clone(&a.handler))
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("name", &self.name)
            .field("actions", &self.action_names().collect::<Vec<_>>())
            .finish()
    }
}

/// The action a submission selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    pub name: String,

    /// False when the name came from the form's default action.
    pub explicit: bool,
}

/// Outcome of authorizing an action.
#[derive(Clone)]
pub enum AuthDecision {
    /// Handled by the hosting controller.
    Controller(Arc<dyn ActionHandler>),

    /// Handled by a form-level handler.
    Form(Arc<dyn ActionHandler>),

    /// Handled by a handler a field exposes.
    Field {
        field: String,
        handler: Arc<dyn ActionHandler>,
    },

    /// A target exists but refused.
    Denied { action: String, component: String },

    /// Nothing handles this action.
    Unresolved,
}

impl AuthDecision {
    /// The handler to dispatch to, if any.
    pub fn handler(&self) -> Option<Arc<dyn ActionHandler>> {
        match self {
            AuthDecision::Controller(h) | AuthDecision::Form(h) => Some(Arc::clone(h)),
            AuthDecision::Field { handler, .. } => Some(Arc::clone(handler)),
            AuthDecision::Denied { .. } | AuthDecision::Unresolved => None,
        }
    }

    /// Short label for logging.
    pub fn tier(&self) -> &'static str {
        match self {
            AuthDecision::Controller(_) => "controller",
            AuthDecision::Form(_) => "form",
            AuthDecision::Field { .. } => "field",
            AuthDecision::Denied { .. } => "denied",
            AuthDecision::Unresolved => "unresolved",
        }
    }
}

impl std::fmt::Debug for AuthDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthDecision::Field { field, .. } => {
                f.debug_struct("Field").field("field", field).finish()
            }
            AuthDecision::Denied { action, component } => f
                .debug_struct("Denied")
                .field("action", action)
                .field("component", component)
                .finish(),
            other => f.write_str(other.tier()),
        }
    }
}

/// Works out which action a submission invoked and who may handle it.
pub struct ActionResolver;

impl ActionResolver {
    /// Extract the action name from the first `action_*` key.
    ///
    /// An embedded query string (`action_save?step=2`) is merged into `vars`.
    /// Image-button coordinate suffixes (`_x`, `_y`) are stripped.
    pub fn resolve_action_name(vars: &mut Submission) -> Option<String> {
        let key = vars
            .keys()
            .find(|k| k.starts_with(ACTION_PREFIX))?
            .to_string();

        let name = match key.split_once('?') {
            Some((name, query)) => {
                vars.merge(Submission::parse_query(query));
                name.to_string()
            }
            None => key,
        };

        let name = name.strip_prefix(ACTION_PREFIX).unwrap_or(&name);
        let name = name
            .strip_suffix("_x")
            .or_else(|| name.strip_suffix("_y"))
            .unwrap_or(name);
        Some(name.to_string())
    }

    /// Resolve the action, falling back to the form's default action.
    pub fn resolve(vars: &mut Submission, default_action: Option<&str>) -> Option<ResolvedAction> {
        if let Some(name) = Self::resolve_action_name(vars) {
            return Some(ResolvedAction {
                name,
                explicit: true,
            });
        }
        default_action.map(|name| ResolvedAction {
            name: name.to_string(),
            explicit: false,
        })
    }

    /// Decide who handles `action` on `form`.
    ///
    /// 1. The controller, if it has the action and either allows it or the
    ///    form carries a button of that name.
    /// 2. Form-level handlers, if they allow it. There is no button fallback.
    /// 3. The first field in tree order exposing an allowed handler.
    pub fn authorize(action: &str, form: &Form) -> AuthDecision {
        // Controller: a visible button also grants access
        let controller = form.controller();
        if controller.has_action(action) {
            if controller.check_access(action) || form.find_action(action).is_some() {
                return match controller.handler(action) {
                    Some(handler) => AuthDecision::Controller(handler),
                    None => AuthDecision::Unresolved,
                };
            }
            return AuthDecision::Denied {
                action: action.to_string(),
                component: format!("controller (Class: {})", controller.name()),
            };
        }

        // Form handlers: no button fallback
        let handlers = form.handlers();
        if handlers.has_action(action) {
            if !handlers.check_access(action) {
                return AuthDecision::Denied {
                    action: action.to_string(),
                    component: format!("form (Name: \"{}\")", form.name()),
                };
            }
            return match handlers.handler(action) {
                Some(handler) => AuthDecision::Form(handler),
                None => AuthDecision::Unresolved,
            };
        }

        // First field in tree order that exposes the action
        if let Some((field, handler)) = form.fields().find_field_handler(action) {
            debug!(action = %action, field = %field, "action handled by field");
            return AuthDecision::Field { field, handler };
        }

        AuthDecision::Unresolved
    }
}
