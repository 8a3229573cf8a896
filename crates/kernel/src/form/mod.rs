//! Form submission and validation engine.
//!
//! A [`Form`] declares fields, action buttons, and a validator. The
//! [`SubmissionCoordinator`] takes a [`FormRequest`] through binding,
//! security-token checking, action resolution and authorization, validation
//! and dispatch. When a submission fails, the user's input and messages are
//! kept in the session ([`FormStateStore`]) and restored on the next render.

pub mod action;
pub mod binder;
pub mod coordinator;
pub mod csrf;
mod definition;
pub mod render;
pub mod request;
pub mod state;
mod submission;
mod types;
pub mod validation;

pub use action::{
    AccessCheck, ActionHandler, ActionOutcome, ActionRegistry, ActionResolver, AuthDecision,
    Dispatchable, ResolvedAction, handler_fn,
};
pub use binder::{BindSource, DataBinder, DataRecord, MergePolicy};
pub use coordinator::{SubmissionCoordinator, SubmissionOutcome};
pub use csrf::{DEFAULT_TOKEN_NAME, SecurityToken, TokenCheck};
pub use definition::{Form, ValidationResponseCallback};
pub use render::{FormRenderer, FormView, TeraFormRenderer, TokenView};
pub use request::FormRequest;
pub use state::{FormStateRecord, FormStateStore, SessionFormStateStore};
pub use submission::{FieldValue, Submission};
pub use types::{ACTION_PREFIX, FieldKind, FieldList, FieldMessage, FormField};
pub use validation::{
    CallbackValidator, ContentType, NoopValidator, RequiredFields, Severity, ValidationMessage,
    ValidationResult, Validator,
};
