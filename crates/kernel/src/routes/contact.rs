//! Contact form: renders on GET, submits through the coordinator.
//!
//! `submit` lives on the page controller and checks the email address
//! itself. `preview` is a form-level handler that skips validation.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};

use crate::config::FormDefaults;
use crate::error::FormError;
use crate::form::{
    ActionHandler, ActionOutcome, ActionRegistry, ContentType, FieldList, Form, FormField,
    FormRequest, Severity, Submission, ValidationResult, handler_fn,
};
use crate::state::AppState;

/// Name of the page controller hosting the form.
pub const CONTROLLER_NAME: &str = "ContactPage";

/// Name of the form.
pub const FORM_NAME: &str = "ContactForm";

/// Where the form posts to.
pub const SUBMIT_PATH: &str = "/contact/ContactForm";

/// Confirmation flashed after a successful submission.
pub const THANK_YOU_MESSAGE: &str = "Thanks for your message. We'll be in touch.";

/// Build the contact form.
pub fn contact_form(defaults: &FormDefaults) -> Form {
    let controller =
        ActionRegistry::new(CONTROLLER_NAME).action("submit", SubmitMessage);

    let fields = FieldList::new()
        .with(FormField::textfield("Name").title("Name").max_length(100).required())
        .with(FormField::textfield("Email").title("Email").required())
        .with(FormField::textarea("Message", 6).title("Message"));

    let actions = FieldList::new()
        .with(FormField::action("submit", "Send"))
        .with(FormField::action("preview", "Preview").validation_exempt());

    Form::new(Arc::new(controller), FORM_NAME, fields, actions)
        .with_handlers(ActionRegistry::new(FORM_NAME).action("preview", handler_fn(preview)))
        .action_url(SUBMIT_PATH)
        .with_defaults(defaults)
}

struct SubmitMessage;

#[async_trait]
impl ActionHandler for SubmitMessage {
    async fn handle(
        &self,
        data: &Submission,
        form: &mut Form,
        request: &FormRequest,
    ) -> ActionOutcome {
        let email = data.get("Email").and_then(|v| v.as_str()).unwrap_or("");
        if !email.contains('@') {
            let mut result = ValidationResult::new();
            result.add_field_error("Email", "Please enter a valid email address");
            return ActionOutcome::ValidationFailed(result);
        }

        info!(form = %form.form_name(), "contact message received");

        let store = request.form_state();
        if let Err(e) = form
            .session_message(&store, THANK_YOU_MESSAGE, Severity::Good, ContentType::Text)
            .await
        {
            warn!(error = %e, "failed to store confirmation message");
        }
        ActionOutcome::Dispatched(Redirect::to("/contact").into_response())
    }
}

fn preview(_data: &Submission, form: &mut Form, _request: &FormRequest) -> ActionOutcome {
    ActionOutcome::Dispatched(Json(form.get_data()).into_response())
}

/// Render the contact page, restoring any flash state.
async fn show(
    State(state): State<AppState>,
    request: FormRequest,
) -> Result<Html<String>, FormError> {
    let mut form = contact_form(state.form_defaults());
    form.restore_state(&request.form_state()).await?;

    let html = form
        .for_template(state.coordinator().renderer(), &request)
        .await
        .map_err(FormError::Render)?;

    Ok(Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Contact</title></head>\n<body>\n<h1>Contact us</h1>\n{html}</body>\n</html>\n"
    )))
}

/// Handle a contact form submission.
async fn submit(State(state): State<AppState>, request: FormRequest) -> Response {
    let mut form = contact_form(state.form_defaults());
    state.coordinator().handle(&mut form, &request).await
}

/// Create the contact form router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/contact", get(show))
        .route(SUBMIT_PATH, post(submit))
}
