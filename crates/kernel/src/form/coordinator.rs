//! Turns an inbound request into exactly one dispatched action, or a
//! rejection the user can recover from.
//!
//! The order of checks is fixed:
//!
//! 1. method check (strict mode only)
//! 2. bind submitted data, clearing fields that were not submitted
//! 3. security token
//! 4. resolve the action and record the clicked button
//! 5. authorize against controller, form handlers, then fields
//! 6. validate, unless the action is exempt
//! 7. dispatch
//!
//! A failed validation or an expired token persists the user's input and
//! messages into the flash state and redirects back to the form.

use std::sync::Arc;

use axum::Json;
use axum::http::{Method, header};
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{debug, info, warn};

use super::action::{ActionOutcome, ActionResolver, AuthDecision};
use super::binder::{BindSource, MergePolicy};
use super::csrf::TokenCheck;
use super::definition::Form;
use super::render::FormRenderer;
use super::request::FormRequest;
use super::state::{FormStateRecord, FormStateStore};
use super::submission::Submission;
use super::validation::ValidationResult;
use crate::error::{CSRF_EXPIRED_MESSAGE, FormError};

/// A submission that got past the fatal checks.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// The handler ran; its response is passed through.
    Dispatched(Response),

    /// The submission was turned away but the user can retry. `response`
    /// is what they get (usually a redirect back to the form).
    Rejected { error: FormError, response: Response },
}

impl SubmissionOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, SubmissionOutcome::Dispatched(_))
    }
}

impl IntoResponse for SubmissionOutcome {
    fn into_response(self) -> Response {
        match self {
            SubmissionOutcome::Dispatched(response) => response,
            SubmissionOutcome::Rejected { response, .. } => response,
        }
    }
}

/// Drives a form submission through binding, protection, authorization,
/// validation and dispatch.
#[derive(Clone)]
pub struct SubmissionCoordinator {
    renderer: Arc<dyn FormRenderer>,
}

impl SubmissionCoordinator {
    pub fn new(renderer: Arc<dyn FormRenderer>) -> Self {
        Self { renderer }
    }

    pub fn renderer(&self) -> &dyn FormRenderer {
        self.renderer.as_ref()
    }

    /// Process a submission and produce the response for it, fatal errors
    /// included.
    pub async fn handle(&self, form: &mut Form, request: &FormRequest) -> Response {
        let store = request.form_state();
        match self.process(form, request, &store).await {
            Ok(outcome) => outcome.into_response(),
            Err(e) => {
                info!(form = %form.form_name(), error = %e, "form submission refused");
                e.into_response()
            }
        }
    }

    /// Process a submission.
    ///
    /// Returns `Err` for outcomes that end the request (wrong method,
    /// missing token, denied or unknown action, storage failure).
    pub async fn process(
        &self,
        form: &mut Form,
        request: &FormRequest,
        store: &dyn FormStateStore,
    ) -> Result<SubmissionOutcome, FormError> {
        let mut vars = if form.is_strict_method_check() {
            if request.method() != form.form_method() {
                return Err(FormError::MethodMismatch {
                    expected: form.form_method().clone(),
                });
            }
            if *form.form_method() == Method::GET {
                request.get_vars().clone()
            } else {
                request.post_vars().clone()
            }
        } else {
            request.request_vars()
        };

        // Bind before the token check so an expired token can flash the input
        let saveable = form.fields().saveable_names();
        form.load_data_from(
            BindSource::Mapping(&vars),
            MergePolicy::CLEAR_MISSING,
            Some(&saveable),
        )?;

        let token = form.get_security_token().clone();
        match token.check(&vars, request.session().as_ref()).await? {
            TokenCheck::Valid => {}
            TokenCheck::Missing => return Err(FormError::CsrfMissing),
            TokenCheck::Mismatch => return self.expired_token(form, request, store).await,
        }

        // Resolve and authorize the action
        let default_action = form.default_action_name();
        let resolved = ActionResolver::resolve(&mut vars, default_action.as_deref());
        if let Some(action) = &resolved {
            form.set_button_clicked(action.name.clone());
        }

        let decision = match &resolved {
            Some(action) => match ActionResolver::authorize(&action.name, form) {
                AuthDecision::Denied { action: name, component } if action.explicit => {
                    warn!(action = %name, component = %component, "action not allowed");
                    return Err(FormError::AuthorizationDenied {
                        action: name,
                        component,
                    });
                }
                AuthDecision::Denied { action: name, component } => {
                    debug!(action = %name, component = %component, "default action not allowed");
                    AuthDecision::Unresolved
                }
                decision => decision,
            },
            None => AuthDecision::Unresolved,
        };

        let result = form.validation_result();
        if !result.is_valid() {
            return self.validation_failure(form, request, store, result).await;
        }

        // Unknown actions only surface once the data validates
        let Some(handler) = decision.handler() else {
            return Err(FormError::ActionUnresolved);
        };

        store.clear(&form.form_name()).await?;

        info!(
            form = %form.form_name(),
            action = %resolved.as_ref().map(|a| a.name.as_str()).unwrap_or_default(),
            tier = decision.tier(),
            "dispatching form action"
        );

        match handler.handle(&vars, form, request).await {
            ActionOutcome::Dispatched(response) => Ok(SubmissionOutcome::Dispatched(response)),
            ActionOutcome::ValidationFailed(failed) => {
                form.load_messages_from(&failed);
                let mut combined = result;
                combined.combine_and(failed);
                self.validation_failure(form, request, store, combined).await
            }
        }
    }

    /// The submitted token didn't match: keep the input, flash an error,
    /// issue a new token and send the user back.
    async fn expired_token(
        &self,
        form: &mut Form,
        request: &FormRequest,
        store: &dyn FormStateStore,
    ) -> Result<SubmissionOutcome, FormError> {
        let form_name = form.form_name();
        let token = form.get_security_token().clone();

        store.clear(&form_name).await?;

        let mut data = form.get_data();
        data.remove(token.name());
        token.reset(request.session().as_ref()).await?;

        let mut result = ValidationResult::new();
        result.add_error(CSRF_EXPIRED_MESSAGE);
        store
            .save(
                &form_name,
                FormStateRecord {
                    data: Some(data),
                    result: Some(result),
                },
            )
            .await?;

        warn!(form = %form_name, "security token mismatch");
        Ok(SubmissionOutcome::Rejected {
            error: FormError::CsrfExpired,
            response: request.redirect_back(),
        })
    }

    async fn validation_failure(
        &self,
        form: &mut Form,
        request: &FormRequest,
        store: &dyn FormStateStore,
        result: ValidationResult,
    ) -> Result<SubmissionOutcome, FormError> {
        debug!(
            form = %form.form_name(),
            messages = result.messages().len(),
            "form validation failed"
        );

        if let Some(callback) = form.get_validation_response_callback() {
            if let Some(response) = callback(&result) {
                return Ok(rejected(result, response));
            }
        }

        if request.is_ajax() {
            let response = if request.accepts_json() {
                Json(result.messages()).into_response()
            } else {
                let html = form
                    .for_template(self.renderer.as_ref(), request)
                    .await
                    .map_err(FormError::Render)?;
                ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response()
            };
            return Ok(rejected(result, response));
        }

        let form_name = form.form_name();
        let data: Submission = form.get_data();
        store
            .save(
                &form_name,
                FormStateRecord {
                    data: Some(data),
                    result: Some(result.clone()),
                },
            )
            .await?;

        let anchored = if form.redirects_to_form_on_error() {
            request
                .redirect_referer()
                .map(|referer| format!("{referer}#{form_name}"))
        } else {
            None
        };
        let response = match anchored {
            Some(url) => Redirect::to(&url).into_response(),
            None => request.redirect_back(),
        };
        Ok(rejected(result, response))
    }
}

fn rejected(result: ValidationResult, response: Response) -> SubmissionOutcome {
    SubmissionOutcome::Rejected {
        error: FormError::ValidationFailed(result),
        response,
    }
}
