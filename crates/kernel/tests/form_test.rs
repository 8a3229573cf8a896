#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Submission pipeline tests.
//!
//! These drive `SubmissionCoordinator` directly with an in-memory session,
//! covering token handling, binding, action resolution and authorization,
//! validation and flash-state persistence.

use std::sync::Arc;

use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use formwork_kernel::error::{CSRF_EXPIRED_MESSAGE, FormError};
use formwork_kernel::form::{
    ActionHandler, ActionOutcome, ActionRegistry, FieldList, FieldValue, Form, FormField,
    FormRequest, FormStateStore, SecurityToken, SessionFormStateStore, Submission,
    SubmissionCoordinator, SubmissionOutcome, TeraFormRenderer, ValidationResult, handler_fn,
};
use formwork_kernel::session::{MemorySession, SessionStorage};
use formwork_test_utils::{AJAX_HEADER, TestSubmission, test_submission};
use http_body_util::BodyExt;
use serde_json::Value;

const FORM_NAME: &str = "PageController_TestForm";

fn reply(label: &'static str) -> impl ActionHandler {
    handler_fn(move |_, _, _| ActionOutcome::Dispatched(label.into_response()))
}

fn coordinator() -> SubmissionCoordinator {
    SubmissionCoordinator::new(Arc::new(TeraFormRenderer::new().unwrap()))
}

/// Form with a required `Title`, a `Body`, and a `Files` field that exposes
/// a `save` handler of its own.
fn test_form(controller: ActionRegistry, handlers: ActionRegistry) -> Form {
    Form::new(
        Arc::new(controller),
        "TestForm",
        FieldList::new()
            .with(FormField::textfield("Title").required())
            .with(FormField::textfield("Body"))
            .with(
                FormField::fieldset("Attachments").child(
                    FormField::textfield("Files")
                        .with_handlers(ActionRegistry::new("Files").action("save", reply("field"))),
                ),
            ),
        FieldList::new()
            .with(FormField::action("submit", "Submit"))
            .with(FormField::action("cancel", "Cancel").validation_exempt()),
    )
    .with_handlers(handlers)
}

fn default_form() -> Form {
    test_form(
        ActionRegistry::new("PageController").action("submit", reply("submitted")),
        ActionRegistry::new("TestForm").action("cancel", reply("cancelled")),
    )
}

fn request(session: &MemorySession, method: Method, submission: &TestSubmission) -> FormRequest {
    let vars = Submission::from_pairs(submission.pairs().iter().cloned());
    let request = FormRequest::new(method.clone(), Arc::new(session.clone()))
        .with_header("host", "example.com")
        .with_header("referer", "https://example.com/page#top");
    if method == Method::GET {
        request.with_query(vars)
    } else {
        request.with_body(vars)
    }
}

async fn token(session: &MemorySession) -> String {
    SecurityToken::new().value(session).await.unwrap().unwrap()
}

async fn post_with_token(session: &MemorySession, submission: TestSubmission) -> FormRequest {
    let submission = submission.token(&token(session).await);
    request(session, Method::POST, &submission)
}

fn store(session: &MemorySession) -> SessionFormStateStore {
    SessionFormStateStore::new(Arc::new(session.clone()))
}

async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

// =============================================================================
// Security token
// =============================================================================

#[tokio::test]
async fn missing_token_is_bad_request_without_flash() {
    let session = MemorySession::new();
    token(&session).await;
    let mut form = default_form();
    let req = request(
        &session,
        Method::POST,
        &test_submission().field("Title", "Hello").action("submit"),
    );

    let err = coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap_err();
    assert!(matches!(err, FormError::CsrfMissing));

    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(session.keys(), vec!["SecurityID"]);
}

#[tokio::test]
async fn empty_token_counts_as_missing() {
    let session = MemorySession::new();
    token(&session).await;
    let req = request(
        &session,
        Method::POST,
        &test_submission().field("Title", "Hello").token(""),
    );
    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mismatched_token_flashes_input_and_regenerates_token() {
    let session = MemorySession::new();
    let old_token = token(&session).await;
    let mut form = default_form();
    let req = request(
        &session,
        Method::POST,
        &test_submission()
            .field("Title", "Draft")
            .action("submit")
            .token("not-the-token"),
    );

    let outcome = coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();
    let SubmissionOutcome::Rejected { error, response } = outcome else {
        panic!("expected rejection");
    };
    assert!(matches!(error, FormError::CsrfExpired));
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://example.com/page");

    let state = store(&session).load(FORM_NAME).await.unwrap();
    let data = state.data.unwrap();
    assert_eq!(data.get("Title"), Some(&FieldValue::text("Draft")));
    assert!(!data.contains_key("SecurityID"));
    let result = state.result.unwrap();
    assert!(!result.is_valid());
    assert_eq!(result.messages()[0].message, CSRF_EXPIRED_MESSAGE);

    assert_ne!(token(&session).await, old_token);
}

#[tokio::test]
async fn disabled_token_skips_check() {
    let session = MemorySession::new();
    let mut form = default_form().disable_security_token();
    let req = request(
        &session,
        Method::POST,
        &test_submission().field("Title", "Hello").action("submit"),
    );
    let outcome = coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();
    assert!(outcome.is_dispatched());
}

// =============================================================================
// Method checking
// =============================================================================

#[tokio::test]
async fn strict_method_check_rejects_wrong_method() {
    let session = MemorySession::new();
    let submission = test_submission()
        .field("Title", "Hello")
        .action("submit")
        .token(&token(&session).await);
    let req = request(&session, Method::GET, &submission);

    let mut form = default_form().strict_method_check(true);
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "POST");

    // Lenient mode reads the same variables from the query string.
    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "submitted");
}

#[tokio::test]
async fn strict_method_check_ignores_query_vars_on_post() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().action("submit"))
        .await
        .with_query(Submission::from_pairs([("Title", "from query")]));

    let mut form = default_form().strict_method_check(true);
    let outcome = coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SubmissionOutcome::Rejected {
            error: FormError::ValidationFailed(_),
            ..
        }
    ));
}

#[tokio::test]
async fn strict_put_form_accepts_method_override() {
    let session = MemorySession::new();
    let renderer = TeraFormRenderer::new().unwrap();
    let get = request(&session, Method::GET, &test_submission());
    let html = default_form()
        .method(Method::PUT)
        .for_template(&renderer, &get)
        .await
        .unwrap();
    assert!(html.contains(r#"method="post""#));
    assert!(html.contains(r#"name="_method" value="PUT""#));

    let overridden = post_with_token(
        &session,
        test_submission()
            .field("Title", "Hello")
            .field("_method", "PUT")
            .action("submit"),
    )
    .await
    .apply_method_override();
    let mut form = default_form().method(Method::PUT).strict_method_check(true);
    let response = coordinator().handle(&mut form, &overridden).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "submitted");

    let plain_post = post_with_token(
        &session,
        test_submission().field("Title", "Hello").action("submit"),
    )
    .await
    .apply_method_override();
    let mut form = default_form().method(Method::PUT).strict_method_check(true);
    let response = coordinator().handle(&mut form, &plain_post).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get(header::ALLOW).unwrap(), "PUT");
}

// =============================================================================
// Binding
// =============================================================================

#[tokio::test]
async fn submission_clears_fields_that_were_not_sent() {
    let session = MemorySession::new();
    let mut form = default_form();
    form.fields_mut()
        .data_field_by_name_mut("Body")
        .unwrap()
        .set_value(FieldValue::text("stale"));

    let req = post_with_token(
        &session,
        test_submission().field("Title", "Hello").action("submit"),
    )
    .await;
    coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();

    assert_eq!(
        form.fields().data_field_by_name("Body").unwrap().value(),
        &FieldValue::Null
    );
    assert_eq!(
        form.fields().data_field_by_name("Title").unwrap().value(),
        &FieldValue::text("Hello")
    );
}

#[tokio::test]
async fn readonly_fields_are_not_bound_from_requests() {
    let session = MemorySession::new();
    let mut form = Form::new(
        Arc::new(ActionRegistry::new("PageController").action("submit", reply("ok"))),
        "TestForm",
        FieldList::new()
            .with(FormField::textfield("Title"))
            .with(FormField::hidden("ID").readonly().default_value("7")),
        FieldList::new().with(FormField::action("submit", "Submit")),
    );
    let req = post_with_token(
        &session,
        test_submission().field("Title", "t").field("ID", "999").action("submit"),
    )
    .await;
    coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();
    assert_eq!(
        form.fields().data_field_by_name("ID").unwrap().value(),
        &FieldValue::text("7")
    );
}

// =============================================================================
// Action resolution and authorization
// =============================================================================

async fn dispatch(form: &mut Form, action: &str) -> Result<String, FormError> {
    let session = MemorySession::new();
    let req = post_with_token(
        &session,
        test_submission().field("Title", "Hello").action(action),
    )
    .await;
    match coordinator().process(form, &req, &store(&session)).await? {
        SubmissionOutcome::Dispatched(response) => Ok(body_text(response).await),
        SubmissionOutcome::Rejected { error, .. } => Err(error),
    }
}

#[tokio::test]
async fn controller_handler_wins() {
    let mut form = test_form(
        ActionRegistry::new("PageController").action("save", reply("controller")),
        ActionRegistry::new("TestForm").action("save", reply("form")),
    );
    assert_eq!(dispatch(&mut form, "save").await.unwrap(), "controller");
}

#[tokio::test]
async fn form_handler_used_when_controller_lacks_action() {
    let mut form = test_form(
        ActionRegistry::new("PageController"),
        ActionRegistry::new("TestForm").action("save", reply("form")),
    );
    assert_eq!(dispatch(&mut form, "save").await.unwrap(), "form");
}

#[tokio::test]
async fn field_handler_used_when_neither_has_action() {
    let mut form = test_form(ActionRegistry::new("PageController"), ActionRegistry::new("TestForm"));
    assert_eq!(dispatch(&mut form, "save").await.unwrap(), "field");
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let mut form = default_form();
    let err = dispatch(&mut form, "archive").await.unwrap_err();
    assert!(matches!(err, FormError::ActionUnresolved));
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn denied_controller_action_is_forbidden() {
    let mut form = test_form(
        ActionRegistry::new("PageController").guarded_action("delete", |_| false, reply("deleted")),
        ActionRegistry::new("TestForm"),
    );
    let err = dispatch(&mut form, "delete").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Action \"delete\" not allowed on controller (Class: PageController)"
    );
    assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn button_lets_guarded_controller_action_through() {
    let mut form = test_form(
        ActionRegistry::new("PageController").guarded_action("submit", |_| false, reply("submitted")),
        ActionRegistry::new("TestForm"),
    );
    assert_eq!(dispatch(&mut form, "submit").await.unwrap(), "submitted");
}

#[tokio::test]
async fn default_action_used_when_no_button_sent() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "Hello")).await;

    let mut form = default_form();
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(body_text(response).await, "submitted");
    assert_eq!(form.button_clicked().unwrap().name, "action_submit");

    let mut form = default_form().disable_default_action();
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn denied_default_action_is_not_found() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "Hello")).await;
    let mut form = test_form(
        ActionRegistry::new("PageController"),
        ActionRegistry::new("TestForm").guarded_action("submit", |_| false, reply("submitted")),
    );
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn embedded_query_reaches_the_handler() {
    let session = MemorySession::new();
    let submission = test_submission()
        .field("Title", "Hello")
        .field("action_submit?step=2", "Submit")
        .token(&token(&session).await);
    let req = request(&session, Method::POST, &submission);

    let mut form = test_form(
        ActionRegistry::new("PageController").action(
            "submit",
            handler_fn(|data: &Submission, _: &mut Form, _: &FormRequest| {
                let step = data.get("step").and_then(|v| v.as_str()).unwrap_or("none");
                ActionOutcome::Dispatched(format!("step {step}").into_response())
            }),
        ),
        ActionRegistry::new("TestForm"),
    );
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(body_text(response).await, "step 2");
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn exempt_action_skips_validation() {
    let mut form = default_form();
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("cancel")).await;
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(body_text(response).await, "cancelled");
}

#[tokio::test]
async fn exemption_by_name_without_button() {
    let mut form = test_form(
        ActionRegistry::new("PageController").action("autosave", reply("autosaved")),
        ActionRegistry::new("TestForm"),
    )
    .validation_exempt_actions(["autosave"]);
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().action("autosave")).await;
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(body_text(response).await, "autosaved");
}

#[tokio::test]
async fn failed_validation_redirects_and_flashes_once() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("submit")).await;

    let mut form = default_form();
    let outcome = coordinator()
        .process(&mut form, &req, &store(&session))
        .await
        .unwrap();
    let SubmissionOutcome::Rejected { error, response } = outcome else {
        panic!("expected rejection");
    };
    let FormError::ValidationFailed(result) = error else {
        panic!("expected validation failure");
    };
    assert_eq!(result.messages()[0].field_name.as_deref(), Some("Title"));
    assert_eq!(result.messages()[0].message, "\"Title\" is required");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://example.com/page");

    let state = store(&session).load(FORM_NAME).await.unwrap();
    assert_eq!(state.data.unwrap().get("Title"), Some(&FieldValue::text("")));
    assert!(!state.result.unwrap().is_valid());

    // Redisplay shows the error once, then forgets it.
    let renderer = TeraFormRenderer::new().unwrap();
    let get = request(&session, Method::GET, &test_submission());
    let mut redisplay = default_form();
    redisplay.restore_state(&store(&session)).await.unwrap();
    let html = redisplay.for_template(&renderer, &get).await.unwrap();
    assert!(html.contains("&quot;Title&quot; is required"));
    assert!(store(&session).load(FORM_NAME).await.unwrap().is_empty());

    let mut again = default_form();
    again.restore_state(&store(&session)).await.unwrap();
    let html = again.for_template(&renderer, &get).await.unwrap();
    assert!(!html.contains("is required"));
}

#[tokio::test]
async fn redirect_to_form_anchor() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("submit")).await;
    let mut form = default_form().redirect_to_form_on_error(true);
    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(
        location(&response),
        "https://example.com/page#PageController_TestForm"
    );
}

#[tokio::test]
async fn handler_validation_failure_is_combined() {
    let session = MemorySession::new();
    let req = post_with_token(
        &session,
        test_submission().field("Title", "Hello").field("Body", "x").action("submit"),
    )
    .await;
    let mut form = test_form(
        ActionRegistry::new("PageController").action(
            "submit",
            handler_fn(|_: &Submission, _: &mut Form, _: &FormRequest| {
                let mut result = ValidationResult::new();
                result.add_field_error("Body", "Body is too short");
                ActionOutcome::ValidationFailed(result)
            }),
        ),
        ActionRegistry::new("TestForm"),
    );

    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        form.fields().data_field_by_name("Body").unwrap().message.as_ref().unwrap().text,
        "Body is too short"
    );
    let state = store(&session).load(FORM_NAME).await.unwrap();
    assert_eq!(state.result.unwrap().messages()[0].message, "Body is too short");
    assert_eq!(state.data.unwrap().get("Body"), Some(&FieldValue::text("x")));
}

#[tokio::test]
async fn ajax_json_failure() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("submit"))
        .await
        .with_header(AJAX_HEADER.0, AJAX_HEADER.1)
        .with_header("accept", "application/json");

    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body[0]["fieldName"], "Title");
    assert_eq!(body[0]["messageType"], "bad");
    assert!(store(&session).load(FORM_NAME).await.unwrap().is_empty());
}

#[tokio::test]
async fn ajax_html_failure() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("submit"))
        .await
        .with_header(AJAX_HEADER.0, AJAX_HEADER.1);

    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let html = body_text(response).await;
    assert!(html.contains("&quot;Title&quot; is required"));
}

#[tokio::test]
async fn validation_response_callback_replaces_default() {
    let session = MemorySession::new();
    let req = post_with_token(&session, test_submission().field("Title", "").action("submit")).await;
    let mut form = default_form().validation_response_callback(|result| {
        Some((StatusCode::UNPROCESSABLE_ENTITY, format!("{} errors", result.messages().len())).into_response())
    });

    let response = coordinator().handle(&mut form, &req).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_text(response).await, "1 errors");
    assert!(store(&session).load(FORM_NAME).await.unwrap().is_empty());
}

#[tokio::test]
async fn successful_dispatch_clears_stale_flash() {
    let session = MemorySession::new();
    let form = default_form();
    form.session_error(&store(&session), "old problem").await.unwrap();
    assert!(session.get_value("FormInfo.PageController_TestForm.result").await.unwrap().is_some());

    let req = post_with_token(&session, test_submission().field("Title", "Hello").action("submit")).await;
    let response = coordinator().handle(&mut default_form(), &req).await;
    assert_eq!(body_text(response).await, "submitted");
    assert!(store(&session).load(FORM_NAME).await.unwrap().is_empty());
}
