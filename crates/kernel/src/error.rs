//! Submission error types.

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::form::ValidationResult;

/// Generic retry message shown when the security token is missing.
pub const CSRF_FAILED_MESSAGE: &str = "There seems to have been a technical problem. \
     Please click the back button, refresh your browser, and try again.";

/// Message flashed onto the form when the security token has expired.
pub const CSRF_EXPIRED_MESSAGE: &str = "Your session has expired. Please re-submit the form.";

/// Everything that can stop a submission short of dispatch.
///
/// `CsrfExpired` and `ValidationFailed` are recoverable: the coordinator
/// persists flash state and redirects. The rest end the request.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("this form requires a {expected} submission")]
    MethodMismatch { expected: Method },

    #[error("{}", CSRF_FAILED_MESSAGE)]
    CsrfMissing,

    #[error("{}", CSRF_EXPIRED_MESSAGE)]
    CsrfExpired,

    #[error("Action \"{action}\" not allowed on {component}")]
    AuthorizationDenied { action: String, component: String },

    #[error("not found")]
    ActionUnresolved,

    #[error("validation failed")]
    ValidationFailed(ValidationResult),

    #[error("cannot bind form data from a {0}")]
    BindingInputInvalid(String),

    #[error("session error")]
    Session(#[from] anyhow::Error),

    #[error("failed to render form")]
    Render(#[source] anyhow::Error),
}

impl FormError {
    /// Whether the user gets another attempt with their input restored.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FormError::CsrfExpired | FormError::ValidationFailed(_))
    }

    /// HTTP status used when this error is turned into a response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FormError::MethodMismatch { .. } => StatusCode::METHOD_NOT_ALLOWED,
            FormError::CsrfMissing => StatusCode::BAD_REQUEST,
            FormError::CsrfExpired => StatusCode::BAD_REQUEST,
            FormError::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            FormError::ActionUnresolved => StatusCode::NOT_FOUND,
            FormError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FormError::BindingInputInvalid(_) => StatusCode::BAD_REQUEST,
            FormError::Session(_) | FormError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FormError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match &self {
            FormError::Session(e) => {
                tracing::error!(error = %e, "session error during form submission");
                "internal server error".to_string()
            }
            FormError::Render(e) => {
                tracing::error!(error = %e, "form render error");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, body).into_response();
        if let FormError::MethodMismatch { expected } = &self {
            if let Ok(allow) = HeaderValue::from_str(expected.as_str()) {
                response.headers_mut().insert(header::ALLOW, allow);
            }
        }
        response
    }
}

/// Result type alias using FormError.
pub type FormResult<T> = Result<T, FormError>;
