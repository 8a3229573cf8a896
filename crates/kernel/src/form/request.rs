//! The request view the form engine works against.
//!
//! [`FormRequest`] is independent of axum so forms can be driven directly in
//! tests; its [`FromRequest`] impl builds one from a live request.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use tower_sessions::Session;
use tracing::{debug, warn};

use super::state::SessionFormStateStore;
use super::submission::Submission;
use crate::session::SessionStorage;

/// Header set by JavaScript clients.
const X_REQUESTED_WITH: &str = "x-requested-with";

/// Form variable carrying an explicit return address.
const BACK_URL_VAR: &str = "BackURL";

/// Body variable that lets a POST stand in for PUT, PATCH or DELETE.
pub const METHOD_OVERRIDE_VAR: &str = "_method";

/// Method, headers, variables and session of a form request.
#[derive(Clone)]
pub struct FormRequest {
    method: Method,
    headers: HeaderMap,
    query: Submission,
    body: Submission,
    session: Arc<dyn SessionStorage>,
}

impl FormRequest {
    pub fn new(method: Method, session: Arc<dyn SessionStorage>) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            query: Submission::new(),
            body: Submission::new(),
            session,
        }
    }

    /// Set query-string variables.
    pub fn with_query(mut self, query: Submission) -> Self {
        self.query = query;
        self
    }

    /// Set body variables.
    pub fn with_body(mut self, body: Submission) -> Self {
        self.body = body;
        self
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// The effective method, after any [`apply_method_override`](Self::apply_method_override).
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Honour a `_method` body variable on POST requests.
    ///
    /// Only PUT, PATCH and DELETE can be requested this way; anything else
    /// leaves the method alone.
    pub fn apply_method_override(mut self) -> Self {
        if self.method != Method::POST {
            return self;
        }
        let requested = self
            .body
            .get(METHOD_OVERRIDE_VAR)
            .and_then(|v| v.as_str())
            .map(str::to_ascii_uppercase);
        let method = match requested.as_deref() {
            Some("PUT") => Method::PUT,
            Some("PATCH") => Method::PATCH,
            Some("DELETE") => Method::DELETE,
            _ => return self,
        };
        debug!(%method, "applying form method override");
        self.method = method;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header as text.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Query-string variables.
    pub fn get_vars(&self) -> &Submission {
        &self.query
    }

    /// Body variables.
    pub fn post_vars(&self) -> &Submission {
        &self.body
    }

    /// Query and body variables merged; body wins.
    pub fn request_vars(&self) -> Submission {
        self.query.merged(&self.body)
    }

    pub fn session(&self) -> &Arc<dyn SessionStorage> {
        &self.session
    }

    /// Flash-state store over this request's session.
    pub fn form_state(&self) -> SessionFormStateStore {
        SessionFormStateStore::new(Arc::clone(&self.session))
    }

    /// Whether the request came from script rather than a page load.
    pub fn is_ajax(&self) -> bool {
        self.header(X_REQUESTED_WITH)
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
            || self.request_vars().is_set("ajax")
    }

    /// Whether the client accepts a JSON response.
    pub fn accepts_json(&self) -> bool {
        self.header(header::ACCEPT)
            .is_some_and(|v| v.contains("application/json"))
    }

    pub fn referer(&self) -> Option<&str> {
        self.header(header::REFERER).filter(|r| !r.is_empty())
    }

    pub fn host(&self) -> Option<&str> {
        self.header(header::HOST)
    }

    /// Whether `url` points back at this site.
    ///
    /// The URL is resolved the way a browser would resolve a `Location`
    /// header against `http://<Host>/` and must land on the same host and
    /// port. Values with control characters never qualify.
    pub fn is_site_url(&self, url: &str) -> bool {
        if url.is_empty() || url.chars().any(char::is_control) {
            return false;
        }
        let base = self
            .host()
            .and_then(|host| url::Url::parse(&format!("http://{host}/")).ok());
        let Some(base) = base else {
            // No usable Host to resolve against: plain paths only
            return url.starts_with('/') && !url.starts_with("//") && !url.contains('\\');
        };
        // `/\host` and `//host` resolve to another host here, as in browsers
        let Ok(resolved) = base.join(url) else {
            return false;
        };
        matches!(resolved.scheme(), "http" | "https")
            && resolved.host_str() == base.host_str()
            && resolved.port() == base.port()
    }

    /// The same-site referer with any fragment removed.
    pub fn redirect_referer(&self) -> Option<String> {
        let referer = self.referer()?;
        if !self.is_site_url(referer) {
            return None;
        }
        let without_fragment = referer.split('#').next().unwrap_or(referer);
        Some(without_fragment.to_string())
    }

    /// Where "go back" should lead: a same-site `BackURL` variable, then a
    /// same-site referer, then the site root.
    pub fn back_url(&self) -> String {
        let vars = self.request_vars();
        if let Some(back) = vars.get(BACK_URL_VAR).and_then(|v| v.as_str()) {
            if !back.is_empty() && self.is_site_url(back) {
                return back.to_string();
            }
        }
        self.redirect_referer().unwrap_or_else(|| "/".to_string())
    }

    /// A 303 redirect to [`back_url`](Self::back_url).
    pub fn redirect_back(&self) -> Response {
        Redirect::to(&self.back_url()).into_response()
    }
}

impl std::fmt::Debug for FormRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormRequest")
            .field("method", &self.method)
            .field("query", &self.query)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl<S> FromRequest<S> for FormRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let session = Session::from_request_parts(&mut parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        let method = parts.method.clone();
        let headers = parts.headers.clone();
        let query = parts
            .uri
            .query()
            .map(Submission::parse_query)
            .unwrap_or_default();

        let bytes = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(IntoResponse::into_response)?;

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let body = parse_body(content_type, &bytes)?;

        let mut request = FormRequest::new(method, Arc::new(session))
            .with_query(query)
            .with_body(body)
            .apply_method_override();
        request.headers = headers;
        Ok(request)
    }
}

fn parse_body(content_type: &str, bytes: &Bytes) -> Result<Submission, Response> {
    if bytes.is_empty() {
        return Ok(Submission::new());
    }

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            warn!(error = %e, "malformed JSON form body");
            (StatusCode::BAD_REQUEST, "malformed JSON body").into_response()
        })?;
        return Submission::from_json(&value).map_err(IntoResponse::into_response);
    }

    if content_type.starts_with("multipart/form-data") {
        debug!("multipart form bodies are not decoded");
        return Ok(Submission::new());
    }

    let text = String::from_utf8_lossy(bytes);
    Ok(Submission::parse_query(&text))
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::MemorySession;

    fn request() -> FormRequest {
        FormRequest::new(Method::POST, Arc::new(MemorySession::new()))
            .with_header("host", "example.com")
    }

    #[test]
    fn test_request_vars_body_wins() {
        let req = request()
            .with_query(Submission::parse_query("a=query&b=query"))
            .with_body(Submission::parse_query("a=body"));
        let vars = req.request_vars();
        assert_eq!(vars.get("a").unwrap().as_str(), Some("body"));
        assert_eq!(vars.get("b").unwrap().as_str(), Some("query"));
    }

    #[test]
    fn test_is_ajax() {
        assert!(!request().is_ajax());
        assert!(request().with_header("X-Requested-With", "XMLHttpRequest").is_ajax());
        assert!(request().with_query(Submission::parse_query("ajax=1")).is_ajax());
    }

    #[test]
    fn test_is_site_url() {
        let req = request();
        assert!(req.is_site_url("/contact"));
        assert!(req.is_site_url("https://example.com/contact"));
        assert!(!req.is_site_url("https://example.com:8443/contact"));
        assert!(!req.is_site_url("https://evil.test/contact"));
        assert!(!req.is_site_url("//evil.test/contact"));
        assert!(!req.is_site_url("javascript:alert(1)"));
    }

    #[test]
    fn test_is_site_url_rejects_backslash_hosts() {
        let req = request();
        assert!(!req.is_site_url("/\\evil.test/phish"));
        assert!(!req.is_site_url("\\\\evil.test/phish"));

        let hostless = FormRequest::new(Method::POST, Arc::new(MemorySession::new()));
        assert!(hostless.is_site_url("/contact"));
        assert!(!hostless.is_site_url("/\\evil.test/phish"));
    }

    #[test]
    fn test_is_site_url_rejects_control_characters() {
        let req = request();
        assert!(!req.is_site_url("/done\nSet-Cookie: x=1"));
        assert!(!req.is_site_url("/\t/evil.test"));

        let req = req.with_body(Submission::parse_query("BackURL=%2Fdone%0D%0ALocation%3A+x"));
        assert_eq!(req.back_url(), "/");
        assert_eq!(
            req.redirect_back().headers().get(header::LOCATION).unwrap(),
            "/"
        );
    }

    #[test]
    fn test_back_url_precedence() {
        let req = request().with_header("referer", "https://example.com/page#top");
        assert_eq!(req.back_url(), "https://example.com/page");

        let req = req.with_body(Submission::parse_query("BackURL=%2Fdone"));
        assert_eq!(req.back_url(), "/done");

        let offsite = request()
            .with_header("referer", "https://evil.test/")
            .with_body(Submission::parse_query("BackURL=https%3A%2F%2Fevil.test%2F"));
        assert_eq!(offsite.back_url(), "/");
    }

    #[test]
    fn test_method_override() {
        let put = request()
            .with_body(Submission::parse_query("_method=put&Title=x"))
            .apply_method_override();
        assert_eq!(put.method(), Method::PUT);

        let delete = request()
            .with_body(Submission::parse_query("_method=DELETE"))
            .apply_method_override();
        assert_eq!(delete.method(), Method::DELETE);

        // Only POST bodies can override, and only to the listed methods
        let ignored = request()
            .with_body(Submission::parse_query("_method=GET"))
            .apply_method_override();
        assert_eq!(ignored.method(), Method::POST);

        let from_query = request()
            .with_query(Submission::parse_query("_method=PUT"))
            .apply_method_override();
        assert_eq!(from_query.method(), Method::POST);

        let get = FormRequest::new(Method::GET, Arc::new(MemorySession::new()))
            .with_body(Submission::parse_query("_method=PUT"))
            .apply_method_override();
        assert_eq!(get.method(), Method::GET);
    }

    #[test]
    fn test_redirect_back_is_see_other() {
        let response = request().redirect_back();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[test]
    fn test_parse_body() {
        let form = parse_body(
            "application/x-www-form-urlencoded",
            &Bytes::from_static(b"Title=Hi&tags%5B%5D=a"),
        )
        .unwrap();
        assert_eq!(form.get("Title").unwrap().as_str(), Some("Hi"));

        let json = parse_body("application/json", &Bytes::from_static(br#"{"Title":"Hi"}"#)).unwrap();
        assert_eq!(json.get("Title").unwrap().as_str(), Some("Hi"));

        let err = parse_body("application/json", &Bytes::from_static(b"[1]")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
