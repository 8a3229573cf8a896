//! Formwork test utilities.
//!
//! Helpers for integration testing: a builder for url-encoded form
//! submissions, and small scrapers for rendered forms and cookies.

/// Header marking a request as made from script.
pub const AJAX_HEADER: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

/// Start building a form submission.
pub fn test_submission() -> TestSubmission {
    TestSubmission::default()
}

/// A form submission builder producing wire pairs.
#[derive(Debug, Clone, Default)]
pub struct TestSubmission {
    pairs: Vec<(String, String)>,
}

impl TestSubmission {
    /// Add a field value.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.pairs.push((name.to_string(), value.to_string()));
        self
    }

    /// Add the button for `action` (`action_<action>`).
    pub fn action(mut self, action: &str) -> Self {
        self.pairs
            .push((format!("action_{action}"), action.to_string()));
        self
    }

    /// Add the security token.
    pub fn token(self, value: &str) -> Self {
        self.field("SecurityID", value)
    }

    /// Mark a field as unchanged so binding skips it.
    pub fn unchanged(self, name: &str) -> Self {
        self.field(&format!("{name}_unchanged"), "1")
    }

    /// The pairs in insertion order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Encode as an `application/x-www-form-urlencoded` body.
    pub fn to_urlencoded(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish()
    }
}

/// Pull the `value` attribute of the input named `name` out of rendered HTML.
pub fn extract_hidden_value(html: &str, name: &str) -> Option<String> {
    let marker = format!("name=\"{name}\"");
    let start = html.find(&marker)?;
    let tag_end = html[start..].find('>')? + start;
    let tag = &html[start..tag_end];
    let value_start = tag.find("value=\"")? + "value=\"".len();
    let value_len = tag[value_start..].find('"')?;
    Some(tag[value_start..value_start + value_len].to_string())
}

/// Join `Set-Cookie` header values into a `Cookie` header value, dropping
/// attributes.
pub fn session_cookie<'a>(set_cookie: impl IntoIterator<Item = &'a str>) -> String {
    set_cookie
        .into_iter()
        .filter_map(|cookie| cookie.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}
