//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Default maximum request body size for form posts (2 MiB).
pub const DEFAULT_MAX_FORM_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Site-wide defaults applied to every form via `Form::with_defaults`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormDefaults {
    /// Reject submissions that don't use the form's method.
    pub strict_method_check: bool,

    /// Redirect failed submissions to the form's anchor on the referring page.
    pub redirect_to_form_on_error: bool,

    /// Require the per-session security token.
    pub security_token_enabled: bool,
}

impl Default for FormDefaults {
    fn default() -> Self {
        Self {
            strict_method_check: false,
            redirect_to_form_on_error: false,
            security_token_enabled: true,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// Redis connection URL for sessions. In-memory sessions when unset.
    pub redis_url: Option<String>,

    /// Cookie SameSite policy: "strict", "lax", or "none" (default: "strict").
    pub cookie_same_site: String,

    /// Only send the session cookie over HTTPS (default: true).
    pub cookie_secure: bool,

    /// Body size limit for form submissions.
    pub max_form_body_bytes: usize,

    /// Directory with form template overrides.
    pub template_dir: Option<PathBuf>,

    pub forms: FormDefaults,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let redis_url = lookup("REDIS_URL").filter(|v| !v.trim().is_empty());

        let cookie_same_site = lookup("COOKIE_SAME_SITE")
            .unwrap_or_else(|| "strict".to_string())
            .to_lowercase();

        let cookie_secure = flag(&lookup, "COOKIE_SECURE", true)?;

        let max_form_body_bytes = match lookup("MAX_FORM_BODY_BYTES") {
            Some(value) => value
                .parse()
                .context("MAX_FORM_BODY_BYTES must be a valid byte count")?,
            None => DEFAULT_MAX_FORM_BODY_BYTES,
        };

        let template_dir = lookup("FORM_TEMPLATE_DIR").map(PathBuf::from);

        let forms = FormDefaults {
            strict_method_check: flag(&lookup, "FORM_STRICT_METHOD_CHECK", false)?,
            redirect_to_form_on_error: flag(&lookup, "FORM_REDIRECT_TO_FORM_ON_ERROR", false)?,
            security_token_enabled: flag(&lookup, "SECURITY_TOKEN_ENABLED", true)?,
        };

        Ok(Self {
            port,
            redis_url,
            cookie_same_site,
            cookie_secure,
            max_form_body_bytes,
            template_dir,
            forms,
        })
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}
