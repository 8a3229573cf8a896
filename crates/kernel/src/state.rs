//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{Config, FormDefaults};
use crate::form::{FormRenderer, SubmissionCoordinator, TeraFormRenderer};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: SubmissionCoordinator,
}

impl AppState {
    /// Build state from configuration, loading form templates.
    pub fn new(config: &Config) -> Result<Self> {
        let renderer = match &config.template_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "loading form templates");
                TeraFormRenderer::from_dir(dir).context("failed to load form templates")?
            }
            None => TeraFormRenderer::new().context("failed to load built-in form templates")?,
        };
        let renderer: Arc<dyn FormRenderer> = Arc::new(renderer);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config: config.clone(),
                coordinator: SubmissionCoordinator::new(renderer),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn form_defaults(&self) -> &FormDefaults {
        &self.inner.config.forms
    }

    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.inner.coordinator
    }
}
