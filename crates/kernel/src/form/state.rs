//! Flash state persisted between a failed submission and the redisplay.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::submission::Submission;
use super::validation::ValidationResult;
use crate::session::SessionStorage;

/// What a form left behind for its next render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormStateRecord {
    pub data: Option<Submission>,
    pub result: Option<ValidationResult>,
}

impl FormStateRecord {
    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.result.is_none()
    }
}

/// Session key holding a form's submitted data.
pub fn data_key(form_name: &str) -> String {
    format!("FormInfo.{form_name}.data")
}

/// Session key holding a form's validation result.
pub fn result_key(form_name: &str) -> String {
    format!("FormInfo.{form_name}.result")
}

/// Storage for per-form flash state, keyed by form name.
#[async_trait]
pub trait FormStateStore: Send + Sync {
    /// Read the stored state.
    async fn load(&self, form_name: &str) -> Result<FormStateRecord>;

    /// Replace the stored state. `None` parts are removed.
    async fn save(&self, form_name: &str, record: FormStateRecord) -> Result<()>;

    /// Remove all stored state.
    async fn clear(&self, form_name: &str) -> Result<()>;

    /// Store a validation result, optionally merged into what is already there.
    async fn save_result(
        &self,
        form_name: &str,
        result: ValidationResult,
        combine_with_existing: bool,
    ) -> Result<()> {
        let mut record = self.load(form_name).await?;
        let result = match (combine_with_existing, record.result.take()) {
            (true, Some(mut existing)) => {
                existing.combine_and(result);
                existing
            }
            _ => result,
        };
        record.result = Some(result);
        self.save(form_name, record).await
    }
}

/// [`FormStateStore`] backed by the user's session.
#[derive(Clone)]
pub struct SessionFormStateStore {
    session: Arc<dyn SessionStorage>,
}

impl SessionFormStateStore {
    pub fn new(session: Arc<dyn SessionStorage>) -> Self {
        Self { session }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.session.get_value(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable form state");
                Ok(None)
            }
        }
    }

    async fn write(&self, key: &str, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => self.session.set_value(key, value).await,
            None => self.session.remove_value(key).await,
        }
    }
}

#[async_trait]
impl FormStateStore for SessionFormStateStore {
    async fn load(&self, form_name: &str) -> Result<FormStateRecord> {
        Ok(FormStateRecord {
            data: self.read(&data_key(form_name)).await?,
            result: self.read(&result_key(form_name)).await?,
        })
    }

    async fn save(&self, form_name: &str, record: FormStateRecord) -> Result<()> {
        let data = record.data.map(serde_json::to_value).transpose()?;
        let result = record.result.map(serde_json::to_value).transpose()?;
        self.write(&data_key(form_name), data).await?;
        self.write(&result_key(form_name), result).await
    }

    async fn clear(&self, form_name: &str) -> Result<()> {
        self.session.remove_value(&data_key(form_name)).await?;
        self.session.remove_value(&result_key(form_name)).await
    }
}
