//! Per-session security token guarding form submissions.

use anyhow::Result;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::submission::Submission;
use crate::session::SessionStorage;

/// Name of the hidden field carrying the token, also its session key.
pub const DEFAULT_TOKEN_NAME: &str = "SecurityID";

/// Result of comparing a submission against the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// The token matched, or protection is disabled.
    Valid,

    /// The submission carried no token (or an empty one).
    Missing,

    /// A token was submitted but does not match the session.
    Mismatch,
}

/// A random value stored in the session and echoed by every form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityToken {
    name: String,
    enabled: bool,
}

impl Default for SecurityToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityToken {
    /// An enabled token under the default name.
    pub fn new() -> Self {
        Self::named(DEFAULT_TOKEN_NAME)
    }

    /// An enabled token under a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }

    /// A token that never rejects anything.
    pub fn disabled() -> Self {
        Self {
            name: DEFAULT_TOKEN_NAME.to_string(),
            enabled: false,
        }
    }

    /// Field and session key name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether submissions are checked.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The session's token, generating and storing one on first use.
    ///
    /// Returns `None` when protection is disabled.
    pub async fn value(&self, session: &dyn SessionStorage) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(existing) = self.stored(session).await? {
            return Ok(Some(existing));
        }

        let token = generate_token();
        session
            .set_value(&self.name, Value::String(token.clone()))
            .await?;
        debug!(name = %self.name, "generated security token");
        Ok(Some(token))
    }

    /// Replace the session's token with a fresh one.
    pub async fn reset(&self, session: &dyn SessionStorage) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        session
            .set_value(&self.name, Value::String(generate_token()))
            .await
    }

    /// Compare the submitted token with the session's.
    pub async fn check(
        &self,
        data: &Submission,
        session: &dyn SessionStorage,
    ) -> Result<TokenCheck> {
        if !self.enabled {
            return Ok(TokenCheck::Valid);
        }

        let submitted = data
            .get(&self.name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());
        let Some(submitted) = submitted else {
            return Ok(TokenCheck::Missing);
        };

        let Some(expected) = self.stored(session).await? else {
            return Ok(TokenCheck::Mismatch);
        };

        if bool::from(submitted.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(TokenCheck::Valid)
        } else {
            Ok(TokenCheck::Mismatch)
        }
    }

    /// Whether the submission carries the session's token.
    pub async fn verify(&self, data: &Submission, session: &dyn SessionStorage) -> Result<bool> {
        Ok(self.check(data, session).await? == TokenCheck::Valid)
    }

    async fn stored(&self, session: &dyn SessionStorage) -> Result<Option<String>> {
        Ok(session
            .get_value(&self.name)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty()))
    }
}

/// Hex-encoded SHA-256 of 32 random bytes.
fn generate_token() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    hex::encode(Sha256::digest(random_bytes))
}
