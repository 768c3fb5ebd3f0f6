//! Command envelope and dispatch outcome types
//!
//! The envelope is the wire representation of one command: an action name plus
//! a loosely typed parameter bag. Parameter values are `serde_json::Value`, a sum
//! type over null, bool, number, string, array and object, so handlers can match
//! on the shape they expect.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::DecodeError;

/// A single parameter value
pub type ParamValue = serde_json::Value;

/// Parameter bag carried by a command
pub type Params = serde_json::Map<String, ParamValue>;

/// One command addressed to a device
///
/// Fields are private so an envelope can only exist with a valid action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    action: String,
    #[serde(skip_serializing_if = "Params::is_empty")]
    params: Params,
}

impl CommandEnvelope {
    /// Build an envelope, validating the action name
    pub fn new(action: impl Into<String>, params: Params) -> Result<Self, DecodeError> {
        let action = action.into();
        validate_action(&action)?;
        Ok(Self { action, params })
    }

    /// Build an envelope without parameters
    pub fn bare(action: impl Into<String>) -> Result<Self, DecodeError> {
        Self::new(action, Params::new())
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Consume the envelope, handing ownership of its parts to the caller
    pub fn into_parts(self) -> (String, Params) {
        (self.action, self.params)
    }
}

/// Actions are non-empty and identifier-like: `[A-Za-z0-9_.-]+`
pub fn validate_action(action: &str) -> Result<(), DecodeError> {
    if action.is_empty() {
        return Err(DecodeError::InvalidAction(action.to_string()));
    }
    let valid = action
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(DecodeError::InvalidAction(action.to_string()));
    }
    Ok(())
}

/// Whether a dispatched command succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Error,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Ok => write!(f, "ok"),
            OutcomeStatus::Error => write!(f, "error"),
        }
    }
}

/// Result of dispatching one envelope on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// Action name; empty when the payload could not be decoded
    pub action: String,
    pub status: OutcomeStatus,
    pub detail: String,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl DispatchOutcome {
    pub fn ok(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: OutcomeStatus::Ok,
            detail: detail.into(),
            elapsed_ms: 0,
        }
    }

    pub fn error(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            status: OutcomeStatus::Error,
            detail: detail.into(),
            elapsed_ms: 0,
        }
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}
