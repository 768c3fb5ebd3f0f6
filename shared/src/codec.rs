//! JSON codec for command envelopes and dispatch outcomes
//!
//! Commands travel as UTF-8 JSON objects:
//! ```text
//! { "action": "<identifier>", "params": { ... } }
//! ```
//!
//! `action` is required. `params` is optional; a missing or `null` value is an
//! empty parameter set. Unknown fields are ignored.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::envelope::{validate_action, CommandEnvelope, DispatchOutcome, Params};

/// Maximum accepted payload size (256 KB)
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024;

/// Errors that can occur while decoding a payload
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload too large: {0} bytes (max: {MAX_PAYLOAD_SIZE})")]
    TooLarge(usize),

    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field `action`")]
    MissingAction,

    #[error("field `action` must be a string")]
    ActionNotString,

    #[error("invalid action name: {0:?}")]
    InvalidAction(String),

    #[error("field `params` must be an object")]
    ParamsNotObject,
}

/// Encode an envelope into its JSON wire form
pub fn encode(envelope: &CommandEnvelope) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(envelope).map(Bytes::from)
}

/// Decode a JSON payload into an envelope
pub fn decode(payload: &[u8]) -> Result<CommandEnvelope, DecodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::TooLarge(payload.len()));
    }

    let mut object = match serde_json::from_slice::<Value>(payload)? {
        Value::Object(map) => map,
        _ => return Err(DecodeError::NotAnObject),
    };

    let action = match object.remove("action") {
        Some(Value::String(action)) => action,
        Some(_) => return Err(DecodeError::ActionNotString),
        None => return Err(DecodeError::MissingAction),
    };
    validate_action(&action)?;

    let params = match object.remove("params") {
        None | Some(Value::Null) => Params::new(),
        Some(Value::Object(params)) => params,
        Some(_) => return Err(DecodeError::ParamsNotObject),
    };

    CommandEnvelope::new(action, params)
}

/// Encode a dispatch outcome for the result topic
pub fn encode_outcome(outcome: &DispatchOutcome) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(outcome).map(Bytes::from)
}

/// Decode a dispatch outcome received on a result topic
pub fn decode_outcome(payload: &[u8]) -> Result<DispatchOutcome, DecodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::TooLarge(payload.len()));
    }
    Ok(serde_json::from_slice(payload)?)
}
