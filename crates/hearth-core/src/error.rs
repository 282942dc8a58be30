//! Error types shared across the hearth pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while working with event records.
#[derive(Error, Debug)]
pub enum Error {
    /// The hub envelope carried no `new_state`; such an event has no
    /// information to persist and is dropped at extraction.
    #[error("event for {entity:?} has no new_state")]
    MissingNewState {
        /// The entity id from the envelope, when present.
        entity: Option<String>,
    },

    /// The hub envelope carried no entity identifier at all.
    #[error("event envelope has no entity_id")]
    MissingEntityId,

    /// An envelope field had an unusable value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the offending field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
