//! Error types for the edgequake-doc2json library.
//!
//! Every failure in a single extraction invocation is fatal: the pipeline
//! either returns a complete [`crate::output::DocumentTree`] or a
//! [`Doc2JsonError`]. There is no partial result.
//!
//! The four conditions a caller usually branches on are:
//!
//! * [`Doc2JsonError::UpstreamUnavailable`]: storage or the model endpoint
//!   could not be reached. Retry policy belongs to whoever wraps the call.
//! * [`Doc2JsonError::AbnormalCompletion`]: the model stopped for a reason
//!   other than `end_turn`; its text was never looked at.
//! * [`Doc2JsonError::MalformedResponse`]: the text survived the repair
//!   pass but is not a valid document. The cleaned text is attached.
//! * An empty image listing is *not* an error; see
//!   [`crate::pipeline::collect`].
//!
//! [`ErrorReport`] is the serialisable form handed to operators: a kind plus
//! the diagnostic payload, never a raw trace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2json library.
#[derive(Debug, Error)]
pub enum Doc2JsonError {
    // ── Collaborator errors ───────────────────────────────────────────────
    /// Object storage or the inference endpoint failed or timed out.
    #[error("{service} unavailable: {detail}")]
    UpstreamUnavailable { service: String, detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The model finished with a stop reason other than `end_turn`.
    #[error("Model stopped abnormally (stop reason: {stop_reason}); response discarded")]
    AbnormalCompletion { stop_reason: String },

    /// The repaired response text is not a valid document.
    #[error("Malformed model response: {reason}")]
    MalformedResponse { reason: String, cleaned_text: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The orchestration payload is missing a required field.
    #[error("Invalid stage input: {0}")]
    InvalidStageInput(String),

    // ── Provider / config errors ──────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`Doc2JsonError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UpstreamUnavailable,
    AbnormalCompletion,
    MalformedResponse,
    InvalidInput,
    Configuration,
    Internal,
}

/// Structured, user-visible description of a failed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_text: Option<String>,
}

impl Doc2JsonError {
    /// Shorthand for a storage-side [`Doc2JsonError::UpstreamUnavailable`].
    pub fn storage(detail: impl Into<String>) -> Self {
        Doc2JsonError::UpstreamUnavailable {
            service: "storage".to_string(),
            detail: detail.into(),
        }
    }

    /// Shorthand for an inference-side [`Doc2JsonError::UpstreamUnavailable`].
    pub fn inference(detail: impl Into<String>) -> Self {
        Doc2JsonError::UpstreamUnavailable {
            service: "inference".to_string(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Doc2JsonError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Doc2JsonError::AbnormalCompletion { .. } => ErrorKind::AbnormalCompletion,
            Doc2JsonError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Doc2JsonError::InvalidStageInput(_) => ErrorKind::InvalidInput,
            Doc2JsonError::ProviderNotConfigured { .. } | Doc2JsonError::InvalidConfig(_) => {
                ErrorKind::Configuration
            }
            Doc2JsonError::OutputWriteFailed { .. } | Doc2JsonError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Build the serialisable report for this error.
    pub fn report(&self) -> ErrorReport {
        let (stop_reason, cleaned_text) = match self {
            Doc2JsonError::AbnormalCompletion { stop_reason } => (Some(stop_reason.clone()), None),
            Doc2JsonError::MalformedResponse { cleaned_text, .. } => {
                (None, Some(cleaned_text.clone()))
            }
            _ => (None, None),
        };

        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            stop_reason,
            cleaned_text,
        }
    }
}
