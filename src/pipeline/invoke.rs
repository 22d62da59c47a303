//! Inference invocation: send the request, judge the stop reason.
//!
//! The model endpoint is a black box behind [`ModelEndpoint`]. This module
//! submits one request, waits for the complete reply (no streaming) and
//! decides whether its text may be trusted:
//!
//! * `end_turn`: normal completion; the first text segment becomes the raw
//!   text handed to the normaliser.
//! * anything else (`max_tokens`, `stop_sequence`, `content_filtered`, …):
//!   [`Doc2JsonError::AbnormalCompletion`]. The body is not parsed and the
//!   call is not retried here; retries belong to the orchestration layer.

use crate::config::ExtractionConfig;
use crate::error::Doc2JsonError;
use crate::pipeline::request::InferenceRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The only stop reason that counts as a normal completion.
pub const END_TURN: &str = "end_turn";

/// A model endpoint: `infer(request) -> response envelope`.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Human-readable endpoint name for logs and errors.
    fn name(&self) -> &str;

    /// Run one complete inference. Transport failures map to
    /// [`Doc2JsonError::UpstreamUnavailable`].
    async fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse, Doc2JsonError>;
}

// ── Response envelope ────────────────────────────────────────────────────

/// `{ "stopReason": ..., "message": { "content": [{ "text": ... }, ...] } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub stop_reason: String,
    #[serde(default)]
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
}

/// A content segment; non-text segments carry no `text`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ModelResponse {
    /// A response with a single text segment.
    pub fn text(stop_reason: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            stop_reason: stop_reason.into(),
            message: ResponseMessage {
                content: vec![ResponseBlock {
                    text: Some(text.into()),
                }],
            },
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The first segment that carries text.
    pub fn first_text(&self) -> Option<&str> {
        self.message
            .content
            .iter()
            .find_map(|block| block.text.as_deref())
    }
}

// ── Interpreted result ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    Other(String),
}

impl StopReason {
    pub fn parse(raw: &str) -> Self {
        if raw == END_TURN {
            StopReason::EndTurn
        } else {
            StopReason::Other(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => END_TURN,
            StopReason::Other(s) => s,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, StopReason::EndTurn)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trusted completion: stop reason was `end_turn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResult {
    pub stop_reason: StopReason,
    pub raw_text: String,
    pub usage: Option<TokenUsage>,
}

/// Submit `request` and interpret the reply.
///
/// Applies `config.api_timeout_secs` around the call and reports the raw
/// stop reason to the progress callback before judging it.
pub async fn invoke(
    endpoint: &dyn ModelEndpoint,
    request: &InferenceRequest,
    config: &ExtractionConfig,
) -> Result<InferenceResult, Doc2JsonError> {
    let image_count = request.images().count();
    info!("Invoking '{}' with {} images", endpoint.name(), image_count);
    if let Some(ref cb) = config.progress_callback {
        cb.on_inference_start(image_count);
    }

    let response = match config.api_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), endpoint.infer(request))
            .await
            .map_err(|_| {
                Doc2JsonError::inference(format!(
                    "no response from '{}' within {}s",
                    endpoint.name(),
                    secs
                ))
            })??,
        None => endpoint.infer(request).await?,
    };

    if let Some(ref cb) = config.progress_callback {
        let text_len = response.first_text().map_or(0, str::len);
        cb.on_inference_complete(&response.stop_reason, text_len);
    }

    interpret_response(response)
}

/// Turn a response envelope into a trusted [`InferenceResult`].
pub fn interpret_response(response: ModelResponse) -> Result<InferenceResult, Doc2JsonError> {
    let stop_reason = StopReason::parse(&response.stop_reason);
    if !stop_reason.is_normal() {
        warn!("Model stopped abnormally: {}", stop_reason);
        return Err(Doc2JsonError::AbnormalCompletion {
            stop_reason: stop_reason.as_str().to_string(),
        });
    }

    let raw_text = response
        .first_text()
        .ok_or_else(|| Doc2JsonError::MalformedResponse {
            reason: "model response contains no text segment".to_string(),
            cleaned_text: String::new(),
        })?
        .to_string();

    if let Some(usage) = response.usage {
        debug!(
            "Completion: {} input tokens, {} output tokens",
            usage.input_tokens, usage.output_tokens
        );
    }
    debug!("Raw completion: {} bytes", raw_text.len());

    Ok(InferenceResult {
        stop_reason,
        raw_text,
        usage: response.usage,
    })
}
