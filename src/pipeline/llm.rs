//! [`ModelEndpoint`] backed by an edgequake-llm provider.
//!
//! Translates an [`InferenceRequest`] into provider chat messages and the
//! provider's reply back into the response envelope:
//!
//! * system text → system message
//! * user turn   → one user message with the page images attached and the
//!   instruction block as its text
//! * prefill     → trailing assistant message the model continues from
//!
//! Providers report finish reasons in their own vocabulary (`stop`,
//! `length`, `content_filter`, …). [`normalise_finish_reason`] maps them onto
//! the envelope's (`end_turn`, `max_tokens`, `content_filtered`); unknown
//! values pass through untouched and therefore count as abnormal.

use crate::config::ExtractionConfig;
use crate::error::Doc2JsonError;
use crate::pipeline::encode::to_image_data;
use crate::pipeline::invoke::{ModelEndpoint, ModelResponse, TokenUsage, END_TURN};
use crate::pipeline::request::{ContentBlock, InferenceRequest, Role};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A model endpoint that calls an edgequake-llm [`LLMProvider`].
pub struct LlmEndpoint {
    provider: Arc<dyn LLMProvider>,
    label: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmEndpoint {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        let label = format!("{}/{}", provider.name(), provider.model());
        Self {
            provider,
            label,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// Convert the request into provider chat messages.
pub fn to_chat_messages(request: &InferenceRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.messages().len() + 1);

    if let Some(system) = request.system() {
        messages.push(ChatMessage::system(system));
    }

    for message in request.messages() {
        let mut text = String::new();
        let mut images = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::Image(asset) => images.push(to_image_data(asset)),
                ContentBlock::Text(t) => text.push_str(t),
            }
        }

        messages.push(match message.role {
            Role::User if images.is_empty() => ChatMessage::user(text),
            Role::User => ChatMessage::user_with_images(text, images),
            Role::Assistant => ChatMessage::assistant(text),
        });
    }

    messages
}

/// Map a provider finish reason onto the envelope vocabulary.
///
/// A provider that reports nothing is taken to have finished normally.
pub fn normalise_finish_reason(reason: Option<&str>) -> String {
    match reason.map(str::trim) {
        None | Some("") => END_TURN.to_string(),
        Some(r) => match r.to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "eos" => END_TURN.to_string(),
            "length" | "max_tokens" => "max_tokens".to_string(),
            "content_filter" | "safety" => "content_filtered".to_string(),
            _ => r.to_string(),
        },
    }
}

#[async_trait]
impl ModelEndpoint for LlmEndpoint {
    fn name(&self) -> &str {
        &self.label
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse, Doc2JsonError> {
        let start = Instant::now();
        let messages = to_chat_messages(request);

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| Doc2JsonError::UpstreamUnavailable {
                service: self.label.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "{}: finish_reason={:?}, {} input tokens, {} output tokens, {:?}",
            self.label,
            response.finish_reason,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        let stop_reason = normalise_finish_reason(response.finish_reason.as_deref());
        Ok(ModelResponse::text(stop_reason, response.content).with_usage(TokenUsage {
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        }))
    }
}
