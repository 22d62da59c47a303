//! Prompt building: turn the collected images into one multi-modal request.
//!
//! ## Message Layout
//!
//! 1. **System** *(optional)*: `ExtractionConfig::system_prompt`
//! 2. **User**: every page image in collection order, then the fixed
//!    instruction block from [`crate::prompts::EXTRACTION_INSTRUCTIONS`]
//! 3. **Assistant** *(optional)*: the response prefill; the model continues
//!    its reply from this text
//!
//! The request serialises to the model-inference wire shape
//! `{ "system"?, "messages": [{ "role", "content": [image | text, …] }] }`
//! with images as `{"image": {"format", "source": {"bytes": <base64>}}}`.

use crate::config::ExtractionConfig;
use crate::pipeline::collect::{ImageAsset, ImageFormat};
use crate::pipeline::encode::encode_base64;
use crate::prompts::EXTRACTION_INSTRUCTIONS;
use serde::ser::{Serialize, Serializer};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One element of a message's content list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentBlock {
    Image(ImageAsset),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

/// A fully assembled request. Built once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InferenceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

impl InferenceRequest {
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Images of the user turn, in page order.
    pub fn images(&self) -> impl Iterator<Item = &ImageAsset> {
        self.user_content().filter_map(|block| match block {
            ContentBlock::Image(img) => Some(img),
            ContentBlock::Text(_) => None,
        })
    }

    /// Text of the user turn (the instruction block).
    pub fn instruction(&self) -> &str {
        self.user_content()
            .find_map(|block| match block {
                ContentBlock::Text(t) => Some(t.as_str()),
                ContentBlock::Image(_) => None,
            })
            .unwrap_or_default()
    }

    /// The response-priming fragment, if any.
    pub fn prefill(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.content.first())
            .and_then(|block| match block {
                ContentBlock::Text(t) => Some(t.as_str()),
                ContentBlock::Image(_) => None,
            })
    }

    fn user_content(&self) -> impl Iterator<Item = &ContentBlock> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| m.content.iter())
    }
}

/// Assemble the request for `images` using the prompt settings in `config`.
///
/// An empty `images` vector still yields a valid request: the user turn then
/// holds only the instruction block.
pub fn build_request(images: Vec<ImageAsset>, config: &ExtractionConfig) -> InferenceRequest {
    let image_count = images.len();

    let mut content: Vec<ContentBlock> = images.into_iter().map(ContentBlock::Image).collect();
    content.push(ContentBlock::Text(EXTRACTION_INSTRUCTIONS.to_string()));

    let mut messages = vec![Message {
        role: Role::User,
        content,
    }];

    if let Some(prefill) = config.prefill.as_deref() {
        messages.push(Message {
            role: Role::Assistant,
            content: vec![ContentBlock::Text(prefill.to_string())],
        });
    }

    debug!(
        "Built request: {} images, prefill={}, system={}",
        image_count,
        config.prefill.is_some(),
        config.system_prompt.is_some()
    );

    InferenceRequest {
        system: config.system_prompt.clone(),
        messages,
    }
}

// ── Wire serialisation ───────────────────────────────────────────────────

#[derive(serde::Serialize)]
#[serde(rename_all = "lowercase")]
enum WireBlock<'a> {
    Image {
        format: ImageFormat,
        source: WireSource,
    },
    Text(&'a str),
}

#[derive(serde::Serialize)]
struct WireSource {
    bytes: String,
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ContentBlock::Image(img) => WireBlock::Image {
                format: img.format(),
                source: WireSource {
                    bytes: encode_base64(img),
                },
            }
            .serialize(serializer),
            ContentBlock::Text(text) => WireBlock::Text(text).serialize(serializer),
        }
    }
}
