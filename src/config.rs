//! Configuration types for document extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is read-only once built and
//! is cloned into each invocation; nothing in it is shared mutable state.

use crate::error::Doc2JsonError;
use crate::progress::ProgressCallback;
use crate::prompts::RESPONSE_PREFILL;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration for a single-document extraction.
///
/// # Example
/// ```rust
/// use edgequake_doc2json::{ExtractionConfig, FenceStrip, RepairStrategy};
///
/// let config = ExtractionConfig::builder()
///     .model("claude-sonnet-4-20250514")
///     .fence_strip(FenceStrip::SuffixMatch)
///     .repair(RepairStrategy::V1)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Optional system instruction sent ahead of the user turn.
    pub system_prompt: Option<String>,

    /// Response-priming fragment. Default: ```` ```json ````.
    ///
    /// With a prefill the completion starts inside a JSON code block instead
    /// of with conversational preamble. `None` sends no assistant turn.
    pub prefill: Option<String>,

    /// How the closing code fence is removed. Default: [`FenceStrip::SuffixMatch`].
    pub fence_strip: FenceStrip,

    /// Which text-repair pass runs before parsing. Default: [`RepairStrategy::V1`].
    pub repair: RepairStrategy,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum completion tokens. Default: 8192.
    ///
    /// Multi-page documents produce one JSON object per page; running out of
    /// tokens ends in `max_tokens`, which is an abnormal completion.
    pub max_tokens: usize,

    /// Caller-side timeout for the inference call in seconds. Default: 300.
    ///
    /// The model call has no intrinsic upper bound. `None` waits forever.
    pub api_timeout_secs: Option<u64>,

    /// Observer for stage events. Default: none.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            system_prompt: None,
            prefill: Some(RESPONSE_PREFILL.to_string()),
            fence_strip: FenceStrip::default(),
            repair: RepairStrategy::default(),
            temperature: 0.0,
            max_tokens: 8192,
            api_timeout_secs: Some(300),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("system_prompt", &self.system_prompt.as_ref().map(|s| s.len()))
            .field("prefill", &self.prefill)
            .field("fence_strip", &self.fence_strip)
            .field("repair", &self.repair)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn prefill(mut self, prefill: Option<String>) -> Self {
        self.config.prefill = prefill;
        self
    }

    pub fn fence_strip(mut self, mode: FenceStrip) -> Self {
        self.config.fence_strip = mode;
        self
    }

    pub fn repair(mut self, strategy: RepairStrategy) -> Self {
        self.config.repair = strategy;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Doc2JsonError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if matches!(c.prefill.as_deref(), Some("")) {
            return Err(Doc2JsonError::InvalidConfig(
                "prefill must be non-empty; use None to disable it".into(),
            ));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(Doc2JsonError::InvalidConfig(
                "api_timeout_secs must be ≥ 1; use None to disable it".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the repair stage removes the closing code fence of a primed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceStrip {
    /// Drop exactly the last three characters, whatever they are.
    ///
    /// Corrupts the tail of the document when the model omitted the fence.
    FixedOffset,
    /// Remove a recognised closing fence (and an echoed opening fence);
    /// fall back to the fixed offset, with a warning, when none is found. (default)
    #[default]
    SuffixMatch,
}

/// Version of the text-repair pass applied before parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    /// Fence strip and trim only.
    Passthrough,
    /// Passthrough + `\"` → `"` + removal of unescaped newlines. (default)
    #[default]
    V1,
}

impl fmt::Display for FenceStrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenceStrip::FixedOffset => write!(f, "fixed-offset"),
            FenceStrip::SuffixMatch => write!(f, "suffix-match"),
        }
    }
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairStrategy::Passthrough => write!(f, "passthrough"),
            RepairStrategy::V1 => write!(f, "v1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.prefill.as_deref(), Some("```json"));
        assert_eq!(c.fence_strip, FenceStrip::SuffixMatch);
        assert_eq!(c.repair, RepairStrategy::V1);
        assert_eq!(c.max_tokens, 8192);
        assert_eq!(c.api_timeout_secs, Some(300));
        assert!(c.system_prompt.is_none());
    }

    #[test]
    fn builder_clamps_temperature() {
        let c = ExtractionConfig::builder().temperature(7.5).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_max_tokens() {
        let err = ExtractionConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(matches!(err, Doc2JsonError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_empty_prefill() {
        assert!(ExtractionConfig::builder()
            .prefill(Some(String::new()))
            .build()
            .is_err());
        assert!(ExtractionConfig::builder().prefill(None).build().is_ok());
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(ExtractionConfig::builder()
            .api_timeout_secs(Some(0))
            .build()
            .is_err());
        let c = ExtractionConfig::builder()
            .api_timeout_secs(None)
            .build()
            .unwrap();
        assert!(c.api_timeout_secs.is_none());
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", ExtractionConfig::default());
        assert!(s.contains("ExtractionConfig"));
        assert!(s.contains("fence_strip"));
    }

    #[test]
    fn enums_serialise_snake_case() {
        assert_eq!(
            serde_json::to_string(&FenceStrip::FixedOffset).unwrap(),
            "\"fixed_offset\""
        );
        assert_eq!(serde_json::to_string(&RepairStrategy::V1).unwrap(), "\"v1\"");
    }
}
