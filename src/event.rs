//! Orchestration stage payload.
//!
//! The extraction stage runs after the rasteriser, which reports where it put
//! the page images:
//!
//! ```json
//! { "output": { "bucket": "images-bucket", "folder": "reports/q1+2024" } }
//! ```
//!
//! The folder originates from a storage notification and is form-encoded
//! (`+` for space, `%XX` escapes), so it is decoded before use as a prefix.

use crate::error::Doc2JsonError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the page images of one document live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInput {
    pub container: String,
    pub prefix: String,
}

impl StageInput {
    pub fn new(container: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            prefix: prefix.into(),
        }
    }

    /// Parse a stage payload from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, Doc2JsonError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Doc2JsonError::InvalidStageInput(format!("not JSON: {e}")))?;
        Self::from_event(&value)
    }

    /// Extract container and decoded prefix from `{"output": {"bucket", "folder"}}`.
    pub fn from_event(event: &Value) -> Result<Self, Doc2JsonError> {
        let output = event
            .get("output")
            .ok_or_else(|| Doc2JsonError::InvalidStageInput("missing `output`".into()))?;

        let field = |name: &str| -> Result<&str, Doc2JsonError> {
            output.get(name).and_then(Value::as_str).ok_or_else(|| {
                Doc2JsonError::InvalidStageInput(format!("missing string `output.{name}`"))
            })
        };

        let container = field("bucket")?;
        if container.is_empty() {
            return Err(Doc2JsonError::InvalidStageInput(
                "`output.bucket` is empty".into(),
            ));
        }
        let prefix = form_decode(field("folder")?)?;

        Ok(Self::new(container, prefix))
    }
}

/// Decode an `application/x-www-form-urlencoded` component.
pub fn form_decode(encoded: &str) -> Result<String, Doc2JsonError> {
    let spaced = encoded.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Doc2JsonError::InvalidStageInput(format!("`{encoded}` is not UTF-8: {e}")))
}
