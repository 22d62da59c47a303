//! Image encoding: `ImageAsset` → base64 payloads.
//!
//! Images travel inside the JSON request body, so their bytes are base64
//! encoded exactly once per request. The bytes themselves are sent as
//! collected; re-encoding a page would only add artefacts.

use crate::pipeline::collect::ImageAsset;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Standard base64 of the image bytes.
pub fn encode_base64(asset: &ImageAsset) -> String {
    STANDARD.encode(asset.bytes())
}

/// Wrap a collected image as provider `ImageData`.
///
/// `detail: "high"` asks GPT-4-class models for the full tile budget; dense
/// tables and small print are lost at low detail.
pub fn to_image_data(asset: &ImageAsset) -> ImageData {
    let b64 = encode_base64(asset);
    debug!("Encoded '{}' → {} bytes base64", asset.key(), b64.len());
    ImageData::new(b64, asset.format().mime_type()).with_detail("high")
}
