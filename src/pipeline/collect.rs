//! Image collection: list a storage prefix and fetch the page images.
//!
//! Listing order *is* page order. The collector never re-sorts; it relies on
//! the store returning keys lexicographically and on the rasteriser naming
//! pages so that lexicographic order equals page order (`page_001.png`, …).

use crate::error::Doc2JsonError;
use crate::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Raster formats the model endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Format for an object key, from its (case-sensitive) extension.
    ///
    /// Only `.jpg`, `.jpeg` and `.png` match; `.PNG` does not.
    pub fn from_key(key: &str) -> Option<Self> {
        let (_, ext) = key.rsplit_once('.')?;
        match ext {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page image, immutable once collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    key: String,
    format: ImageFormat,
    bytes: Vec<u8>,
}

impl ImageAsset {
    pub fn new(key: impl Into<String>, format: ImageFormat, bytes: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            format,
            bytes,
        }
    }

    /// Storage key the image was read from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Collect every image under `prefix` in `container`, in listing order.
///
/// Listed keys are fetched exactly as returned; only the stage folder is
/// form-decoded. Non-image objects are skipped silently. An empty result is
/// not an error: it is logged at warn level and the caller proceeds with an
/// image-less request.
pub async fn collect_images(
    store: &dyn ObjectStore,
    container: &str,
    prefix: &str,
) -> Result<Vec<ImageAsset>, Doc2JsonError> {
    info!("Collecting images from container '{}', prefix '{}'", container, prefix);

    let keys = store.list(container, prefix).await?;
    let mut images = Vec::with_capacity(keys.len());

    for key in keys {
        let Some(format) = ImageFormat::from_key(&key) else {
            debug!("Skipping non-image object '{}'", key);
            continue;
        };
        let bytes = store.get(container, &key).await?;
        debug!("Fetched '{}' ({}, {} bytes)", key, format, bytes.len());
        images.push(ImageAsset::new(key, format, bytes));
    }

    if images.is_empty() {
        warn!(
            "No images found in container '{}' under prefix '{}'",
            container, prefix
        );
    } else {
        info!("Collected {} images", images.len());
    }

    Ok(images)
}
