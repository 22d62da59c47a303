//! Progress-callback trait for extraction stage events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe an
//! invocation as it moves through collect → infer → normalise. The CLI uses it
//! to drive a spinner; services can forward the events to their own telemetry.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for PageCounter {
//!     fn on_extraction_complete(&self, page_count: usize) {
//!         self.pages.store(page_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { pages: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline at each stage boundary.
///
/// Implementations must be `Send + Sync`: separate documents may be extracted
/// concurrently with the same callback. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the image listing and fetches are done.
    fn on_images_collected(&self, image_count: usize) {
        let _ = image_count;
    }

    /// Called just before the request is sent to the model.
    fn on_inference_start(&self, image_count: usize) {
        let _ = image_count;
    }

    /// Called when the model returns, before the stop reason is checked.
    ///
    /// # Arguments
    /// * `stop_reason`: the stop reason as reported by the endpoint
    /// * `text_len`: byte length of the first text segment (0 if none)
    fn on_inference_complete(&self, stop_reason: &str, text_len: usize) {
        let _ = (stop_reason, text_len);
    }

    /// Called after the response normalised into a document.
    fn on_extraction_complete(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Called when the invocation fails at any stage.
    fn on_extraction_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
