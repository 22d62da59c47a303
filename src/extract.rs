//! Single-document extraction entry points.
//!
//! One call to [`Extractor::extract`] is one invocation of the pipeline:
//! collect the page images, build one request, wait for one completion and
//! normalise it. Steps run strictly in sequence and nothing is shared between
//! invocations except the injected collaborators, so separate documents can
//! be extracted concurrently from clones of the same `Arc`s.
//!
//! Every failure aborts the invocation. There is no partial document: the
//! normaliser only ever sees a complete completion with stop reason
//! `end_turn`, and a cancelled or timed-out call leaves nothing behind.

use crate::config::ExtractionConfig;
use crate::error::Doc2JsonError;
use crate::event::StageInput;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::invoke::{invoke, ModelEndpoint};
use crate::pipeline::llm::LlmEndpoint;
use crate::pipeline::normalize::{normalize, Normalized};
use crate::pipeline::{collect, request};
use crate::storage::ObjectStore;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// The extraction pipeline bound to its collaborators.
pub struct Extractor {
    store: Arc<dyn ObjectStore>,
    endpoint: Arc<dyn ModelEndpoint>,
    config: ExtractionConfig,
}

impl Extractor {
    /// Assemble an extractor from explicit collaborators.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        endpoint: Arc<dyn ModelEndpoint>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            store,
            endpoint,
            config,
        }
    }

    /// Assemble an extractor whose endpoint is an edgequake-llm provider
    /// resolved from `config` and the environment.
    pub async fn from_config(
        store: Arc<dyn ObjectStore>,
        config: ExtractionConfig,
    ) -> Result<Self, Doc2JsonError> {
        let provider = resolve_provider(&config).await?;
        let endpoint = LlmEndpoint::new(provider, &config);
        info!("Using model endpoint '{}'", endpoint.name());
        Ok(Self::new(store, Arc::new(endpoint), config))
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn endpoint_name(&self) -> &str {
        self.endpoint.name()
    }

    /// Run the pipeline for the images under `prefix` in `container`.
    pub async fn extract(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<ExtractionOutput, Doc2JsonError> {
        let result = self.run(container, prefix).await;
        if let (Err(e), Some(cb)) = (&result, &self.config.progress_callback) {
            cb.on_extraction_error(&e.to_string());
        }
        result
    }

    /// Run the pipeline for an orchestration stage payload.
    pub async fn extract_stage(
        &self,
        input: &StageInput,
    ) -> Result<ExtractionOutput, Doc2JsonError> {
        self.extract(&input.container, &input.prefix).await
    }

    async fn run(&self, container: &str, prefix: &str) -> Result<ExtractionOutput, Doc2JsonError> {
        let total_start = Instant::now();
        let config = &self.config;
        info!("Starting extraction: {}/{}", container, prefix);

        // ── Step 1: Collect images ───────────────────────────────────────
        let collect_start = Instant::now();
        let images = collect::collect_images(self.store.as_ref(), container, prefix).await?;
        let collect_duration_ms = collect_start.elapsed().as_millis() as u64;
        let image_count = images.len();
        if let Some(ref cb) = config.progress_callback {
            cb.on_images_collected(image_count);
        }

        // ── Step 2: Build request ────────────────────────────────────────
        let request = request::build_request(images, config);

        // ── Step 3: Invoke model ─────────────────────────────────────────
        let inference_start = Instant::now();
        let inference = invoke(self.endpoint.as_ref(), &request, config).await?;
        let inference_duration_ms = inference_start.elapsed().as_millis() as u64;

        // ── Step 4: Normalise ────────────────────────────────────────────
        let normalized = normalize(&inference.raw_text, config.fence_strip, config.repair)?;

        let mut stats = stats_from(&normalized);
        stats.image_count = image_count;
        stats.collect_duration_ms = collect_duration_ms;
        stats.inference_duration_ms = inference_duration_ms;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        if let Some(usage) = inference.usage {
            stats.input_tokens = usage.input_tokens;
            stats.output_tokens = usage.output_tokens;
        }

        let page_count = normalized.document.page_count();
        info!(
            "Extraction complete: {} images → {} pages, {}ms total",
            image_count, page_count, stats.total_duration_ms
        );
        if let Some(ref cb) = config.progress_callback {
            cb.on_extraction_complete(page_count);
        }

        Ok(ExtractionOutput::new(normalized.document, stats))
    }
}

fn stats_from(normalized: &Normalized) -> ExtractionStats {
    ExtractionStats {
        fence_path: Some(normalized.repair.fence_path),
        quotes_unescaped: normalized.repair.quotes_unescaped,
        newlines_stripped: normalized.repair.newlines_stripped,
        warnings: normalized.warnings.clone(),
        ..Default::default()
    }
}

/// Normalise a saved raw completion without calling any collaborator.
///
/// Uses the fence and repair settings of `config`. Useful for replaying a
/// response that previously failed with `MalformedResponse`.
pub fn normalize_response(
    raw: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Doc2JsonError> {
    let start = Instant::now();
    let normalized = normalize(raw, config.fence_strip, config.repair)?;
    let mut stats = stats_from(&normalized);
    stats.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(ExtractionOutput::new(normalized.document, stats))
}

/// Run the pipeline and write the output JSON to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    extractor: &Extractor,
    input: &StageInput,
    output_path: impl AsRef<Path>,
) -> Result<ExtractionStats, Doc2JsonError> {
    let output = extractor.extract_stage(input).await?;
    let path = output_path.as_ref();
    write_output(&output, path).await?;
    Ok(output.stats)
}

/// Serialise `output` as pretty JSON to `path`, atomically.
pub async fn write_output(output: &ExtractionOutput, path: &Path) -> Result<(), Doc2JsonError> {
    let write_err = |e| Doc2JsonError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| Doc2JsonError::Internal(format!("Failed to serialise output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    debug!("Wrote {} bytes to {}", json.len(), path.display());
    Ok(())
}

/// Synchronous wrapper around [`Extractor::extract_stage`].
///
/// Creates a temporary tokio runtime internally; do not call it from inside
/// an async context.
pub fn extract_sync(
    extractor: &Extractor,
    input: &StageInput,
) -> Result<ExtractionOutput, Doc2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2JsonError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extractor.extract_stage(input))
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2JsonError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. `config.provider`, used as-is.
/// 2. `config.provider_name` with `config.model` (or [`DEFAULT_MODEL`]).
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 4. OpenAI, when `OPENAI_API_KEY` is set.
/// 5. Whatever [`ProviderFactory::from_env`] detects.
pub async fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2JsonError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::invoke::{ModelResponse, TokenUsage, END_TURN};
    use crate::pipeline::repair::FencePath;
    use crate::pipeline::request::InferenceRequest;
    use crate::progress::ExtractionProgressCallback;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const ONE_PAGE: &str = "{\"pages\": [{\"page_number\": 1, \"summary\": \"Invoice\"}]}\n```";

    struct Canned {
        response: ModelResponse,
        seen_images: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(response: ModelResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                seen_images: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelEndpoint for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse, Doc2JsonError> {
            let keys = request.images().map(|i| i.key().to_string()).collect();
            *self.seen_images.lock().unwrap() = keys;
            Ok(self.response.clone())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ExtractionProgressCallback for Recorder {
        fn on_images_collected(&self, image_count: usize) {
            self.events.lock().unwrap().push(format!("collected:{image_count}"));
        }
        fn on_inference_start(&self, image_count: usize) {
            self.events.lock().unwrap().push(format!("start:{image_count}"));
        }
        fn on_inference_complete(&self, stop_reason: &str, _text_len: usize) {
            self.events.lock().unwrap().push(format!("done:{stop_reason}"));
        }
        fn on_extraction_complete(&self, page_count: usize) {
            self.events.lock().unwrap().push(format!("pages:{page_count}"));
        }
        fn on_extraction_error(&self, _error: &str) {
            self.events.lock().unwrap().push("error".to_string());
        }
    }

    async fn store_with(keys: &[&str]) -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new());
        for key in keys {
            store.put("bucket", key, vec![0xFF, 0xD8], "image/jpeg").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn extract_fills_stats_and_fires_callbacks() {
        let store = store_with(&["doc/a.jpg", "doc/notes.txt"]).await;
        let endpoint = Canned::new(ModelResponse::text(END_TURN, ONE_PAGE).with_usage(TokenUsage {
            input_tokens: 1200,
            output_tokens: 40,
        }));
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();

        let extractor = Extractor::new(store, endpoint.clone(), config);
        let out = extractor.extract("bucket", "doc/").await.unwrap();

        assert_eq!(out.message, "Success");
        assert_eq!(out.ai_response.pages[0].summary, "Invoice");
        assert_eq!(out.stats.image_count, 1);
        assert_eq!(out.stats.input_tokens, 1200);
        assert_eq!(out.stats.output_tokens, 40);
        assert_eq!(out.stats.fence_path, Some(FencePath::SuffixMatched));
        assert_eq!(*endpoint.seen_images.lock().unwrap(), vec!["doc/a.jpg"]);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["collected:1", "start:1", "done:end_turn", "pages:1"]
        );
    }

    #[tokio::test]
    async fn failure_fires_error_callback() {
        let store = store_with(&["doc/a.png"]).await;
        let endpoint = Canned::new(ModelResponse::text("max_tokens", "{\"pages\": ["));
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();

        let extractor = Extractor::new(store, endpoint, config);
        let err = extractor.extract("bucket", "doc/").await.unwrap_err();

        assert!(matches!(err, Doc2JsonError::AbnormalCompletion { .. }));
        assert_eq!(recorder.events.lock().unwrap().last().map(String::as_str), Some("error"));
    }

    #[test]
    fn extract_stage_uses_decoded_prefix() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryObjectStore::new());
            store
                .put("bucket", "q1 report/page_1.png", vec![1], "image/png")
                .await
                .unwrap();
            let endpoint = Canned::new(ModelResponse::text(END_TURN, ONE_PAGE));
            let extractor = Extractor::new(store, endpoint.clone(), ExtractionConfig::default());

            let input = StageInput::from_json(
                r#"{"output": {"bucket": "bucket", "folder": "q1+report/"}}"#,
            )
            .unwrap();
            extractor.extract_stage(&input).await.unwrap();

            assert_eq!(*endpoint.seen_images.lock().unwrap(), vec!["q1 report/page_1.png"]);
        });
    }

    #[test]
    fn extract_sync_runs_outside_a_runtime() {
        let store = Arc::new(MemoryObjectStore::new());
        let endpoint = Canned::new(ModelResponse::text(END_TURN, ONE_PAGE));
        let extractor = Extractor::new(store, endpoint, ExtractionConfig::default());

        let out = extract_sync(&extractor, &StageInput::new("bucket", "none/")).unwrap();
        assert_eq!(out.stats.image_count, 0);
        assert_eq!(out.ai_response.page_count(), 1);
    }

    #[tokio::test]
    async fn extract_to_file_writes_wire_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/result.json");
        let store = store_with(&["doc/a.jpg"]).await;
        let endpoint = Canned::new(ModelResponse::text(END_TURN, ONE_PAGE));
        let extractor = Extractor::new(store, endpoint, ExtractionConfig::default());

        let stats = extract_to_file(&extractor, &StageInput::new("bucket", "doc/"), &path)
            .await
            .unwrap();
        assert_eq!(stats.image_count, 1);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["message"], "Success");
        assert_eq!(written["ai_response"]["pages"][0]["page_number"], 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn normalize_response_reports_repairs() {
        let config = ExtractionConfig::default();
        let out = normalize_response("{\\\"pages\\\": []}\n```", &config).unwrap();
        assert_eq!(out.stats.quotes_unescaped, 2);
        assert_eq!(out.stats.newlines_stripped, 1);
        assert_eq!(out.stats.image_count, 0);
    }
}
