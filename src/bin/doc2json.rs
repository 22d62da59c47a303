//! CLI binary for edgequake-doc2json.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs one extraction and prints the result. Failures
//! are printed as an `ErrorReport` JSON object on stderr with exit code 1.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use edgequake_doc2json::{
    normalize_response, write_output, Doc2JsonError, ErrorKind, ErrorReport, ExtractionConfig,
    ExtractionOutput, ExtractionProgressCallback, Extractor, FenceStrip, LocalObjectStore,
    ProgressCallback, RepairStrategy, StageInput,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that follows the pipeline stages. There is only one
/// model call per run, so a bar with a length would never move.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style =
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Collecting");
        bar.set_message("listing images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_images_collected(&self, image_count: usize) {
        self.bar.println(format!(
            "  {} {} page images collected",
            green("✓"),
            bold(&image_count.to_string())
        ));
    }

    fn on_inference_start(&self, image_count: usize) {
        self.bar.set_prefix("Extracting");
        self.bar.set_message(format!("waiting for the model ({image_count} images)…"));
    }

    fn on_inference_complete(&self, stop_reason: &str, text_len: usize) {
        self.bar.println(format!(
            "  {} model finished: {}  {}",
            green("✓"),
            stop_reason,
            dim(&format!("{text_len} chars"))
        ));
        self.bar.set_prefix("Normalising");
        self.bar.set_message("");
    }

    fn on_extraction_complete(&self, page_count: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} pages extracted", green("✔"), bold(&page_count.to_string()));
    }

    fn on_extraction_error(&self, error: &str) {
        self.bar.finish_and_clear();
        let msg = match error.char_indices().nth(100) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        eprintln!("{} {}", red("✘"), red(&msg));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the page images under images/reports/q1/ (container "images")
  doc2json --store ./data --container images --prefix reports/q1/

  # Take container and prefix from a stage payload
  doc2json --store ./data --event payload.json -o result.json

  # Re-normalise a saved raw model completion (no API key needed)
  doc2json --raw completion.txt --repair passthrough

  # Use a specific model
  doc2json --model claude-sonnet-4-20250514 --provider anthropic \
           --store ./data --container images --prefix doc/

STAGE PAYLOAD:
  {"output": {"bucket": "<container>", "folder": "<prefix>"}}
  The folder is form-decoded ("+" → space, %XX escapes) before use.

STORE LAYOUT:
  <store>/<container>/<key>. Keys ending in .png, .jpg or .jpeg are sent to
  the model in lexicographic order; name pages so that order is page order.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Override the log filter
"#;

/// Extract structured JSON from page images using a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "doc2json",
    version,
    about = "Extract structured JSON (pages, tables, lists, images) from document page images",
    long_about = "Send the page images of one document to a Vision Language Model in a single \
request and normalise its reply into a validated JSON document tree. Supports OpenAI, Anthropic, \
Google Gemini, Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP,
    group(ArgGroup::new("mode").required(true).args(["container", "event", "raw"]))
)]
struct Cli {
    /// Root directory of the local object store.
    #[arg(long, env = "DOC2JSON_STORE", required_unless_present = "raw")]
    store: Option<PathBuf>,

    /// Container (top-level directory under --store) holding the images.
    #[arg(long)]
    container: Option<String>,

    /// Key prefix of the page images inside the container.
    #[arg(long, requires = "container")]
    prefix: Option<String>,

    /// Stage payload file: {"output": {"bucket", "folder"}}.
    #[arg(long)]
    event: Option<PathBuf>,

    /// Normalise a saved raw completion instead of calling a model.
    #[arg(long)]
    raw: Option<PathBuf>,

    /// Write the JSON result to this file instead of stdout.
    #[arg(short, long, env = "DOC2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// Single-line JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Path to a text file containing a system prompt.
    #[arg(long, env = "DOC2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Do not prime the reply with ```json.
    #[arg(long)]
    no_prefill: bool,

    /// How the closing code fence is removed.
    #[arg(long, value_enum, default_value = "suffix-match")]
    fence_strip: FenceArg,

    /// Text-repair pass applied before parsing.
    #[arg(long, value_enum, default_value = "v1")]
    repair: RepairArg,

    /// Max LLM output tokens for the whole document.
    #[arg(long, env = "DOC2JSON_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// LLM call timeout in seconds (0 waits forever).
    #[arg(long, env = "DOC2JSON_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, env = "DOC2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2JSON_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FenceArg {
    FixedOffset,
    SuffixMatch,
}

impl From<FenceArg> for FenceStrip {
    fn from(v: FenceArg) -> Self {
        match v {
            FenceArg::FixedOffset => FenceStrip::FixedOffset,
            FenceArg::SuffixMatch => FenceStrip::SuffixMatch,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum RepairArg {
    Passthrough,
    V1,
}

impl From<RepairArg> for RepairStrategy {
    fn from(v: RepairArg) -> Self {
        match v {
            RepairArg::Passthrough => RepairStrategy::Passthrough,
            RepairArg::V1 => RepairStrategy::V1,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && cli.raw.is_none();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress_cb).await?;

    // ── Raw mode: normalise only ─────────────────────────────────────────
    let output = if let Some(ref raw_path) = cli.raw {
        let raw = tokio::fs::read_to_string(raw_path)
            .await
            .with_context(|| format!("Failed to read raw completion from {:?}", raw_path))?;
        normalize_response(&raw, &config)?
    } else {
        let input = stage_input(cli).await?;
        let store_root = cli
            .store
            .clone()
            .context("--store is required unless --raw is given")?;
        let store = Arc::new(LocalObjectStore::new(store_root));
        let extractor = Extractor::from_config(store, config).await?;
        extractor.extract_stage(&input).await?
    };

    emit(cli, &output).await?;

    if !cli.quiet {
        print_summary(&output);
    }
    Ok(())
}

/// Container and prefix from `--container/--prefix` or `--event`.
async fn stage_input(cli: &Cli) -> Result<StageInput> {
    if let Some(ref container) = cli.container {
        return Ok(StageInput::new(container.clone(), cli.prefix.clone().unwrap_or_default()));
    }
    let path = cli
        .event
        .as_ref()
        .context("one of --container, --event or --raw is required")?;
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read stage payload from {:?}", path))?;
    Ok(StageInput::from_json(&text)?)
}

async fn emit(cli: &Cli, output: &ExtractionOutput) -> Result<()> {
    if let Some(ref path) = cli.output {
        write_output(output, path).await?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
        return Ok(());
    }

    let json = if cli.compact {
        serde_json::to_string(output)
    } else {
        serde_json::to_string_pretty(output)
    }
    .context("Failed to serialise output")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{json}").context("Failed to write to stdout")?;
    Ok(())
}

fn print_summary(output: &ExtractionOutput) {
    let stats = &output.stats;
    eprintln!(
        "   {} pages, {} tables from {} images  —  {}ms total",
        output.ai_response.page_count(),
        output.ai_response.table_count(),
        stats.image_count,
        stats.total_duration_ms,
    );
    if stats.input_tokens > 0 || stats.output_tokens > 0 {
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.input_tokens.to_string()),
            dim(&stats.output_tokens.to_string()),
        );
    }
    if let Some(path) = stats.fence_path {
        eprintln!(
            "   repair: fence {:?}, {} quotes unescaped, {} newlines stripped",
            path, stats.quotes_unescaped, stats.newlines_stripped
        );
    }
    for warning in &stats.warnings {
        eprintln!("   {} {}", red("!"), warning);
    }
}

/// Print the failure as an `ErrorReport` JSON object on stderr.
fn print_report(err: &anyhow::Error) {
    let report = match err.downcast_ref::<Doc2JsonError>() {
        Some(e) => {
            let mut report = e.report();
            report.message = format!("{err:#}");
            report
        }
        None => ErrorReport {
            kind: ErrorKind::InvalidInput,
            message: format!("{err:#}"),
            stop_reason: None,
            cleaned_text: None,
        },
    };

    let json = serde_json::to_string_pretty(&report)
        .unwrap_or_else(|_| format!("{{\"kind\":\"internal\",\"message\":{:?}}}", report.message));
    eprintln!("{json}");
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder()
        .fence_strip(cli.fence_strip.into())
        .repair(cli.repair.into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs((cli.api_timeout > 0).then_some(cli.api_timeout));

    if cli.no_prefill {
        builder = builder.prefill(None);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    Ok(builder.build()?)
}
