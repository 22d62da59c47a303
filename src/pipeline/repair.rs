//! Text repair: best-effort cleanup of a raw completion before parsing.
//!
//! ## Why repair at all?
//!
//! The reply is primed with ```` ```json ```` so the model starts emitting
//! JSON immediately, which means its completion *ends* with a closing fence
//! that is not JSON. Some models also over-escape quotes or put raw newlines
//! inside string values. Both make otherwise good output unparseable.
//!
//! Every rule here is a global, context-free transform over the whole text.
//! None of them understands JSON; they are heuristics and they are lossy:
//!
//! | Step | Rule | Known loss |
//! |------|------|------------|
//! | 1 | trailing fence removal | `FixedOffset` eats 3 real characters when the fence is missing |
//! | 2 | `\"` → `"` | a legitimately escaped quote inside a string breaks the JSON |
//! | 3 | drop `\n` not preceded by `\` | newlines inside string values are lost |
//! | 4 | trim | none |
//!
//! Steps 2 and 3 only run under [`RepairStrategy::V1`]. The parse that
//! follows is the strict boundary: nothing after it touches the text again.

use crate::config::{FenceStrip, RepairStrategy};
use crate::prompts::CLOSING_FENCE;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which path the trailing-fence step took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FencePath {
    /// `FenceStrip::FixedOffset`: last three characters dropped unconditionally.
    FixedOffset,
    /// A closing fence was recognised and removed.
    SuffixMatched,
    /// No closing fence recognised; last three characters dropped anyway.
    OffsetFallback,
}

/// Output of [`repair`]: cleaned text plus what was done to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired {
    pub text: String,
    pub fence_path: FencePath,
    pub opening_fence_removed: bool,
    pub quotes_unescaped: usize,
    pub newlines_stripped: usize,
}

/// Run the repair pass selected by `fence` and `strategy` over `raw`.
pub fn repair(raw: &str, fence: FenceStrip, strategy: RepairStrategy) -> Repaired {
    let (unfenced, fence_path, opening_fence_removed) = strip_fences(raw, fence);

    let (text, quotes_unescaped, newlines_stripped) = match strategy {
        RepairStrategy::Passthrough => (unfenced.to_string(), 0, 0),
        RepairStrategy::V1 => {
            let (unquoted, quotes) = unescape_quotes(unfenced);
            let (joined, newlines) = strip_unescaped_newlines(&unquoted);
            (joined, quotes, newlines)
        }
    };

    let text = text.trim().to_string();
    debug!(
        "Repair ({}/{}): fence={:?}, opening_removed={}, quotes={}, newlines={}, {} → {} bytes",
        fence,
        strategy,
        fence_path,
        opening_fence_removed,
        quotes_unescaped,
        newlines_stripped,
        raw.len(),
        text.len()
    );

    Repaired {
        text,
        fence_path,
        opening_fence_removed,
        quotes_unescaped,
        newlines_stripped,
    }
}

// ── Step 1: fences ───────────────────────────────────────────────────────

static RE_CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*$").unwrap());

static RE_OPENING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap());

fn strip_fences(raw: &str, mode: FenceStrip) -> (&str, FencePath, bool) {
    match mode {
        FenceStrip::FixedOffset => (
            drop_last_chars(raw, CLOSING_FENCE.len()),
            FencePath::FixedOffset,
            false,
        ),
        FenceStrip::SuffixMatch => {
            let (body, path) = match RE_CLOSING_FENCE.find(raw) {
                Some(m) => (&raw[..m.start()], FencePath::SuffixMatched),
                None => {
                    warn!(
                        "No closing fence found; dropping the last {} characters",
                        CLOSING_FENCE.len()
                    );
                    (drop_last_chars(raw, CLOSING_FENCE.len()), FencePath::OffsetFallback)
                }
            };

            // Providers that ignore the prefill echo the opening fence themselves.
            match RE_OPENING_FENCE.find(body) {
                Some(m) => (&body[m.end()..], path, true),
                None => (body, path, false),
            }
        }
    }
}

/// `text` without its last `n` characters (not bytes).
fn drop_last_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return text;
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &text[..idx],
        None => "",
    }
}

// ── Step 2: escaped quotes ───────────────────────────────────────────────

fn unescape_quotes(text: &str) -> (String, usize) {
    let count = text.matches("\\\"").count();
    if count == 0 {
        return (text.to_string(), 0);
    }
    (text.replace("\\\"", "\""), count)
}

// ── Step 3: unescaped newlines ───────────────────────────────────────────

fn strip_unescaped_newlines(text: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut stripped = 0;
    let mut prev: Option<char> = None;

    for c in text.chars() {
        if c == '\n' && prev != Some('\\') {
            stripped += 1;
        } else {
            out.push(c);
        }
        prev = Some(c);
    }

    (out, stripped)
}

// ── Tests ────────────────────────────────────────────────────────────────
