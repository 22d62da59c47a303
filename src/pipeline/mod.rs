//! Pipeline stages for image-to-JSON extraction.
//!
//! Each submodule implements exactly one step. Collaborators (object store,
//! model endpoint) come in as trait objects, so every stage can be exercised
//! against in-memory fakes.
//!
//! ## Data Flow
//!
//! ```text
//! collect ──▶ request ──▶ invoke ──▶ repair ──▶ normalize
//! (store)     (prompt)    (model)    (text)     (parse + schema)
//! ```
//!
//! 1. [`collect`]: list the prefix, keep `.png`/`.jpg`/`.jpeg`, fetch bytes
//! 2. [`request`]: images + instruction block + optional prefill
//! 3. [`invoke`]: one blocking inference call; judge the stop reason
//! 4. [`repair`]: fence strip and the versioned text-repair heuristics
//! 5. [`normalize`]: strict JSON parse, then schema walk into a
//!    [`crate::output::DocumentTree`]
//!
//! [`encode`] and [`llm`] adapt the request to an edgequake-llm provider.

pub mod collect;
pub mod encode;
pub mod invoke;
pub mod llm;
pub mod normalize;
pub mod repair;
pub mod request;
