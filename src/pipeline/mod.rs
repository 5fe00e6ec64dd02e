//! Pipeline stages between a decoded scan and a stored analysis.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. point analysis at a different backend)
//! without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ extract ──▶ analyze ──▶ normalize
//! (HTTP)    (lopdf)     (chat API)  (display cleanup)
//! ```
//!
//! 1. [`fetch`]: download the document bytes, optionally through a relay
//! 2. [`extract`]: pull text from the leading pages; runs in
//!    `spawn_blocking` because PDF parsing is CPU-bound
//! 3. [`analyze`]: drive the chat-completions call; the only stage whose
//!    failures are mapped to fixed strings instead of errors
//! 4. [`normalize`]: deterministic cleanup rules applied to the analysis at
//!    read time (stored text stays raw)

pub mod analyze;
pub mod extract;
pub mod fetch;
pub mod normalize;
