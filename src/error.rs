//! Error types for the coascan library.
//!
//! A single [`ScanError`] enum covers every failure the pipeline can hit.
//! Two propagation rules keep call sites simple:
//!
//! * Stage boundaries swallow errors. Fetch, extraction, and analysis
//!   failures never escape [`crate::controller::ScanPipeline`]; they are
//!   converted to fixed human-readable strings and persisted in place of
//!   the value that would otherwise have been stored.
//!
//! * Service-surface calls return `Err`. Configuration validation, history
//!   persistence, and misuse (an empty scan value, or requesting analysis
//!   for a url that was never scanned) surface as `Err(ScanError)` from the
//!   public API, because the caller can act on those.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the coascan library.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The decoded scan value is empty or whitespace.
    #[error("Nothing to scan: the decoded value is empty")]
    EmptyCode,

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The document request failed at the transport level.
    #[error("Failed to fetch '{url}': {reason}\nCheck the relay endpoint and your connection.")]
    Fetch { url: String, reason: String },

    /// The document endpoint answered with a non-success status.
    #[error("Fetch of '{url}' returned HTTP {status}")]
    FetchStatus { url: String, status: u16 },

    /// The document request exceeded the configured timeout.
    #[error("Fetch timed out after {secs}s for '{url}'\nIncrease --fetch-timeout.")]
    FetchTimeout { url: String, secs: u64 },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The fetched payload is not a PDF document.
    #[error("Fetched payload is not a PDF document\nFirst bytes: {magic:?}")]
    NotAPdf { magic: [u8; 4] },

    /// The PDF header/xref/content could not be parsed at all.
    #[error("Failed to parse PDF document: {detail}")]
    Extraction { detail: String },

    // ── Analysis errors ───────────────────────────────────────────────────
    /// The prompt template file could not be read.
    #[error("Failed to read prompt template '{path}': {source}")]
    TemplateLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No API key available for the analysis service.
    #[error("No API key configured for the analysis service.\nSet OPENAI_API_KEY or pass one in the configuration.")]
    ApiKeyMissing,

    /// The analysis request failed at the transport level.
    #[error("Analysis request failed: {message}")]
    Analysis { message: String },

    /// The analysis service answered with a non-success status.
    #[error("Analysis service returned HTTP {status}: {detail}")]
    AnalysisStatus { status: u16, detail: String },

    /// Analysis was requested for a url with no extracted text on record.
    #[error("No extracted text on record for '{url}'\nScan it before requesting analysis.")]
    AnalysisNotReady { url: String },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The pipeline was shut down before the stage could commit its result.
    #[error("Pipeline cancelled before the stage committed")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the history file.
    #[error("Failed to persist history file '{path}': {source}")]
    HistoryPersist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
