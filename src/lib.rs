//! # coascan
//!
//! Turn a scanned QR code into a stored, plain-language summary of the
//! cannabis Certificate of Analysis (COA) it points at.
//!
//! ## Why this crate?
//!
//! COA documents are dense lab reports: cannabinoid percentages, terpene
//! tables, pesticide panels. Customers scanning the QR code on a package
//! want to know what the product is, not read chromatography output. This
//! crate fetches the linked PDF, pulls text from its leading pages, asks a
//! chat model for a short summary in plain language, and keeps every scan
//! in a local history file so earlier lookups are one read away.
//!
//! Two details come straight from field use. Scanners decode the same code
//! many times per second, so admissions go through a per-code cooldown
//! gate. And COA hosts frequently sit behind CDNs that refuse direct
//! cross-origin fetches, so the fetcher can route through a relay endpoint
//! that takes the target url as a single encoded parameter.
//!
//! ## Pipeline Overview
//!
//! ```text
//! QR scan
//!  │
//!  ├─ 1. Gate     admit once per code per cooldown window
//!  ├─ 2. Fetch    download the PDF, directly or via the relay
//!  ├─ 3. Extract  text from the first pages via lopdf (spawn_blocking)
//!  ├─ 4. Persist  record with extracted text + "Ready for analysis."
//!  ├─ 5. Analyze  chat-completions call; failures become fixed strings
//!  └─ 6. Persist  same record updated in place with the summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coascan::{HistoryStore, PipelineConfig, ScanOutcome, ScanPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key falls back to OPENAI_API_KEY when not set here.
//!     let config = PipelineConfig::builder().build()?;
//!     let history = HistoryStore::open("scan-history.json");
//!     let pipeline = ScanPipeline::new(config, history)?;
//!
//!     let url = "https://example.com/coa/batch-42.pdf";
//!     if let ScanOutcome::Recorded(record) = pipeline.handle_scan(url).await? {
//!         println!("{}", record.extracted_text);
//!         let analyzed = pipeline.run_analysis(&record.url).await?;
//!         println!("{}", analyzed.formatted_analysis());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `coascan` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! coascan = { version = "0.1", default-features = false }
//! ```
//!
//! ## History Format
//!
//! History is a pretty-printed JSON array with camelCase keys, newest scan
//! first, one entry per url:
//!
//! ```json
//! [
//!   {
//!     "url": "https://example.com/coa/batch-42.pdf",
//!     "extractedText": "--- Page 1 ---\n...",
//!     "analysis": "This is a COA for ..."
//!   }
//! ]
//! ```
//!
//! The `analysis` field stores the raw model output; display-time cleanup
//! lives in [`normalize`] and [`ScanRecord::formatted_analysis`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod history;
pub mod pipeline;
pub mod prompts;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use controller::{
    ScanOutcome, ScanPipeline, EXTRACT_FAILED_TEXT, FETCH_FAILED_TEXT, READY_FOR_ANALYSIS,
};
pub use error::ScanError;
pub use gate::ScanGate;
pub use history::{HistoryStore, ScanRecord, DEFAULT_HISTORY_LIMIT};
pub use pipeline::analyze::{
    AnalysisEngine, ChatService, OpenAiChat, ANALYSIS_ERROR_TEXT, ANALYSIS_REQUEST_FAILED,
    NO_RESPONSE_PLACEHOLDER,
};
pub use pipeline::extract::extract_text;
pub use pipeline::fetch::{is_url, DocumentFetcher};
pub use pipeline::normalize::normalize;
pub use state::{advance, PipelineEvent, PipelineState, Stage, StageAction, Transition};
