//! Text extraction from fetched PDF bytes.
//!
//! ## Why spawn_blocking?
//!
//! `lopdf` parses the whole document synchronously: xref table, object
//! streams, per-page content decoding. On a multi-megabyte COA that is
//! milliseconds of pure CPU, enough to stall a Tokio worker thread.
//! `tokio::task::spawn_blocking` moves the parse onto the blocking pool so
//! other pipelines keep making progress.
//!
//! ## Why only the first pages?
//!
//! Certificates of Analysis front-load the useful content: product name,
//! potency table, pass/fail panels. Later pages are chromatograms and lab
//! accreditation boilerplate. Capping pages (and capping total characters
//! once, after concatenation) keeps the analysis prompt focused and the
//! token spend bounded.

use crate::config::PipelineConfig;
use crate::error::ScanError;
use bytes::Bytes;
use lopdf::Document;
use tracing::{debug, warn};

/// Extract bounded text from a fetched document.
///
/// Processes at most `config.max_pages` pages, ascending from page 1. Each
/// page contributes a `--- Page {n} ---` header, its text items joined with
/// single spaces, and a trailing blank line. The concatenation is then cut
/// to the first `config.max_chars` characters.
///
/// A page whose content cannot be decoded contributes an empty body and the
/// remaining pages are still processed; only a payload that is not a PDF at
/// all, or whose structure cannot be parsed, is an error.
pub async fn extract_text(bytes: Bytes, config: &PipelineConfig) -> Result<String, ScanError> {
    let max_pages = config.max_pages;
    let max_chars = config.max_chars;

    let result =
        tokio::task::spawn_blocking(move || extract_text_blocking(&bytes, max_pages, max_chars))
            .await
            .map_err(|e| ScanError::Internal(format!("Extraction task panicked: {}", e)))?;

    result
}

/// Blocking implementation of text extraction.
fn extract_text_blocking(
    bytes: &[u8],
    max_pages: usize,
    max_chars: usize,
) -> Result<String, ScanError> {
    let mut magic = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        magic[i] = *b;
    }
    if &magic != b"%PDF" {
        return Err(ScanError::NotAPdf { magic });
    }

    let doc = Document::load_mem(bytes).map_err(|e| ScanError::Extraction {
        detail: e.to_string(),
    })?;

    let total = doc.get_pages().len();
    let take = total.min(max_pages) as u32;
    debug!("PDF loaded: {} pages, extracting {}", total, take);

    let mut out = String::new();
    for page in 1..=take {
        let text = match doc.extract_text(&[page]) {
            Ok(raw) => raw.split_whitespace().collect::<Vec<_>>().join(" "),
            Err(e) => {
                warn!("Page {} unreadable, kept empty: {}", page, e);
                String::new()
            }
        };
        out.push_str(&format!("--- Page {} ---\n{}\n\n", page, text));
    }

    Ok(truncate_chars(&out, max_chars))
}

/// Cut a string to at most `max` characters, on a char boundary.
fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
