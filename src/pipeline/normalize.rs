//! Normalization of raw analysis text for structured rendering.
//!
//! ## Why is normalization necessary?
//!
//! Chat models pad their markdown with uneven vertical whitespace: a heading
//! followed by two blank lines here, four consecutive blank lines there,
//! Windows line endings when the service proxies through certain stacks.
//! Rendered as-is the summary looks ragged and wastes half the screen.
//!
//! This module applies a handful of cheap, deterministic rules that fix the
//! spacing without touching content. The raw service reply is what gets
//! persisted; [`normalize`] runs at read time, so improving these rules
//! retroactively improves every stored record.
//!
//! The transform is pure and idempotent: `normalize(normalize(x)) ==
//! normalize(x)` for any input, so it is safe to apply on every read even
//! when an upstream layer already applied it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalize raw analysis text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF and bare CR to LF)
/// 2. Trim trailing whitespace per line
/// 3. Pull content up against its heading: a `#`-heading or a bold
///    `**Label:**` line loses any blank lines that follow it
/// 4. Collapse runs of 2+ blank lines down to a single blank line
/// 5. Trim leading and trailing whitespace from the whole text
pub fn normalize(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = tighten_heading_gaps(&s);
    let s = collapse_blank_runs(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────
//
// Runs before the gap rules so that "blank" lines containing stray spaces
// still count as blank for the regexes below.

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Tighten heading gaps ─────────────────────────────────────────────
//
// A heading is 1-6 `#` followed by a space, or a whole-line bold label
// ending in a colon (`**Potency:**` or `**Potency**:`). Any blank lines
// between it and the next content are dropped so the label sits directly
// above what it labels.

static RE_HEADING_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,6} [^\n]*)\n{2,}").unwrap());

static RE_LABEL_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(\*\*[^*\n]+?(?::\*\*|\*\*:))\n{2,}").unwrap());

fn tighten_heading_gaps(input: &str) -> String {
    let s = RE_HEADING_GAP.replace_all(input, "$1\n");
    RE_LABEL_GAP.replace_all(&s, "$1\n").to_string()
}

// ── Rule 4: Collapse blank-line runs ─────────────────────────────────────────

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
