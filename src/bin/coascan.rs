//! CLI binary for coascan.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints scan results.

use anyhow::{Context, Result};
use clap::Parser;
use coascan::{
    is_url, HistoryStore, PipelineConfig, ScanOutcome, ScanPipeline, EXTRACT_FAILED_TEXT,
    FETCH_FAILED_TEXT,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Scan one code: fetch the COA, extract text, store the record
  coascan https://example.com/coa/batch-42.pdf

  # Scan and summarize in one go
  coascan --analyze https://example.com/coa/batch-42.pdf

  # Several codes, four pipelines at a time
  coascan --analyze -c 4 https://a.example/1.pdf https://b.example/2.pdf

  # Route fetches through a relay that takes the target as one parameter
  coascan --relay "https://relay.example.com/fetch?url=" https://host/coa.pdf

  # Re-run analysis for a stored record (no fetch)
  coascan --reanalyze https://example.com/coa/batch-42.pdf

  # Inspect history
  coascan --list
  coascan --show https://example.com/coa/batch-42.pdf
  coascan --show https://example.com/coa/batch-42.pdf --raw

  # Remove a record
  coascan --delete https://example.com/coa/batch-42.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        API key for the analysis endpoint
  COASCAN_API_BASE      Chat-completions base URL (any OpenAI-compatible host)
  COASCAN_MODEL         Model ID (default: gpt-4.1-mini)
  COASCAN_HISTORY       History file path
  COASCAN_RELAY         Relay endpoint prefix
  COASCAN_TEMPLATE      Path to a custom analysis prompt template

SETUP:
  1. Set API key:    export OPENAI_API_KEY=sk-...
  2. Scan:           coascan --analyze https://example.com/coa.pdf
  3. Review later:   coascan --list

Scans are stored without analysis unless --analyze is passed; run
`coascan --reanalyze <url>` any time afterwards. Failed fetches and
unreadable documents are stored too, with a fixed failure message in
place of the extracted text.
"#;

/// Scan COA links, extract their text, and summarize them with a chat model.
#[derive(Parser, Debug)]
#[command(
    name = "coascan",
    version,
    about = "Scan COA links, extract their text, and summarize them with a chat model",
    long_about = "Takes decoded QR values (HTTP/HTTPS links to Certificate of Analysis \
documents), fetches each PDF, extracts text from its leading pages, and keeps every scan \
in a local JSON history. Analysis sends the extracted text to an OpenAI-compatible \
chat-completions endpoint and stores the summary on the same record.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Decoded QR values to scan (HTTP/HTTPS urls).
    urls: Vec<String>,

    /// Run the analysis stage right after each successful scan.
    #[arg(short, long, env = "COASCAN_ANALYZE")]
    analyze: bool,

    /// Re-run analysis for an already stored url, without fetching.
    #[arg(long, value_name = "URL")]
    reanalyze: Option<String>,

    /// Print stored history, newest scan first.
    #[arg(long)]
    list: bool,

    /// Print one stored record in full.
    #[arg(long, value_name = "URL")]
    show: Option<String>,

    /// With --show: print the analysis exactly as stored, skipping the
    /// display cleanup pass.
    #[arg(long, requires = "show")]
    raw: bool,

    /// Remove one stored record.
    #[arg(long, value_name = "URL")]
    delete: Option<String>,

    /// History file path.
    #[arg(long, env = "COASCAN_HISTORY", default_value = "scan-history.json")]
    history_file: PathBuf,

    /// Keep at most this many records, oldest dropped first; 0 disables the cap.
    #[arg(long, env = "COASCAN_HISTORY_LIMIT", default_value_t = coascan::DEFAULT_HISTORY_LIMIT)]
    history_limit: usize,

    /// Relay endpoint prefix for document fetches.
    #[arg(
        long,
        env = "COASCAN_RELAY",
        long_help = "Relay endpoint prefix for document fetches. The target url is appended \
form-encoded, so the relay sees it as a single parameter:\n\
  --relay \"https://relay.example.com/fetch?url=\"\n\
Useful when COA hosts refuse direct fetches."
    )]
    relay: Option<String>,

    /// Chat model ID.
    #[arg(long, env = "COASCAN_MODEL")]
    model: Option<String>,

    /// Chat-completions base URL (any OpenAI-compatible endpoint).
    #[arg(long, env = "COASCAN_API_BASE")]
    api_base: Option<String>,

    /// Path to a plain-text analysis prompt template.
    #[arg(long, env = "COASCAN_TEMPLATE")]
    template: Option<PathBuf>,

    /// Pages extracted from the front of each document.
    #[arg(long, env = "COASCAN_MAX_PAGES", default_value_t = 5)]
    max_pages: usize,

    /// Cap on extracted characters per document, applied after all pages.
    #[arg(long, env = "COASCAN_MAX_CHARS", default_value_t = 5000)]
    max_chars: usize,

    /// Sampling temperature (0.0-2.0).
    #[arg(long, env = "COASCAN_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max tokens in the analysis reply.
    #[arg(long, env = "COASCAN_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// Document download timeout in seconds.
    #[arg(long, env = "COASCAN_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,

    /// Analysis call timeout in seconds.
    #[arg(long, env = "COASCAN_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Number of scans processed at once.
    #[arg(short, long, env = "COASCAN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Disable the progress spinner.
    #[arg(long, env = "COASCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "COASCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and results.
    #[arg(short, long, env = "COASCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active; result
    // lines carry all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── History-only modes (no pipeline, no API key needed) ──────────────
    let limit = if cli.history_limit == 0 {
        None
    } else {
        Some(cli.history_limit)
    };
    let history = HistoryStore::with_limit(&cli.history_file, limit);

    if cli.list {
        return print_history(&history);
    }
    if let Some(ref url) = cli.show {
        return show_record(&history, url, cli.raw);
    }
    if let Some(ref url) = cli.delete {
        let removed = history
            .delete(url)
            .await
            .context("Failed to update the history file")?;
        if removed {
            eprintln!("{} removed {}", green("✔"), bold(url));
        } else {
            eprintln!("{} no record for {}", cyan("⚠"), bold(url));
        }
        return Ok(());
    }

    // ── Build pipeline ───────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let pipeline =
        ScanPipeline::new(config, history).context("Failed to initialize the pipeline")?;

    if let Some(ref url) = cli.reanalyze {
        let record = pipeline
            .run_analysis(url)
            .await
            .with_context(|| format!("Analysis of '{url}' failed"))?;
        println!("{}", record.formatted_analysis());
        return Ok(());
    }

    if cli.urls.is_empty() {
        anyhow::bail!(
            "Nothing to do: pass urls to scan, or one of --list, --show, --delete, --reanalyze"
        );
    }
    for url in &cli.urls {
        if !is_url(url) {
            anyhow::bail!("Not an HTTP(S) url: '{}'", url);
        }
    }

    // ── Scan ─────────────────────────────────────────────────────────────
    let spinner = if show_progress {
        Some(scan_spinner(cli.urls.len()))
    } else {
        None
    };

    let outcomes = pipeline.scan_many(&cli.urls, cli.concurrency).await;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let mut recorded = 0usize;
    let mut failed = 0usize;
    let mut storage_errors = 0usize;
    for (url, outcome) in &outcomes {
        match outcome {
            Ok(ScanOutcome::Recorded(record)) => {
                if record.extracted_text == FETCH_FAILED_TEXT
                    || record.extracted_text == EXTRACT_FAILED_TEXT
                {
                    failed += 1;
                    eprintln!("  {} {}  {}", red("✗"), bold(url), red(&record.extracted_text));
                } else {
                    recorded += 1;
                    eprintln!(
                        "  {} {}  {}",
                        green("✓"),
                        bold(url),
                        dim(&format!(
                            "{} chars extracted",
                            record.extracted_text.chars().count()
                        ))
                    );
                }
            }
            Ok(ScanOutcome::Suppressed) => {
                eprintln!("  {} {}  {}", cyan("⚠"), bold(url), dim("suppressed (cooldown)"));
            }
            Ok(ScanOutcome::Cancelled) => {
                eprintln!("  {} {}  {}", cyan("⚠"), bold(url), dim("cancelled"));
            }
            Err(e) => {
                storage_errors += 1;
                eprintln!("  {} {}  {}", red("✗"), bold(url), red(&e.to_string()));
            }
        }
    }

    // ── Analyze ──────────────────────────────────────────────────────────
    if cli.analyze {
        for (url, outcome) in &outcomes {
            let Ok(ScanOutcome::Recorded(record)) = outcome else {
                continue;
            };
            if record.extracted_text == FETCH_FAILED_TEXT
                || record.extracted_text == EXTRACT_FAILED_TEXT
            {
                continue;
            }
            match pipeline.run_analysis(url).await {
                Ok(updated) => {
                    println!("{} {}", cyan("◆"), bold(url));
                    println!("{}\n", updated.formatted_analysis());
                }
                Err(e) => {
                    storage_errors += 1;
                    eprintln!("  {} {}  {}", red("✗"), bold(url), red(&e.to_string()));
                }
            }
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} scans recorded{}",
            if failed == 0 && storage_errors == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&recorded.to_string()),
            outcomes.len(),
            if failed > 0 {
                format!("  ({} recorded as failed)", red(&failed.to_string()))
            } else {
                String::new()
            },
        );
    }

    if storage_errors > 0 {
        anyhow::bail!("{} operation(s) failed; see errors above", storage_errors);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_pages(cli.max_pages)
        .max_chars(cli.max_chars)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .fetch_timeout_secs(cli.fetch_timeout)
        .api_timeout_secs(cli.api_timeout)
        .history_limit(if cli.history_limit == 0 {
            None
        } else {
            Some(cli.history_limit)
        });

    if let Some(ref relay) = cli.relay {
        builder = builder.relay_endpoint(relay.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref base) = cli.api_base {
        builder = builder.api_base(base.clone());
    }
    if let Some(ref path) = cli.template {
        builder = builder.template_path(path.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Print the history list, newest first, one numbered line per record.
fn print_history(history: &HistoryStore) -> Result<()> {
    let records = history.load_all();
    if records.is_empty() {
        eprintln!("{}", dim("History is empty."));
        return Ok(());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (i, record) in records.iter().enumerate() {
        writeln!(out, "{:>3}. {}", i + 1, bold(&record.url))?;
        writeln!(out, "     {}", dim(&preview(&record.analysis, 72)))?;
    }
    Ok(())
}

/// Print one record: extracted text, then the analysis.
fn show_record(history: &HistoryStore, url: &str, raw: bool) -> Result<()> {
    let Some(record) = history.find(url) else {
        anyhow::bail!("No record for '{}'", url);
    };

    println!("{}", bold(&record.url));
    println!();
    println!("{}", record.extracted_text);
    println!();
    if raw {
        println!("{}", record.analysis);
    } else {
        println!("{}", record.formatted_analysis());
    }
    Ok(())
}

/// First line of `text`, truncated to `max` characters.
fn preview(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max).collect();
        format!("{truncated}\u{2026}")
    }
}

fn scan_spinner(total: usize) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Scanning");
    bar.set_message(format!("{total} code(s)"));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
