//! Pipeline orchestration.
//!
//! [`ScanPipeline`] owns the gate, the fetcher, the analysis engine, and a
//! history handle, plus one [`PipelineState`] per url. It never encodes the
//! stage order itself: each handler feeds events into
//! [`crate::state::advance`] and executes whatever action comes back, so
//! the sequencing lives entirely in the pure transition table.
//!
//! Every persisted commit first checks the pipeline's cancellation token.
//! After [`ScanPipeline::shutdown`], stages that were already in flight
//! finish their I/O but their results are discarded instead of written.

use crate::config::PipelineConfig;
use crate::error::ScanError;
use crate::gate::ScanGate;
use crate::history::{HistoryStore, ScanRecord};
use crate::pipeline::analyze::{failure_text, AnalysisEngine};
use crate::pipeline::extract;
use crate::pipeline::fetch::DocumentFetcher;
use crate::state::{advance, PipelineEvent, PipelineState, Stage, StageAction};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Analysis text persisted with a fresh extraction, before any analysis.
pub const READY_FOR_ANALYSIS: &str = "Ready for analysis.";

/// Extracted-text stand-in persisted when the document fetch fails.
pub const FETCH_FAILED_TEXT: &str = "Failed to fetch the product details from the URL.";

/// Extracted-text stand-in persisted when the payload cannot be parsed.
pub const EXTRACT_FAILED_TEXT: &str = "Failed to extract text from the document.";

/// What became of one scan or analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The gate (or an in-flight pipeline for the same url) suppressed it.
    Suppressed,
    /// The pipeline was shut down before the result could commit.
    Cancelled,
    /// A record was persisted. Stage failures are recorded too; check the
    /// fields against the fixed failure strings to tell them apart.
    Recorded(ScanRecord),
}

/// The scan-to-analysis pipeline.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ScanPipeline {
    config: PipelineConfig,
    gate: ScanGate,
    fetcher: DocumentFetcher,
    engine: AnalysisEngine,
    history: HistoryStore,
    /// One state per distinct url scanned by this pipeline. Entries stay
    /// for the pipeline's lifetime so [`ScanPipeline::state_of`] keeps
    /// answering for settled flows; each costs the url string plus a
    /// fieldless enum.
    states: Mutex<HashMap<String, PipelineState>>,
    cancel: CancellationToken,
}

impl ScanPipeline {
    pub fn new(config: PipelineConfig, history: HistoryStore) -> Result<Self, ScanError> {
        let fetcher = DocumentFetcher::new(&config)?;
        let gate = ScanGate::new(Duration::from_secs(config.cooldown_secs));
        let engine = AnalysisEngine::new(config.clone());
        Ok(Self {
            config,
            gate,
            fetcher,
            engine,
            history,
            states: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Handle one decoded scan value end to end.
    ///
    /// Gates the value, fetches the document, extracts text, and persists a
    /// record: the extracted text with the ready placeholder on success, or
    /// the fixed failure string for the stage that failed.
    ///
    /// # Errors
    /// `EmptyCode` when the decoded value is empty or whitespace; nothing
    /// is gated or persisted for it. Otherwise only history persistence
    /// problems surface as `Err`; fetch and extraction failures are
    /// recorded, not returned.
    pub async fn handle_scan(&self, decoded: &str) -> Result<ScanOutcome, ScanError> {
        if decoded.trim().is_empty() {
            return Err(ScanError::EmptyCode);
        }
        if !self.gate.admit(decoded) {
            return Ok(ScanOutcome::Suppressed);
        }
        info!("Processing scan: {}", decoded);
        self.drive(decoded, PipelineEvent::ScanAdmitted, None).await
    }

    /// Run the analysis stage for a url that already has extracted text.
    ///
    /// The service reply (or, on failure, the mapped failure string) is
    /// persisted as the record's analysis; the extracted text is untouched.
    /// Re-analysis of an already-analyzed record is allowed and overwrites.
    ///
    /// # Errors
    /// `AnalysisNotReady` when no usable extraction exists for the url,
    /// `Cancelled` after shutdown, or a history persistence failure.
    /// Service failures do NOT error: they come back as a recorded failure
    /// string, exactly like a success.
    pub async fn run_analysis(&self, url: &str) -> Result<ScanRecord, ScanError> {
        let record = self
            .history
            .find(url)
            .ok_or_else(|| ScanError::AnalysisNotReady {
                url: url.to_string(),
            })?;
        if record.extracted_text == FETCH_FAILED_TEXT
            || record.extracted_text == EXTRACT_FAILED_TEXT
        {
            return Err(ScanError::AnalysisNotReady {
                url: url.to_string(),
            });
        }

        // A record from an earlier process run starts Idle here; loading it
        // is a recall, which settles the state analysis can start from.
        if self.state_of(url) == PipelineState::Idle {
            self.apply(
                url,
                PipelineEvent::RecordRecalled {
                    analyzed: record.analysis != READY_FOR_ANALYSIS,
                },
            );
        }

        let outcome = self
            .drive(url, PipelineEvent::AnalysisRequested, Some(record.extracted_text))
            .await?;
        match outcome {
            ScanOutcome::Recorded(updated) => Ok(updated),
            ScanOutcome::Cancelled => Err(ScanError::Cancelled),
            ScanOutcome::Suppressed => Err(ScanError::AnalysisNotReady {
                url: url.to_string(),
            }),
        }
    }

    /// Pure read path: load the stored record for display.
    ///
    /// Nothing is fetched, extracted, or analyzed; the url's display state
    /// settles to `AnalysisComplete` or `ExtractedReady` to match the
    /// record's contents.
    pub fn recall(&self, url: &str) -> Option<ScanRecord> {
        let record = self.history.find(url)?;
        self.apply(
            url,
            PipelineEvent::RecordRecalled {
                analyzed: record.analysis != READY_FOR_ANALYSIS && !record.analysis.is_empty(),
            },
        );
        Some(record)
    }

    /// Scan several decoded values concurrently.
    ///
    /// Pipelines for distinct urls interleave freely; history writes stay
    /// serialized inside the store.
    pub async fn scan_many(
        &self,
        codes: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<ScanOutcome, ScanError>)> {
        stream::iter(codes.iter().cloned().map(|code| async move {
            let outcome = self.handle_scan(&code).await;
            (code, outcome)
        }))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
    }

    /// Where `url`'s pipeline currently stands.
    pub fn state_of(&self, url: &str) -> PipelineState {
        self.lock_states().get(url).copied().unwrap_or_default()
    }

    /// The history store this pipeline writes to.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Discard all in-flight results at their next commit point.
    pub fn shutdown(&self) {
        info!("Scan pipeline shutting down");
        self.cancel.cancel();
    }

    // ── Driver ───────────────────────────────────────────────────────────

    /// Feed events through the transition table, executing each action the
    /// table hands back, until a persist action settles the flow.
    async fn drive(
        &self,
        url: &str,
        first: PipelineEvent,
        preloaded_text: Option<String>,
    ) -> Result<ScanOutcome, ScanError> {
        let mut fetched: Option<Bytes> = None;
        let mut extracted: Option<String> = preloaded_text;
        let mut analysis: Option<String> = None;

        let mut event = first;
        loop {
            let Some(action) = self.apply(url, event) else {
                // The table rejected the event (another pipeline for this
                // url is in flight, or the state cannot accept it).
                return Ok(ScanOutcome::Suppressed);
            };
            debug!("{} -> {:?}", url, action);

            event = match action {
                StageAction::FetchDocument => match self.fetcher.fetch(url).await {
                    Ok(payload) => {
                        fetched = Some(payload);
                        PipelineEvent::FetchSucceeded
                    }
                    Err(e) => {
                        warn!("Fetch failed for {}: {}", url, e);
                        PipelineEvent::FetchFailed
                    }
                },

                StageAction::ExtractText => {
                    let payload = fetched.take().ok_or_else(|| {
                        ScanError::Internal("extraction scheduled without fetched bytes".into())
                    })?;
                    match extract::extract_text(payload, &self.config).await {
                        Ok(text) => {
                            extracted = Some(text);
                            PipelineEvent::ExtractionSucceeded
                        }
                        Err(e) => {
                            warn!("Extraction failed for {}: {}", url, e);
                            PipelineEvent::ExtractionFailed
                        }
                    }
                }

                StageAction::RunAnalysis => {
                    let text = extracted.clone().ok_or_else(|| {
                        ScanError::Internal("analysis scheduled without extracted text".into())
                    })?;
                    match self.engine.request_summary(&text).await {
                        Ok(summary) => {
                            analysis = Some(summary);
                            PipelineEvent::AnalysisDelivered
                        }
                        Err(e) => {
                            warn!("Analysis failed for {}: {}", url, e);
                            analysis = Some(failure_text(&e).to_string());
                            PipelineEvent::AnalysisFailed
                        }
                    }
                }

                StageAction::PersistPartial => {
                    let text = extracted.take().ok_or_else(|| {
                        ScanError::Internal("partial persist without extracted text".into())
                    })?;
                    return self
                        .commit(ScanRecord {
                            url: url.to_string(),
                            extracted_text: text,
                            analysis: READY_FOR_ANALYSIS.to_string(),
                        })
                        .await;
                }

                StageAction::PersistFailure(stage) => {
                    return self
                        .commit(ScanRecord {
                            url: url.to_string(),
                            extracted_text: stage_failure_text(stage).to_string(),
                            analysis: String::new(),
                        })
                        .await;
                }

                StageAction::PersistFinal => {
                    let summary = analysis.take().ok_or_else(|| {
                        ScanError::Internal("final persist without analysis text".into())
                    })?;
                    let extracted_text = extracted.take().ok_or_else(|| {
                        ScanError::Internal("final persist without extracted text".into())
                    })?;
                    return self
                        .commit(ScanRecord {
                            url: url.to_string(),
                            extracted_text,
                            analysis: summary,
                        })
                        .await;
                }
            };
        }
    }

    /// Advance `url`'s state by one event, returning the action to run.
    fn apply(&self, url: &str, event: PipelineEvent) -> Option<StageAction> {
        let mut states = self.lock_states();
        let current = states.get(url).copied().unwrap_or_default();
        let transition = advance(current, event);
        if transition.next != current {
            debug!("{}: {:?} -> {:?} on {:?}", url, current, transition.next, event);
        }
        states.insert(url.to_string(), transition.next);
        transition.action
    }

    /// Persist a record unless the pipeline has been shut down.
    async fn commit(&self, record: ScanRecord) -> Result<ScanOutcome, ScanError> {
        if self.cancel.is_cancelled() {
            debug!("Discarding result for {}: pipeline cancelled", record.url);
            return Ok(ScanOutcome::Cancelled);
        }
        self.history.upsert(record.clone()).await?;
        Ok(ScanOutcome::Recorded(record))
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, PipelineState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The fixed string persisted in a failed stage's place.
pub fn stage_failure_text(stage: Stage) -> &'static str {
    match stage {
        Stage::Fetch => FETCH_FAILED_TEXT,
        Stage::Extract => EXTRACT_FAILED_TEXT,
        Stage::Analyze => crate::pipeline::analyze::ANALYSIS_ERROR_TEXT,
    }
}
