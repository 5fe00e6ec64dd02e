//! Pipeline state machine.
//!
//! Transitions are pure data: [`advance`] maps a `(state, event)` pair to
//! the next state plus at most one [`StageAction`] for the caller to
//! execute. The controller owns the side effects (fetching, extracting,
//! persisting, analyzing) and feeds the resulting events back in; this
//! module never touches I/O, which keeps every transition unit-testable
//! with plain assertions.
//!
//! Unknown `(state, event)` combinations are inert: the state is returned
//! unchanged with no action. Late or duplicate events (a second scan while
//! one is extracting, a stale completion after a recall) therefore cannot
//! corrupt the machine.

/// The pipeline stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Extract,
    Analyze,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Extract => write!(f, "extraction"),
            Stage::Analyze => write!(f, "analysis"),
        }
    }
}

/// Where one url's pipeline currently stands.
///
/// `Failed` is a settled state like `ExtractedReady` or `AnalysisComplete`:
/// a new scan may start from it, and `Failed(Stage::Analyze)` additionally
/// accepts a re-analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Extracting,
    ExtractedReady,
    Analyzing,
    AnalysisComplete,
    Failed(Stage),
}

impl PipelineState {
    /// True when no stage is in flight and a new scan may begin.
    pub fn is_settled(&self) -> bool {
        !matches!(self, PipelineState::Extracting | PipelineState::Analyzing)
    }
}

/// Everything that can happen to one url's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The gate admitted a scan of this url.
    ScanAdmitted,
    /// Document bytes arrived.
    FetchSucceeded,
    /// The fetch failed (transport, status, or timeout).
    FetchFailed,
    /// Extraction produced text.
    ExtractionSucceeded,
    /// The payload could not be parsed.
    ExtractionFailed,
    /// The user asked for analysis of the extracted text.
    AnalysisRequested,
    /// The analysis service produced a summary (or a usable placeholder).
    AnalysisDelivered,
    /// The analysis stage produced only a mapped failure string.
    AnalysisFailed,
    /// A stored record was selected from history for display.
    RecordRecalled { analyzed: bool },
}

/// The single side effect the controller must run after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAction {
    FetchDocument,
    ExtractText,
    /// Persist the extracted text with the ready placeholder as analysis.
    PersistPartial,
    /// Persist the fixed failure string for the given stage.
    PersistFailure(Stage),
    RunAnalysis,
    /// Persist the final record with the delivered (or mapped) analysis.
    PersistFinal,
}

/// Result of one [`advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: PipelineState,
    pub action: Option<StageAction>,
}

impl Transition {
    fn to(next: PipelineState, action: StageAction) -> Self {
        Transition {
            next,
            action: Some(action),
        }
    }

    fn stay(state: PipelineState) -> Self {
        Transition {
            next: state,
            action: None,
        }
    }
}

/// Advance one url's pipeline by one event.
pub fn advance(state: PipelineState, event: PipelineEvent) -> Transition {
    use PipelineEvent as E;
    use PipelineState as S;

    match (state, event) {
        // A new scan may start from any settled state.
        (s, E::ScanAdmitted) if s.is_settled() => {
            Transition::to(S::Extracting, StageAction::FetchDocument)
        }

        (S::Extracting, E::FetchSucceeded) => Transition::to(S::Extracting, StageAction::ExtractText),
        (S::Extracting, E::FetchFailed) => Transition::to(
            S::Failed(Stage::Fetch),
            StageAction::PersistFailure(Stage::Fetch),
        ),
        (S::Extracting, E::ExtractionSucceeded) => {
            Transition::to(S::ExtractedReady, StageAction::PersistPartial)
        }
        (S::Extracting, E::ExtractionFailed) => Transition::to(
            S::Failed(Stage::Extract),
            StageAction::PersistFailure(Stage::Extract),
        ),

        // Analysis runs off fresh extractions, completed records
        // (re-analysis), and failed analyses (retry).
        (
            S::ExtractedReady | S::AnalysisComplete | S::Failed(Stage::Analyze),
            E::AnalysisRequested,
        ) => Transition::to(S::Analyzing, StageAction::RunAnalysis),

        (S::Analyzing, E::AnalysisDelivered) => {
            Transition::to(S::AnalysisComplete, StageAction::PersistFinal)
        }
        (S::Analyzing, E::AnalysisFailed) => Transition::to(
            S::Failed(Stage::Analyze),
            StageAction::PersistFinal,
        ),

        // Selecting a record from history is a pure read: it puts the
        // display into the matching settled state without running anything.
        (s, E::RecordRecalled { analyzed }) if s.is_settled() => Transition {
            next: if analyzed {
                S::AnalysisComplete
            } else {
                S::ExtractedReady
            },
            action: None,
        },

        // Everything else is inert.
        (s, _) => Transition::stay(s),
    }
}
