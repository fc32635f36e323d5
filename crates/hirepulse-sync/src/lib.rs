//! Collector runs, sentiment enrichment and the run-all orchestrator.

pub mod config;
pub mod enrichment;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod sentiment;

use std::fmt;
use std::str::FromStr;

use hirepulse_adapters::AdapterError;
use hirepulse_storage::SinkError;
use thiserror::Error;

pub use config::{ConfigError, Settings, Tuning};
pub use enrichment::{EnrichmentConfig, EnrichmentPass, EnrichmentSummary};
pub use orchestrator::{
    InProcessLauncher, Orchestrator, RunReport, StageLauncher, StageOutput, StageReport,
    StageState, SubprocessLauncher,
};
pub use pipeline::{run_ingestion, run_stage, IngestionSummary, RunOutcome, StageOutcome};
pub use sentiment::{LexiconModel, PolarityError, PolarityModel};

pub const CRATE_NAME: &str = "hirepulse-sync";

/// One independently runnable unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Web3Career,
    CryptoJobsList,
    Reddit,
    Twitter,
    Sentiment,
}

impl Stage {
    /// Run-all order.
    pub const ALL: [Stage; 5] = [
        Stage::Web3Career,
        Stage::CryptoJobsList,
        Stage::Reddit,
        Stage::Twitter,
        Stage::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web3Career => "web3career",
            Self::CryptoJobsList => "cryptojobslist",
            Self::Reddit => "reddit",
            Self::Twitter => "twitter",
            Self::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = Stage::ALL.iter().map(Stage::as_str).collect();
                format!("unknown stage `{s}` (expected one of: {})", names.join(", "))
            })
    }
}

/// Errors that stop a stage before or outside its record loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store unavailable: {0}")]
    Store(#[from] SinkError),
    #[error("authentication failed: {0}")]
    Auth(#[source] AdapterError),
    #[error("http client setup failed: {0:#}")]
    HttpClient(anyhow::Error),
    #[error(transparent)]
    Polarity(#[from] PolarityError),
}

/// What a failure means for the process.
///
/// | failure                        | disposition                   |
/// |--------------------------------|-------------------------------|
/// | configuration, store, auth     | `Abort`                       |
/// | transient fetch                | `EndRun { success: true }`    |
/// | malformed or refused fetch     | `EndRun { success: false }`   |
/// | failed or timed out stage      | `HaltSequence`                |
///
/// Record-level problems (canonical skips, insert conflicts or failures,
/// update mismatches) never surface as errors; they are counted in the
/// stage summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Abort,
    EndRun { success: bool },
    HaltSequence,
}

impl Disposition {
    /// Every stage-level error aborts the stage process. Listed per variant
    /// so a new kind of failure has to be placed in the table.
    pub fn for_pipeline(err: &PipelineError) -> Self {
        match err {
            PipelineError::Config(_)
            | PipelineError::Store(_)
            | PipelineError::Auth(_)
            | PipelineError::HttpClient(_)
            | PipelineError::Polarity(_) => Self::Abort,
        }
    }

    pub fn for_fetch(err: &AdapterError) -> Self {
        Self::EndRun {
            success: err.is_transient(),
        }
    }

    pub fn for_stage(state: StageState) -> Option<Self> {
        match state {
            StageState::Failed | StageState::TimedOut => Some(Self::HaltSequence),
            StageState::Pending | StageState::Running | StageState::Succeeded => None,
        }
    }
}
