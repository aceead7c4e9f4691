use std::path::PathBuf;

use crate::error::CalibraError;

/// Batch processing stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStage {
    /// Calibrating files one by one until all master frames are cached.
    Resolving,
    Calibrating,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolving => write!(f, "Loading calibration frames"),
            Self::Calibrating => write!(f, "Calibrating"),
        }
    }
}

/// Thread-safe progress reporting for batch runs.
///
/// Implementors can use this to drive progress bars, logging, or any other
/// UI feedback. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items
    /// in this stage (e.g., file count), if known.
    fn begin_stage(&self, _stage: PipelineStage, _total_items: Option<usize>) {}

    /// Work items completed so far within the current stage.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

/// Reporter that ignores every update.
pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Result of calibrating one input file.
#[derive(Debug)]
pub struct FileOutcome {
    pub input: PathBuf,
    /// Path of the written output, or why the file was abandoned.
    pub result: Result<PathBuf, CalibraError>,
}

/// Per-file results of a batch run, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PathBuf, &CalibraError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.input, e)))
    }
}
