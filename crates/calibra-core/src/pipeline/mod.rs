mod orchestrator;
mod types;

pub use orchestrator::{output_path, run_batch};
pub use types::{BatchReport, FileOutcome, NoOpReporter, PipelineStage, ProgressReporter};
