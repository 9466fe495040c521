//! Harness error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to write log output: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario `{scenario}` failed: {reason}")]
    ScenarioFailed {
        scenario: &'static str,
        reason: String,
    },
    #[error("stress worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}
