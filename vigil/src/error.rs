use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Failures that end a probe before a command result exists.
///
/// Attempt-level failures never show up here: commands fold them into their
/// aggregate result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },
    #[error("probe did not finish within {budget:?}")]
    BudgetExceeded { budget: Duration },
    #[error("probe failed: {0}")]
    Fatal(String),
    #[error("probe cancelled")]
    Cancelled,
    #[error("file system error: {0}")]
    FileSystem(String),
}

impl ProbeError {
    /// Fatal failures caused by running out of time are reported as timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProbeError::BudgetExceeded { .. })
    }
}

/// Walks an error chain down to its innermost source and renders it.
pub fn root_cause(err: &(dyn StdError + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
