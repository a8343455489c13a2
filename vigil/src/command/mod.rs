//! Protocol-specific probe executors.
//!
//! Each command runs up to N attempts, classifies every attempt as success,
//! timeout (a clean failure) or error (an exception, whose message is kept),
//! and folds them into one result. Attempt failures never escape a command.
pub mod connect;
pub mod download;
pub mod file_name;
pub mod ping;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use connect::{ConnectCommand, ConnectResult, Connector, TcpConnector};
pub use download::{DownloadCommand, DownloadResult, HttpHop};
pub use ping::{PingCommand, PingReply, PingResult, Pinger, SystemPinger};

/// Outcome of a single attempt inside a command.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl AttemptResult {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
            error: None,
        }
    }

    pub fn timeout(elapsed: Duration) -> Self {
        Self {
            success: false,
            elapsed,
            error: None,
        }
    }

    pub fn error(elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            elapsed,
            error: Some(error.into()),
        }
    }
}

/// Running tally over the attempts a command actually executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptStats {
    pub attempts: u32,
    pub successful_attempts: u32,
    pub timeout_attempts: u32,
    pub error_attempts: u32,
    pub last_error: Option<String>,
    success_time: Duration,
}

impl AttemptStats {
    pub fn record(&mut self, attempt: &AttemptResult) {
        self.attempts += 1;
        if attempt.success {
            self.successful_attempts += 1;
            self.success_time += attempt.elapsed;
        } else if let Some(error) = &attempt.error {
            self.error_attempts += 1;
            self.last_error = Some(error.clone());
        } else {
            self.timeout_attempts += 1;
        }
    }

    pub fn success(&self) -> bool {
        self.successful_attempts > 0
    }

    /// Mean elapsed time of the successful attempts, zero without any.
    pub fn average_time(&self) -> Duration {
        if self.successful_attempts == 0 {
            return Duration::ZERO;
        }
        self.success_time / self.successful_attempts
    }
}

impl FromIterator<AttemptResult> for AttemptStats {
    fn from_iter<I: IntoIterator<Item = AttemptResult>>(iter: I) -> Self {
        let mut stats = AttemptStats::default();
        for attempt in iter {
            stats.record(&attempt);
        }
        stats
    }
}

/// The command selected by a task's kind, ready to run.
pub enum Command {
    Connect(ConnectCommand),
    Ping(PingCommand),
    Download(DownloadCommand),
}

impl Command {
    pub async fn execute(&self, cancel: &CancellationToken) -> CommandResult {
        match self {
            Command::Connect(command) => CommandResult::Connect(command.execute(cancel).await),
            Command::Ping(command) => CommandResult::Ping(command.execute(cancel).await),
            Command::Download(command) => CommandResult::Download(command.execute(cancel).await),
        }
    }
}

/// Result of whichever command a task's kind selected.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Connect(ConnectResult),
    Ping(PingResult),
    Download(DownloadResult),
}

impl CommandResult {
    pub fn success(&self) -> bool {
        match self {
            CommandResult::Connect(result) => result.success(),
            CommandResult::Ping(result) => result.success(),
            CommandResult::Download(result) => result.success(),
        }
    }
}
