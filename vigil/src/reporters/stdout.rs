use super::Reporter;
use crate::message::LogEntry;
use anyhow::Result;
use async_trait::async_trait;

/// Reporter that prints one line per log entry to stdout.
pub struct StdoutReporter;

impl StdoutReporter {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn format_entry(entry: &LogEntry) -> String {
    let outcome = if entry.success { "OK" } else { "FAILED" };
    // Multi-line download messages are folded onto the entry's line.
    format!(
        "[{}] task {} {} - {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        entry.task_id,
        outcome,
        entry.message.replace('\n', " | ")
    )
}

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, entry: &LogEntry) -> Result<()> {
        println!("{}", format_entry(entry));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}
