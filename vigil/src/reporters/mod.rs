mod file;
mod stdout;

use crate::{config::Config, message::LogEntry};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub use file::FileReporter;
pub use stdout::StdoutReporter;

/// Sink for the log entries produced by probes.
///
/// Each reporter handles its own errors; a failing reporter never keeps the
/// others from receiving an entry.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, entry: &LogEntry) -> Result<()>;

    /// Returns the name of this reporter for logging purposes.
    fn name(&self) -> &'static str;
}

pub fn create_enabled_reporters(conf: &Config) -> Vec<Box<dyn Reporter>> {
    let mut reporters: Vec<Box<dyn Reporter>> = Vec::new();

    if conf.reporter.enable_stdout {
        reporters.push(Box::new(StdoutReporter::new()));
    }

    if let Some(ref file_path) = conf.reporter.file_path {
        reporters.push(Box::new(FileReporter::new(PathBuf::from(file_path))));
    }

    reporters
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enabled_reporters() {
        let mut conf = Config::default();
        let names: Vec<_> = create_enabled_reporters(&conf)
            .iter()
            .map(|reporter| reporter.name())
            .collect();
        assert_eq!(names, vec!["stdout"]);

        conf.reporter.enable_stdout = false;
        conf.reporter.file_path = Some("/tmp/vigil.jsonl".to_string());
        let names: Vec<_> = create_enabled_reporters(&conf)
            .iter()
            .map(|reporter| reporter.name())
            .collect();
        assert_eq!(names, vec!["file"]);
    }
}
