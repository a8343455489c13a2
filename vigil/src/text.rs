//! User-facing texts of log entries.
use reqwest::StatusCode;
use std::time::Duration;

use crate::command::{ConnectResult, DownloadResult, PingResult};
use crate::error::ProbeError;
use crate::message::TaskKind;

pub const REDIRECT_INVALID: &str = " (invalid)";
pub const REDIRECT_LIMIT: &str = " (max number of redirects exceeded)";

pub fn http_status(status: StatusCode) -> String {
    format!("HTTP {}", status)
}

pub fn redirect(status: StatusCode, location: &str) -> String {
    format!("HTTP {} redirect to {}", status, location)
}

pub fn no_probe(kind: TaskKind) -> String {
    format!("No probe available for task kind {}", kind)
}

/// Failure before or around the command, e.g. resolution or budget.
pub fn probe_failed(kind: TaskKind, host: &str, error: &ProbeError) -> String {
    match error {
        ProbeError::Resolution { host, reason } => {
            format!("Failed to resolve {}: {}", host, reason)
        }
        ProbeError::BudgetExceeded { budget } => format!(
            "{} of {} timed out after {}",
            capitalized(kind),
            host,
            millis(*budget)
        ),
        other => format!("{} of {} failed: {}", capitalized(kind), host, other),
    }
}

pub fn connect(host: &str, port: u16, result: &ConnectResult) -> String {
    let stats = &result.stats;
    if result.success() {
        return format!(
            "Connection to {}:{} successful. {} of {} attempts succeeded, average time {}",
            host,
            port,
            stats.successful_attempts,
            stats.attempts,
            millis(stats.average_time())
        );
    }

    let mut message = format!(
        "Connection to {}:{} failed. {} attempts, {} timed out, {} failed",
        host, port, stats.attempts, stats.timeout_attempts, stats.error_attempts
    );
    if let Some(error) = &stats.last_error {
        message.push_str(&format!(". Last error: {}", error));
    }
    message
}

pub fn ping(host: &str, result: &PingResult) -> String {
    let stats = &result.stats;
    let packets = &result.last_parse;
    if result.success() {
        return format!(
            "Ping to {} successful. {} of {} attempts succeeded, average time {:.3} ms, packet loss {}%",
            host,
            stats.successful_attempts,
            stats.attempts,
            result.average_time(),
            packets.packet_loss()
        );
    }

    let mut message = format!("Ping to {} failed after {} attempts", host, stats.attempts);
    if let Some(code) = result.return_code {
        message.push_str(&format!(", return code {}", code));
    }
    if packets.is_valid_input() {
        message.push_str(&format!(", packet loss {}%", packets.packet_loss()));
    }
    if let Some(error) = &stats.last_error {
        message.push_str(&format!(". Last error: {}", error));
    }
    message
}

pub fn download(result: &DownloadResult) -> String {
    let mut lines = Vec::new();

    if result.success() {
        lines.push(format!(
            "Download of {} successful, {} bytes in {}",
            result.url,
            result.bytes,
            millis(result.stats.average_time())
        ));
    } else if result.stopped {
        lines.push(format!("Download of {} stopped", result.url));
    } else if result.timed_out {
        lines.push(format!("Download of {} timed out", result.url));
    } else if !result.connect_success {
        lines.push(format!("Connection to {} failed", result.url));
    } else {
        lines.push(format!("Download of {} failed", result.url));
    }

    lines.extend(result.hops.iter().map(|hop| hop.message.clone()));

    if let Some(name) = &result.file_name {
        let state = if !result.file_exists {
            "was not created".to_string()
        } else if !result.delete_attempted {
            "was kept".to_string()
        } else if result.delete_success {
            "was deleted".to_string()
        } else {
            match &result.delete_error {
                Some(error) => format!("could not be deleted: {}", error),
                None => "could not be deleted".to_string(),
            }
        };
        lines.push(format!("File {} {}", name, state));
    }
    if let Some(error) = &result.error {
        lines.push(format!("Error: {}", error));
    }
    lines.join("\n")
}

fn millis(duration: Duration) -> String {
    format!("{} ms", duration.as_millis())
}

fn capitalized(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Ping => "Ping",
        TaskKind::Connect => "Connect",
        TaskKind::Download => "Download",
        TaskKind::None => "Probe",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AttemptResult, AttemptStats, HttpHop};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connect_failure_names_last_error() {
        let result = ConnectResult {
            stats: vec![
                AttemptResult::timeout(Duration::from_secs(1)),
                AttemptResult::error(Duration::ZERO, "Connection refused"),
            ]
            .into_iter()
            .collect::<AttemptStats>(),
        };

        assert_eq!(
            connect("example.com", 443, &result),
            "Connection to example.com:443 failed. 2 attempts, 1 timed out, 1 failed. Last error: Connection refused"
        );
    }

    #[test]
    fn test_connect_success() {
        let result = ConnectResult {
            stats: vec![AttemptResult::success(Duration::from_millis(12))]
                .into_iter()
                .collect::<AttemptStats>(),
        };

        assert_eq!(
            connect("example.com", 80, &result),
            "Connection to example.com:80 successful. 1 of 1 attempts succeeded, average time 12 ms"
        );
    }

    #[test]
    fn test_budget_exceeded_reads_as_timeout() {
        let message = probe_failed(
            TaskKind::Ping,
            "example.com",
            &ProbeError::BudgetExceeded {
                budget: Duration::from_secs(2),
            },
        );
        assert_eq!(message, "Ping of example.com timed out after 2000 ms");
    }

    #[test]
    fn test_download_lists_hops() {
        let result = DownloadResult {
            url: "http://example.com/".to_string(),
            hops: vec![HttpHop {
                status: 404,
                message: "HTTP 404 Not Found".to_string(),
            }],
            connect_success: true,
            valid: true,
            ..DownloadResult::default()
        };

        assert_eq!(
            download(&result),
            "Download of http://example.com/ failed\nHTTP 404 Not Found"
        );
    }

    #[test]
    fn test_download_file_states() {
        let mut result = DownloadResult {
            url: "http://example.com/a.txt".to_string(),
            file_name: Some("a.txt".to_string()),
            file_exists: true,
            connect_success: true,
            download_success: true,
            valid: true,
            ..DownloadResult::default()
        };
        assert!(download(&result).ends_with("File a.txt was kept"));

        result.delete_attempted = true;
        result.delete_success = true;
        assert!(download(&result).ends_with("File a.txt was deleted"));

        result.delete_success = false;
        result.delete_error = Some("file system error: permission denied".to_string());
        assert!(
            download(&result)
                .ends_with("File a.txt could not be deleted: file system error: permission denied")
        );
    }

    #[test]
    fn test_redirect_text() {
        let mut message = redirect(StatusCode::FOUND, "/next");
        message.push_str(REDIRECT_LIMIT);
        assert_eq!(
            message,
            "HTTP 302 Found redirect to /next (max number of redirects exceeded)"
        );
    }
}
