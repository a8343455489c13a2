use async_trait::async_trait;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{AttemptResult, AttemptStats};
use crate::config::PingConfig;
use crate::error::root_cause;
use crate::parser::PingOutputParser;

/// Exit code and combined output of one ping invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingReply {
    pub code: Option<i32>,
    pub output: String,
}

/// Runs one invocation of a ping program.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, addr: IpAddr, timeout: Duration) -> std::io::Result<PingReply>;
}

/// Pinger backed by the system `ping` binary.
///
/// The child is killed if the surrounding future is dropped, which is how an
/// aborted worker run stops an in-flight invocation.
pub struct SystemPinger {
    program: String,
    packet_count: u32,
    packet_size: Option<u32>,
}

impl SystemPinger {
    pub fn new(config: &PingConfig) -> Self {
        Self {
            program: config.program.clone(),
            packet_count: config.packet_count.max(1),
            packet_size: config.packet_size,
        }
    }

    fn args(&self, addr: IpAddr, timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            self.packet_count.to_string(),
            "-W".to_string(),
            timeout.as_secs().max(1).to_string(),
        ];
        if let Some(size) = self.packet_size {
            args.push("-s".to_string());
            args.push(size.to_string());
        }
        args.push(addr.to_string());
        args
    }
}

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(&self, addr: IpAddr, timeout: Duration) -> std::io::Result<PingReply> {
        let output = Command::new(&self.program)
            .args(self.args(addr, timeout))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(PingReply {
            code: output.status.code(),
            output: text,
        })
    }
}

/// Aggregate of a ping probe.
///
/// `return_code`, `output` and `last_parse` come from the attempt that ended
/// the loop. Packet times are collected across all attempts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingResult {
    pub stats: AttemptStats,
    pub return_code: Option<i32>,
    pub output: String,
    pub last_parse: PingOutputParser,
    packet_times: Vec<f64>,
}

impl PingResult {
    pub fn success(&self) -> bool {
        self.stats.success()
    }

    /// Mean of the valid per-packet times in milliseconds, zero if none were seen.
    pub fn average_time(&self) -> f64 {
        if self.packet_times.is_empty() {
            return 0.0;
        }
        self.packet_times.iter().sum::<f64>() / self.packet_times.len() as f64
    }
}

pub struct PingCommand {
    pinger: Arc<dyn Pinger>,
    addr: IpAddr,
    attempts: u32,
    timeout: Duration,
    stop_on_success: bool,
}

impl PingCommand {
    pub fn new(
        pinger: Arc<dyn Pinger>,
        addr: IpAddr,
        attempts: u32,
        timeout: Duration,
        stop_on_success: bool,
    ) -> Self {
        Self {
            pinger,
            addr,
            attempts: attempts.max(1),
            timeout,
            stop_on_success,
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> PingResult {
        let mut result = PingResult::default();

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                tracing::debug!("ping {} cancelled before attempt {}", self.addr, attempt);
                break;
            }

            let start = Instant::now();
            let attempt_result = match self.pinger.ping(self.addr, self.timeout).await {
                Ok(reply) => {
                    let parsed = PingOutputParser::parse(&reply.output);
                    result.packet_times.extend_from_slice(parsed.times());
                    let succeeded = reply.code == Some(0);
                    result.return_code = reply.code;
                    result.output = reply.output;
                    result.last_parse = parsed;
                    if succeeded {
                        AttemptResult::success(start.elapsed())
                    } else {
                        AttemptResult::timeout(start.elapsed())
                    }
                }
                Err(e) => {
                    result.return_code = None;
                    result.output.clear();
                    result.last_parse = PingOutputParser::default();
                    AttemptResult::error(start.elapsed(), root_cause(&e))
                }
            };
            tracing::trace!("ping attempt {} to {}: {:?}", attempt, self.addr, attempt_result);

            result.stats.record(&attempt_result);
            if attempt_result.success && self.stop_on_success {
                break;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    const REPLY_OK: &str = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=2 ms
64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=4 ms
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
";
    const REPLY_LOST: &str = "2 packets transmitted, 0 received, 100% packet loss, time 1001ms
";
    const REPLY_SLOW: &str = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=12 ms
2 packets transmitted, 1 received, 50% packet loss, time 1001ms
";

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn scripted(replies: Vec<std::io::Result<PingReply>>) -> Arc<dyn Pinger> {
        let calls = replies.len();
        let mut script: VecDeque<_> = replies.into_iter().collect();
        let mut pinger = MockPinger::new();
        pinger
            .expect_ping()
            .times(calls)
            .returning(move |_, _| script.pop_front().unwrap_or_else(|| Ok(PingReply::default())));
        Arc::new(pinger)
    }

    fn reply(code: i32, output: &str) -> std::io::Result<PingReply> {
        Ok(PingReply {
            code: Some(code),
            output: output.to_string(),
        })
    }

    #[tokio::test]
    async fn test_successful_ping() {
        let command = PingCommand::new(
            scripted(vec![reply(0, REPLY_OK)]),
            addr(),
            1,
            Duration::from_secs(1),
            false,
        );

        let result = command.execute(&CancellationToken::new()).await;

        assert!(result.success());
        assert_eq!(result.return_code, Some(0));
        assert_eq!(result.average_time(), 3.0);
        assert_eq!(result.last_parse.packet_loss(), 0.0);
    }

    #[tokio::test]
    async fn test_average_spans_attempts_and_keeps_last_reply() {
        let command = PingCommand::new(
            scripted(vec![
                reply(0, REPLY_OK),
                reply(1, REPLY_LOST),
                Err(std::io::Error::other("spawn failed")),
                reply(0, REPLY_SLOW),
            ]),
            addr(),
            4,
            Duration::from_secs(1),
            false,
        );

        let result = command.execute(&CancellationToken::new()).await;

        assert_eq!(result.stats.attempts, 4);
        assert_eq!(result.stats.successful_attempts, 2);
        assert_eq!(result.stats.timeout_attempts, 1);
        assert_eq!(result.stats.error_attempts, 1);
        assert_eq!(result.stats.last_error.as_deref(), Some("spawn failed"));
        assert_eq!(result.average_time(), 6.0);
        assert_eq!(result.output, REPLY_SLOW);
        assert_eq!(result.last_parse.packet_loss(), 50.0);
    }

    #[tokio::test]
    async fn test_stop_on_success() {
        let command = PingCommand::new(
            scripted(vec![reply(1, REPLY_LOST), reply(0, REPLY_OK)]),
            addr(),
            5,
            Duration::from_secs(1),
            true,
        );

        let result = command.execute(&CancellationToken::new()).await;

        assert_eq!(result.stats.attempts, 2);
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_lost_packets_fail() {
        let command = PingCommand::new(
            scripted(vec![reply(1, REPLY_LOST)]),
            addr(),
            1,
            Duration::from_secs(1),
            false,
        );

        let result = command.execute(&CancellationToken::new()).await;

        assert!(!result.success());
        assert_eq!(result.return_code, Some(1));
        assert_eq!(result.average_time(), 0.0);
    }

    #[test]
    fn test_system_pinger_arguments() {
        let pinger = SystemPinger::new(&PingConfig {
            program: "ping".to_string(),
            packet_count: 2,
            packet_size: Some(100),
        });

        assert_eq!(
            pinger.args(addr(), Duration::from_millis(300)),
            vec!["-c", "2", "-W", "1", "-s", "100", "10.0.0.1"]
        );
        let ipv6 = pinger.args("::1".parse().unwrap(), Duration::from_secs(4));
        assert_eq!(ipv6[..4].to_vec(), vec!["-c", "2", "-W", "4"]);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let pinger = SystemPinger::new(&PingConfig {
            program: "vigil-no-such-ping-program".to_string(),
            ..PingConfig::default()
        });

        assert!(pinger.ping(addr(), Duration::from_secs(1)).await.is_err());
    }
}
