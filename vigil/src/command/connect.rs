use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{AttemptResult, AttemptStats};
use crate::error::root_cause;

/// Opens one TCP connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// `Ok(true)` if the connection was established, `Ok(false)` if nothing
    /// answered within `timeout`, `Err` if the attempt failed outright.
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> std::io::Result<bool>;
}

pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: SocketAddr, timeout: Duration) -> std::io::Result<bool> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(false),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectResult {
    pub stats: AttemptStats,
}

impl ConnectResult {
    pub fn success(&self) -> bool {
        self.stats.success()
    }
}

pub struct ConnectCommand {
    connector: Arc<dyn Connector>,
    addr: SocketAddr,
    attempts: u32,
    timeout: Duration,
    stop_on_success: bool,
}

impl ConnectCommand {
    pub fn new(
        connector: Arc<dyn Connector>,
        addr: SocketAddr,
        attempts: u32,
        timeout: Duration,
        stop_on_success: bool,
    ) -> Self {
        Self {
            connector,
            addr,
            attempts: attempts.max(1),
            timeout,
            stop_on_success,
        }
    }

    pub async fn execute(&self, cancel: &CancellationToken) -> ConnectResult {
        let mut stats = AttemptStats::default();

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                tracing::debug!("connect to {} cancelled before attempt {}", self.addr, attempt);
                break;
            }

            let start = Instant::now();
            let result = match self.connector.connect(self.addr, self.timeout).await {
                Ok(true) => AttemptResult::success(start.elapsed()),
                Ok(false) => AttemptResult::timeout(start.elapsed()),
                Err(e) => AttemptResult::error(start.elapsed(), root_cause(&e)),
            };
            tracing::trace!("connect attempt {} to {}: {:?}", attempt, self.addr, result);

            stats.record(&result);
            if result.success && self.stop_on_success {
                break;
            }
        }

        ConnectResult { stats }
    }
}
