/// Worker module for the vigil probe engine
///
/// This module implements one probe cycle for a task:
/// 1. Resolving the task's host
/// 2. Running the kind-specific command under a wall-clock budget, cancellable
///    through the process pool
/// 3. Turning the command result into the task's log entry
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::command::{
    Command, CommandResult, ConnectCommand, Connector, DownloadCommand, PingCommand, Pinger,
    SystemPinger, TcpConnector, download,
};
use crate::config::{CommandConfig, Config, DownloadConfig, ResolverConfig};
use crate::error::ProbeError;
use crate::message::{LogEntry, Task, TaskKind};
use crate::process_pool::{ProcessHandle, ProcessPool};
use crate::repository::TaskRepository;
use crate::resolver;
use crate::text;
use crate::wake::WakeLock;

const WAKE_TAG_PREFIX: &str = "vigil-task";

/// Runs probes. Every call to [`Worker::execute`] produces exactly one
/// [`LogEntry`]; failures of any step end up in its message.
///
/// # Fields
/// * `resolver` - DNS step settings
/// * `command` - Budget settings shared by the commands
/// * `download` - Download folder and transfer settings
/// * `connector` - Seam used by connect commands
/// * `pinger` - Seam used by ping commands
/// * `repository` - Task store, consulted by downloads for liveness
/// * `pool` - Registry the spawned command runs are cancellable through
/// * `wake_lock` - Held for the whole run
#[derive(Clone)]
pub struct Worker {
    resolver: ResolverConfig,
    command: CommandConfig,
    download: DownloadConfig,
    connector: Arc<dyn Connector>,
    pinger: Arc<dyn Pinger>,
    repository: Arc<dyn TaskRepository>,
    pool: Arc<ProcessPool>,
    wake_lock: Arc<dyn WakeLock>,
}

impl Worker {
    pub fn new(
        config: &Config,
        repository: Arc<dyn TaskRepository>,
        pool: Arc<ProcessPool>,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Self {
        Self {
            resolver: config.resolver.clone(),
            command: config.command.clone(),
            download: config.download.clone(),
            connector: Arc::new(TcpConnector),
            pinger: Arc::new(SystemPinger::new(&config.ping)),
            repository,
            pool,
            wake_lock,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = pinger;
        self
    }

    /// Wall-clock budget of the command run for `task`.
    pub fn budget(&self, task: &Task) -> Duration {
        match task.kind {
            TaskKind::Download => self.download.executor_timeout,
            _ => task
                .timeout
                .checked_mul(task.attempt_count())
                .and_then(|budget| budget.checked_mul(self.command.budget_factor.max(1)))
                .unwrap_or(Duration::MAX),
        }
    }

    pub async fn execute(&self, task: &Task) -> LogEntry {
        let budget = self.budget(task);
        let _wake = self.wake_lock.acquire(
            &format!("{}-{}", WAKE_TAG_PREFIX, task.id),
            self.resolver.timeout.saturating_add(budget),
        );

        if task.kind == TaskKind::None {
            return LogEntry::failure(task.id, text::no_probe(task.kind));
        }

        match self.run(task, budget).await {
            Ok(result) => log_entry(task, &result),
            Err(e) => {
                if matches!(e, ProbeError::Resolution { .. }) {
                    tracing::debug!("task {}: {}", task.id, e);
                } else {
                    tracing::warn!("task {} probe failed: {}", task.id, e);
                }
                LogEntry::failure(task.id, text::probe_failed(task.kind, &task.address, &e))
            }
        }
    }

    async fn probe(
        &self,
        task: &Task,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandResult, ProbeError> {
        let ip = resolver::resolve(&host_of(task), self.resolver.prefer_ipv4, self.resolver.timeout)
            .await?;
        let command = self
            .command_for(task, ip)
            .ok_or_else(|| ProbeError::Fatal(text::no_probe(task.kind)))?;

        tokio::time::timeout(budget, command.execute(cancel))
            .await
            .map_err(|_| ProbeError::BudgetExceeded { budget })
    }

    fn command_for(&self, task: &Task, ip: IpAddr) -> Option<Command> {
        let attempts = task.attempt_count();
        match task.kind {
            TaskKind::Connect => Some(Command::Connect(ConnectCommand::new(
                self.connector.clone(),
                SocketAddr::new(ip, task.port),
                attempts,
                task.timeout,
                task.stop_on_success,
            ))),
            TaskKind::Ping => Some(Command::Ping(PingCommand::new(
                self.pinger.clone(),
                ip,
                attempts,
                task.timeout,
                task.stop_on_success,
            ))),
            TaskKind::Download => Some(Command::Download(DownloadCommand::new(
                task.clone(),
                ip,
                self.download.clone(),
                self.repository.clone(),
            ))),
            TaskKind::None => None,
        }
    }

    // Resolves and runs the command in its own tokio task, registered in the
    // pool before resolution starts, so it can be aborted when the budget runs
    // out or the generation is cancelled.
    async fn run(&self, task: &Task, budget: Duration) -> Result<CommandResult, ProbeError> {
        let token = CancellationToken::new();
        let child = token.clone();
        let worker = self.clone();
        let probed = task.clone();
        let handle = tokio::spawn(async move { worker.probe(&probed, budget, &child).await });
        let abort = handle.abort_handle();
        self.pool
            .pool(task.generation_id, ProcessHandle::new(token.clone(), abort.clone()));

        let outcome = tokio::select! {
            joined = handle => match joined {
                Ok(result) => result,
                Err(e) => Err(ProbeError::Fatal(e.to_string())),
            },
            _ = token.cancelled() => Err(ProbeError::Cancelled),
        };

        abort.abort();
        self.pool.clean_up_generation(task.generation_id);
        outcome
    }
}

// Host part of the task address; downloads carry a URL.
fn host_of(task: &Task) -> String {
    if task.kind != TaskKind::Download {
        return task.address.clone();
    }
    download::parse_url(&task.address)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| task.address.clone())
}

fn log_entry(task: &Task, result: &CommandResult) -> LogEntry {
    let message = match result {
        CommandResult::Connect(result) => text::connect(&task.address, task.port, result),
        CommandResult::Ping(result) => text::ping(&task.address, result),
        CommandResult::Download(result) => text::download(result),
    };

    if result.success() {
        LogEntry::success(task.id, message)
    } else {
        LogEntry::failure(task.id, message)
    }
}
