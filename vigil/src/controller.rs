/// Controller module for the vigil probe engine
///
/// The controller is the composition root: it builds the repository, alarm
/// port, process pool, scheduler, worker and dispatcher, seeds the configured
/// tasks, and drives startup and shutdown.
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::alarm::TokioAlarm;
use crate::config::Config;
use crate::dispatcher::{DispatchContext, Dispatcher};
use crate::generation;
use crate::process_pool::ProcessPool;
use crate::reporters::create_enabled_reporters;
use crate::repository::{InMemoryRepository, TaskRepository};
use crate::runnable::TasksGroup;
use crate::scheduler::Scheduler;
use crate::wake::CountingWakeLock;
use crate::worker::Worker;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Controller {
    conf: Config,
}

impl Controller {
    pub fn new(conf: Config) -> Self {
        Self { conf }
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn start(&self) -> Result<()> {
        let mut sigint_stream = signal(SignalKind::interrupt()).context("watch SIGINT failed")?;
        let mut sigterm_stream =
            signal(SignalKind::terminate()).context("watch SIGTERM failed")?;

        self.run_until(async move {
            tokio::select! {
                _ = sigint_stream.recv() => {
                    tracing::info!("SIGINT received, shutdown initiated...");
                }
                _ = sigterm_stream.recv() => {
                    tracing::info!("SIGTERM received, shutdown initiated...");
                }
            }
        })
        .await
    }

    /// Runs until `stop` completes, then terminates every task and waits for
    /// the dispatcher.
    pub async fn run_until(&self, stop: impl Future<Output = ()>) -> Result<()> {
        let repository = Arc::new(InMemoryRepository::new());
        self.seed(repository.as_ref()).await?;

        let (alarm, fired_rx) = TokioAlarm::new();
        let alarm = Arc::new(alarm);
        let pool = Arc::new(ProcessPool::new());
        let scheduler = Arc::new(Scheduler::new(
            repository.clone(),
            alarm.clone(),
            pool.clone(),
        ));
        let worker = Worker::new(
            &self.conf,
            repository.clone(),
            pool,
            Arc::new(CountingWakeLock::new()),
        );

        let shutdown = CancellationToken::new();
        let mut group = TasksGroup::new("Dispatcher Group");
        group.add_task(Box::new(Dispatcher::new(
            0,
            self.conf.worker.num_instance,
            DispatchContext {
                repository: repository.clone(),
                scheduler: scheduler.clone(),
                worker: Arc::new(worker),
                reporters: create_enabled_reporters(&self.conf),
            },
            fired_rx,
            shutdown.clone(),
        )));
        group.run();

        scheduler.startup().await?;
        for task_conf in self.conf.tasks.iter().filter(|task| task.running) {
            if let Some(task) = repository.read(task_conf.id).await? {
                scheduler.schedule(&task).await?;
            }
        }
        tracing::info!(
            "vigil started with {} task(s)",
            repository.read_all().await?.len()
        );

        stop.await;

        shutdown.cancel();
        scheduler.terminate_all().await?;
        alarm.shutdown();
        group
            .wait_for_shutdown(TASK_SHUTDOWN_TIMEOUT, SHUTDOWN_TIMEOUT)
            .await;
        tracing::info!("Shutdown complete");
        Ok(())
    }

    // Stores the configured tasks, each with a fresh generation.
    async fn seed(&self, repository: &dyn TaskRepository) -> Result<()> {
        for task_conf in &self.conf.tasks {
            if repository.read(task_conf.id).await?.is_some() {
                tracing::warn!("duplicate task id {}, keeping the first", task_conf.id);
                continue;
            }
            repository
                .save(task_conf.to_task(generation::create_id()))
                .await?;
        }
        Ok(())
    }
}
