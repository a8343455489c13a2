use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::alarm::AlarmKey;
use crate::message::{LogEntry, Task, TaskKind};
use crate::reporters::Reporter;
use crate::repository::TaskRepository;
use crate::runnable::Runnable;
use crate::scheduler::{Delay, Scheduler};
use crate::worker::Worker;

/// Prefix for dispatcher instance names
const DISPATCHER_NAME_PREFIX: &str = "Dispatcher";

const KINDS: [TaskKind; 4] = [
    TaskKind::Ping,
    TaskKind::Connect,
    TaskKind::Download,
    TaskKind::None,
];

/// Collaborators a dispatcher hands fired alarms to.
pub struct DispatchContext {
    pub repository: Arc<dyn TaskRepository>,
    pub scheduler: Arc<Scheduler>,
    pub worker: Arc<Worker>,
    pub reporters: Vec<Box<dyn Reporter>>,
}

struct Dispatch {
    context: DispatchContext,
    global: Semaphore,
    per_kind: HashMap<TaskKind, Semaphore>,
}

/// Turns fired alarms into worker runs.
///
/// For each fired key the Dispatcher:
/// - drops keys whose task is gone, stopped or re-generated, terminating
///   whatever that generation still has in flight,
/// - arms the next wakeup one interval ahead and records the start time,
/// - runs the worker once a global and a per-kind slot are free,
/// - hands the log entry to every reporter if the task is still live.
///
/// # Fields
/// * `name` - Name of the dispatcher instance (e.g., "Dispatcher-0").
/// * `fired_rx` - Alarm keys delivered by the alarm port.
/// * `dispatch` - Shared state of the spawned runs.
/// * `runs` - Runs in flight.
/// * `shutdown` - Stops the loop and aborts in-flight runs.
///
/// When the alarm channel closes, the loop stops taking keys and waits for
/// the runs in flight.
pub struct Dispatcher {
    name: String,
    fired_rx: mpsc::UnboundedReceiver<AlarmKey>,
    dispatch: Arc<Dispatch>,
    runs: JoinSet<()>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a new Dispatcher instance.
    ///
    /// # Arguments
    /// * `id` - Unique identifier for this dispatcher instance.
    /// * `num_instance` - Upper bound of worker runs in flight across all kinds.
    /// * `context` - Repository, scheduler, worker and reporters.
    /// * `fired_rx` - Receiving end of the alarm port.
    /// * `shutdown` - Token cancelled by the controller on shutdown.
    pub fn new(
        id: usize,
        num_instance: usize,
        context: DispatchContext,
        fired_rx: mpsc::UnboundedReceiver<AlarmKey>,
        shutdown: CancellationToken,
    ) -> Self {
        let per_kind = KINDS
            .iter()
            .map(|kind| (*kind, Semaphore::new(kind.max_instances())))
            .collect();

        Self {
            name: format!("{}-{}", DISPATCHER_NAME_PREFIX, id),
            fired_rx,
            dispatch: Arc::new(Dispatch {
                context,
                global: Semaphore::new(num_instance.max(1)),
                per_kind,
            }),
            runs: JoinSet::new(),
            shutdown,
        }
    }
}

impl Dispatch {
    async fn dispatch(self: Arc<Self>, key: AlarmKey) {
        let repository = &self.context.repository;
        let task = match repository.read(key.task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("failed to read task {}: {:?}", key.task_id, e);
                return;
            }
        };

        let task = match task {
            Some(task) if task.running && task.generation_id == key.generation_id => task,
            _ => {
                tracing::debug!("dropping stale alarm {:?}", key);
                self.context.scheduler.terminate(&Task {
                    id: key.task_id,
                    generation_id: key.generation_id,
                    ..Task::default()
                });
                return;
            }
        };

        // The next wakeup is armed before probing so slow runs do not drift the schedule.
        if let Err(e) = self.context.scheduler.reschedule(&task, Delay::Interval).await {
            tracing::warn!("failed to reschedule task {}: {:?}", task.id, e);
        }
        if let Err(e) = repository.set_last_scheduled(task.id, Some(Utc::now())).await {
            tracing::warn!("failed to record start of task {}: {:?}", task.id, e);
        }

        let Some(entry) = self.run_limited(&task).await else {
            return;
        };

        match repository.is_live(task.id, task.generation_id).await {
            Ok(true) => self.call_reporters(&entry).await,
            Ok(false) => tracing::debug!(
                "task {} changed during its run, discarding its log entry",
                task.id
            ),
            Err(e) => tracing::warn!("failed to check task {}: {:?}", task.id, e),
        }
    }

    async fn run_limited(&self, task: &Task) -> Option<LogEntry> {
        let _global = self.global.acquire().await.ok()?;
        let _kind = match self.per_kind.get(&task.kind) {
            Some(semaphore) => Some(semaphore.acquire().await.ok()?),
            None => None,
        };

        // The task may have been stopped or edited while this run was queued.
        let repository = &self.context.repository;
        match repository.is_live(task.id, task.generation_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    "task {} went stale while queued, skipping its run",
                    task.id
                );
                return None;
            }
            Err(e) => tracing::warn!("failed to check task {}: {:?}", task.id, e),
        }

        if let Err(e) = repository.add_instances(task.id, 1).await {
            tracing::warn!("failed to count run of task {}: {:?}", task.id, e);
        }
        let entry = self.context.worker.execute(task).await;
        if let Err(e) = repository.add_instances(task.id, -1).await {
            tracing::warn!("failed to count run of task {}: {:?}", task.id, e);
        }
        Some(entry)
    }

    /// Calls all configured reporters with the log entry.
    ///
    /// Reporters are called independently and in parallel.
    /// Failures in one reporter don't affect others.
    async fn call_reporters(&self, entry: &LogEntry) {
        let reporter_futures: Vec<_> = self
            .context
            .reporters
            .iter()
            .map(|reporter| async move {
                if let Err(e) = reporter.report(entry).await {
                    tracing::warn!("Reporter '{}' failed: {}", reporter.name(), e);
                }
            })
            .collect();

        futures::future::join_all(reporter_futures).await;
    }
}

#[async_trait]
impl Runnable for Dispatcher {
    async fn run(&mut self) {
        tracing::info!("Starting dispatcher: {}", self.name);
        let mut drain = false;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Dispatcher {} received shutdown signal", self.name);
                    break;
                }
                fired = self.fired_rx.recv() => match fired {
                    Some(key) => {
                        tracing::trace!("{} dispatching {:?}", self.name, key);
                        self.runs.spawn(self.dispatch.clone().dispatch(key));
                    }
                    None => {
                        tracing::info!("Dispatcher {}: alarm channel closed", self.name);
                        drain = true;
                        break;
                    }
                },
                Some(joined) = self.runs.join_next(), if !self.runs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("{} run failed: {}", self.name, e);
                    }
                }
            }
        }

        // Without new alarms the runs in flight may finish; on shutdown they are aborted.
        if drain {
            while self.runs.join_next().await.is_some() {}
        } else {
            self.runs.shutdown().await;
        }
        tracing::info!("Dispatcher {} stopped.", self.name);
    }

    /// Returns the name of this dispatcher instance.
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::MockAlarmPort;
    use crate::command::Connector;
    use crate::config::Config;
    use crate::process_pool::ProcessPool;
    use crate::repository::InMemoryRepository;
    use crate::wake::CountingWakeLock;
    use anyhow::Result;
    use mockall::predicate::*;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CollectingReporter {
        entries: Arc<Mutex<Vec<LogEntry>>>,
    }

    #[async_trait]
    impl Reporter for CollectingReporter {
        async fn report(&self, entry: &LogEntry) -> Result<()> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "collecting"
        }
    }

    struct FailingReporter;

    #[async_trait]
    impl Reporter for FailingReporter {
        async fn report(&self, _entry: &LogEntry) -> Result<()> {
            anyhow::bail!("sink unavailable")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Connector that stops its own task while the probe runs.
    struct StoppingConnector {
        repository: Arc<InMemoryRepository>,
        task_id: i64,
    }

    #[async_trait]
    impl Connector for StoppingConnector {
        async fn connect(&self, _addr: SocketAddr, _timeout: Duration) -> std::io::Result<bool> {
            self.repository
                .set_running(self.task_id, false)
                .await
                .map_err(std::io::Error::other)?;
            Ok(true)
        }
    }

    /// Connector that records the probed ports and holds every attempt
    /// until the gate opens.
    struct GatedConnector {
        ports: Arc<Mutex<Vec<u16>>>,
        gate: CancellationToken,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self, addr: SocketAddr, _timeout: Duration) -> std::io::Result<bool> {
            self.ports.lock().unwrap().push(addr.port());
            self.gate.cancelled().await;
            Ok(true)
        }
    }

    struct Harness {
        repository: Arc<InMemoryRepository>,
        scheduler: Arc<Scheduler>,
        reporter: CollectingReporter,
        fired_tx: mpsc::UnboundedSender<AlarmKey>,
        shutdown: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(
        num_instance: usize,
        tasks: Vec<Task>,
        alarm: MockAlarmPort,
        connector: impl FnOnce(Arc<InMemoryRepository>) -> Option<Arc<dyn Connector>>,
    ) -> Harness {
        let repository = Arc::new(InMemoryRepository::with_tasks(tasks));
        let pool = Arc::new(ProcessPool::new());
        let mut worker = Worker::new(
            &Config::default(),
            repository.clone(),
            pool.clone(),
            Arc::new(CountingWakeLock::new()),
        );
        if let Some(connector) = connector(repository.clone()) {
            worker = worker.with_connector(connector);
        }
        let scheduler = Arc::new(Scheduler::new(repository.clone(), Arc::new(alarm), pool));
        let reporter = CollectingReporter::default();
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let mut dispatcher = Dispatcher::new(
            0,
            num_instance,
            DispatchContext {
                repository: repository.clone(),
                scheduler: scheduler.clone(),
                worker: Arc::new(worker),
                reporters: vec![Box::new(FailingReporter), Box::new(reporter.clone())],
            },
            fired_rx,
            shutdown.clone(),
        );
        assert_eq!(dispatcher.name(), "Dispatcher-0");
        let handle = tokio::spawn(async move { dispatcher.run().await });

        Harness {
            repository,
            scheduler,
            reporter,
            fired_tx,
            shutdown,
            handle,
        }
    }

    fn connect_task(port: u16) -> Task {
        Task {
            id: 1,
            generation_id: 10,
            kind: TaskKind::Connect,
            address: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_secs(2),
            running: true,
            ..Task::default()
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_live_alarm_probes_reschedules_and_reports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let key = AlarmKey {
            task_id: 1,
            generation_id: 10,
        };
        let mut alarm = MockAlarmPort::new();
        alarm
            .expect_schedule()
            .with(eq(key), eq(Duration::from_secs(15 * 60)))
            .times(1)
            .return_const(());

        let harness = start(4, vec![connect_task(port)], alarm, |_| None);
        harness.fired_tx.send(key).unwrap();

        let entries = harness.reporter.entries.clone();
        wait_until(|| !entries.lock().unwrap().is_empty()).await;
        let entry = entries.lock().unwrap()[0].clone();
        assert!(entry.success, "{}", entry.message);
        assert_eq!(entry.task_id, 1);

        let stored = harness.repository.read(1).await.unwrap().unwrap();
        assert!(stored.last_scheduled.is_some());
        assert_eq!(stored.instances, 0);

        harness.shutdown.cancel();
        harness.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_alarm_is_dropped() {
        let mut alarm = MockAlarmPort::new();
        alarm.expect_schedule().never();
        alarm
            .expect_cancel()
            .with(eq(AlarmKey {
                task_id: 1,
                generation_id: 9,
            }))
            .times(1)
            .return_const(());

        let harness = start(4, vec![connect_task(1)], alarm, |_| None);
        harness
            .fired_tx
            .send(AlarmKey {
                task_id: 1,
                generation_id: 9,
            })
            .unwrap();
        drop(harness.fired_tx);
        harness.handle.await.unwrap();

        assert!(harness.reporter.entries.lock().unwrap().is_empty());
        let stored = harness.repository.read(1).await.unwrap().unwrap();
        assert_eq!(stored.last_scheduled, None);
    }

    #[tokio::test]
    async fn test_entry_of_task_stopped_mid_run_is_discarded() {
        let key = AlarmKey {
            task_id: 1,
            generation_id: 10,
        };
        let mut alarm = MockAlarmPort::new();
        alarm.expect_schedule().times(1).return_const(());

        let harness = start(4, vec![connect_task(80)], alarm, |repository| {
            Some(Arc::new(StoppingConnector {
                repository,
                task_id: 1,
            }))
        });
        harness.fired_tx.send(key).unwrap();

        let repository = harness.repository.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = repository.read(1).await.unwrap().unwrap();
                if !stored.running && stored.instances == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        drop(harness.fired_tx);
        harness.handle.await.unwrap();
        assert!(harness.reporter.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_task_cancelled_while_queued_is_not_run() {
        let ports = Arc::new(Mutex::new(Vec::new()));
        let gate = CancellationToken::new();
        let second = Task {
            id: 2,
            generation_id: 20,
            ..connect_task(2)
        };
        let mut alarm = MockAlarmPort::new();
        alarm.expect_schedule().times(2).return_const(());
        alarm
            .expect_cancel()
            .with(eq(AlarmKey {
                task_id: 2,
                generation_id: 20,
            }))
            .times(1)
            .return_const(());

        let connector = GatedConnector {
            ports: ports.clone(),
            gate: gate.clone(),
        };
        let harness = start(1, vec![connect_task(1), second.clone()], alarm, |_| {
            Some(Arc::new(connector))
        });

        harness
            .fired_tx
            .send(AlarmKey {
                task_id: 1,
                generation_id: 10,
            })
            .unwrap();
        wait_until(|| ports.lock().unwrap().len() == 1).await;

        harness
            .fired_tx
            .send(AlarmKey {
                task_id: 2,
                generation_id: 20,
            })
            .unwrap();
        let repository = harness.repository.clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while repository.read(2).await.unwrap().unwrap().last_scheduled.is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        harness.scheduler.cancel(&second).await.unwrap();
        gate.cancel();

        let entries = harness.reporter.entries.clone();
        wait_until(|| !entries.lock().unwrap().is_empty()).await;
        drop(harness.fired_tx);
        harness.handle.await.unwrap();

        assert_eq!(*ports.lock().unwrap(), vec![1]);
        let reported: Vec<i64> = entries.lock().unwrap().iter().map(|entry| entry.task_id).collect();
        assert_eq!(reported, vec![1]);
        assert_eq!(harness.repository.read(2).await.unwrap().unwrap().instances, 0);
    }
}
