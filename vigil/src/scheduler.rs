use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::alarm::{AlarmKey, AlarmPort};
use crate::message::Task;
use crate::process_pool::ProcessPool;
use crate::repository::TaskRepository;

/// How long to wait before the next probe of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Probe right away.
    Immediate,
    /// Wait one full interval.
    Interval,
    /// Wait whatever is left of the interval since the last probe started.
    LastScheduled,
}

/// Decides when each task's next probe runs and invalidates everything that
/// belongs to a superseded lineage.
///
/// All state lives in the repository, the alarm port and the process pool;
/// the scheduler itself holds no locks across calls.
pub struct Scheduler {
    repository: Arc<dyn TaskRepository>,
    alarm: Arc<dyn AlarmPort>,
    pool: Arc<ProcessPool>,
}

impl Scheduler {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        alarm: Arc<dyn AlarmPort>,
        pool: Arc<ProcessPool>,
    ) -> Self {
        Self {
            repository,
            alarm,
            pool,
        }
    }

    /// Marks the task running and arms an immediate probe.
    pub async fn schedule(&self, task: &Task) -> Result<()> {
        tracing::info!("scheduling task {} ({})", task.id, task.kind);
        self.repository.set_running(task.id, true).await?;
        self.reschedule(task, Delay::Immediate).await
    }

    /// Arms the next wakeup of `task` if it is still live.
    ///
    /// A task that is gone, stopped or carries another generation than the
    /// stored one is stale: nothing is armed and whatever its generation
    /// still has pending or running is terminated.
    pub async fn reschedule(&self, task: &Task, delay: Delay) -> Result<()> {
        let current = match self.repository.read(task.id).await? {
            Some(current) if task.is_live_against(&current) => current,
            _ => {
                tracing::debug!(
                    "task {} generation {} is stale, not rescheduling",
                    task.id,
                    task.generation_id
                );
                self.terminate(task);
                return Ok(());
            }
        };

        let wait = match delay {
            Delay::Immediate => Duration::ZERO,
            Delay::Interval => current.interval(),
            Delay::LastScheduled => remaining(&current, Utc::now()),
        };
        tracing::debug!("task {} next probe in {:?}", task.id, wait);
        self.alarm.schedule(key(&current), wait);
        Ok(())
    }

    /// Stops the task for good: it is no longer running and nothing of its
    /// generation stays pending.
    pub async fn cancel(&self, task: &Task) -> Result<()> {
        tracing::info!("cancelling task {}", task.id);
        self.repository.set_running(task.id, false).await?;
        self.repository.set_last_scheduled(task.id, None).await?;
        self.terminate(task);
        Ok(())
    }

    /// Drops the pending alarm and interrupts in-flight runs of the task's
    /// generation. Idempotent.
    pub fn terminate(&self, task: &Task) {
        self.alarm.cancel(key(task));
        self.pool.cancel(task.generation_id);
    }

    /// Re-arms running tasks after a restart, keeping what was left of their
    /// interval, and clears transient counters.
    pub async fn startup(&self) -> Result<()> {
        let tasks = self.repository.read_all().await?;
        tracing::info!("scheduler starting up with {} task(s)", tasks.len());

        for task in tasks {
            // Nothing survived the restart, so no run is in flight.
            self.repository.reset_instances(task.id).await?;
            if task.running {
                self.reschedule(&task, Delay::LastScheduled).await?;
            } else {
                self.repository.set_last_scheduled(task.id, None).await?;
            }
        }
        Ok(())
    }

    pub async fn cancel_all(&self) -> Result<()> {
        for task in self.repository.read_all().await? {
            self.cancel(&task).await?;
        }
        Ok(())
    }

    pub async fn terminate_all(&self) -> Result<()> {
        for task in self.repository.read_all().await? {
            self.terminate(&task);
            self.repository.reset_instances(task.id).await?;
        }
        Ok(())
    }
}

fn key(task: &Task) -> AlarmKey {
    AlarmKey {
        task_id: task.id,
        generation_id: task.generation_id,
    }
}

// Remaining part of the interval since the last probe started. A task that
// never ran, or whose interval already passed, is due now.
fn remaining(task: &Task, now: DateTime<Utc>) -> Duration {
    let Some(last) = task.last_scheduled else {
        return Duration::ZERO;
    };
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    task.interval().saturating_sub(elapsed)
}
