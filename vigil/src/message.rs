/// Message module for the vigil probe engine
///
/// This module defines the data structures passed between the scheduler,
/// the dispatcher, the workers and the reporters: monitoring tasks and the
/// outcome records produced for them.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const PING_MAX_INSTANCES: usize = 10;
const CONNECT_MAX_INSTANCES: usize = 10;
const DOWNLOAD_MAX_INSTANCES: usize = 2;
const NONE_MAX_INSTANCES: usize = 1;

/// The closed set of probe kinds a task can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Ping,
    Connect,
    Download,
    None,
}

impl TaskKind {
    /// Maximum number of concurrent worker runs of this kind.
    ///
    /// The worker does not enforce this itself; the dispatcher does.
    pub fn max_instances(&self) -> usize {
        match self {
            TaskKind::Ping => PING_MAX_INSTANCES,
            TaskKind::Connect => CONNECT_MAX_INSTANCES,
            TaskKind::Download => DOWNLOAD_MAX_INSTANCES,
            TaskKind::None => NONE_MAX_INSTANCES,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Ping => write!(f, "ping"),
            TaskKind::Connect => write!(f, "connect"),
            TaskKind::Download => write!(f, "download"),
            TaskKind::None => write!(f, "none"),
        }
    }
}

/// A user-defined monitoring task as stored in the task repository.
///
/// # Fields
/// * `id` - Stable identifier of the task
/// * `generation_id` - Lineage token, replaced whenever the task starts, restarts or is edited
/// * `kind` - Probe kind to run
/// * `address` - Host name, IP literal or (for downloads) URL
/// * `port` - Target port for connect probes
/// * `interval_minutes` - Wait between two probes
/// * `attempts` - Attempts per probe, at least one
/// * `timeout` - Per-attempt timeout
/// * `stop_on_success` - End the attempt loop at the first success
/// * `running` - Whether the task is scheduled at all
/// * `last_scheduled` - When the last probe was started
/// * `failure_count` - Accumulated failures, maintained by the task owner
/// * `instances` - Worker runs currently in flight for this task
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub generation_id: i32,
    pub kind: TaskKind,
    pub address: String,
    pub port: u16,
    pub interval_minutes: u32,
    pub attempts: u32,
    pub timeout: Duration,
    pub stop_on_success: bool,
    pub running: bool,
    pub last_scheduled: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub instances: u32,
}

impl Task {
    /// Interval between two probes.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    /// Configured attempt count, never below one.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Returns true if `self` belongs to the lineage currently stored as `current`
    /// and that lineage is still running.
    pub fn is_live_against(&self, current: &Task) -> bool {
        current.running && current.id == self.id && current.generation_id == self.generation_id
    }
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: 0,
            generation_id: 0,
            kind: TaskKind::None,
            address: String::new(),
            port: 0,
            interval_minutes: 15,
            attempts: 1,
            timeout: Duration::from_secs(5),
            stop_on_success: false,
            running: false,
            last_scheduled: None,
            failure_count: 0,
            instances: 0,
        }
    }
}

/// Outcome record of one probe.
///
/// Produced exactly once per probe by the worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub task_id: i64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub message: String,
}

impl LogEntry {
    pub fn success(task_id: i64, message: impl Into<String>) -> Self {
        Self::new(task_id, true, message)
    }

    pub fn failure(task_id: i64, message: impl Into<String>) -> Self {
        Self::new(task_id, false, message)
    }

    fn new(task_id: i64, success: bool, message: impl Into<String>) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            success,
            message: message.into(),
        }
    }
}
