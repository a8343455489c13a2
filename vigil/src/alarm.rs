use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Identifies one pending wakeup: a task within one schedule lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmKey {
    pub task_id: i64,
    pub generation_id: i32,
}

/// One-shot timer port.
///
/// Arming a key that is already pending replaces the earlier timer.
/// Cancelling an unknown key is a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait AlarmPort: Send + Sync {
    fn schedule(&self, key: AlarmKey, delay: Duration);
    fn cancel(&self, key: AlarmKey);
}

struct Timer {
    seq: u64,
    handle: AbortHandle,
}

/// Alarm port backed by tokio timers.
///
/// Fired keys are delivered on the channel returned by [`TokioAlarm::new`],
/// which the dispatcher consumes. Timers are in-process: they do not survive
/// a restart, which is what `Scheduler::startup` compensates for.
pub struct TokioAlarm {
    timers: Arc<Mutex<HashMap<AlarmKey, Timer>>>,
    next_seq: AtomicU64,
    fired_tx: mpsc::UnboundedSender<AlarmKey>,
}

impl TokioAlarm {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlarmKey>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: Arc::new(Mutex::new(HashMap::new())),
                next_seq: AtomicU64::new(0),
                fired_tx,
            },
            fired_rx,
        )
    }

    /// Number of timers armed and not yet fired.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }

    /// Aborts every pending timer.
    pub fn shutdown(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, timer) in timers.drain() {
                timer.handle.abort();
            }
        }
    }
}

impl AlarmPort for TokioAlarm {
    fn schedule(&self, key: AlarmKey, delay: Duration) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let fired_tx = self.fired_tx.clone();

        let mut guard = match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // A replacement may have been armed while we were waking up.
            let current = {
                let mut timers = match timers.lock() {
                    Ok(timers) => timers,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match timers.get(&key) {
                    Some(timer) if timer.seq == seq => {
                        timers.remove(&key);
                        true
                    }
                    _ => false,
                }
            };

            if current && fired_tx.send(key).is_err() {
                tracing::debug!("alarm {:?} fired after the dispatcher stopped", key);
            }
        })
        .abort_handle();

        if let Some(previous) = guard.insert(key, Timer { seq, handle }) {
            previous.handle.abort();
        }
        tracing::trace!("alarm {:?} armed in {:?}", key, delay);
    }

    fn cancel(&self, key: AlarmKey) {
        let mut timers = match self.timers.lock() {
            Ok(timers) => timers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = timers.remove(&key) {
            timer.handle.abort();
            tracing::trace!("alarm {:?} cancelled", key);
        }
    }
}
