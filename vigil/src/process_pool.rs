use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// Cancellable handle of one in-flight command run.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    token: CancellationToken,
    task: AbortHandle,
}

impl ProcessHandle {
    pub fn new(token: CancellationToken, task: AbortHandle) -> Self {
        Self { token, task }
    }

    /// Asks the command to stop. Harmless on a handle that already finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }
}

/// In-flight command runs grouped by the generation that started them.
#[derive(Debug, Default)]
pub struct ProcessPool {
    pool: Mutex<HashMap<i32, Vec<ProcessHandle>>>,
}

impl ProcessPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under `generation_id`, dropping finished handles first.
    pub fn pool(&self, generation_id: i32, handle: ProcessHandle) {
        let mut pool = self.lock();
        retain_running(&mut pool);
        pool.entry(generation_id).or_default().push(handle);
    }

    /// Cancels every handle registered under `generation_id` and forgets them.
    pub fn cancel(&self, generation_id: i32) {
        let handles = self.lock().remove(&generation_id);
        if let Some(handles) = handles {
            tracing::debug!(
                "cancelling {} run(s) of generation {}",
                handles.len(),
                generation_id
            );
            for handle in handles {
                handle.cancel();
            }
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, handles) in drained {
            handles.iter().for_each(ProcessHandle::cancel);
        }
    }

    pub fn clean_up(&self) {
        retain_running(&mut self.lock());
    }

    pub fn clean_up_generation(&self, generation_id: i32) {
        let mut pool = self.lock();
        if let Some(handles) = pool.get_mut(&generation_id) {
            handles.retain(|handle| !handle.is_done());
            if handles.is_empty() {
                pool.remove(&generation_id);
            }
        }
    }

    /// Number of handles registered under `generation_id`.
    pub fn count(&self, generation_id: i32) -> usize {
        self.lock().get(&generation_id).map_or(0, Vec::len)
    }

    pub fn contains(&self, generation_id: i32) -> bool {
        self.lock().contains_key(&generation_id)
    }

    // Every update leaves the map consistent, poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i32, Vec<ProcessHandle>>> {
        self.pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn retain_running(pool: &mut HashMap<i32, Vec<ProcessHandle>>) {
    pool.retain(|_, handles| {
        handles.retain(|handle| !handle.is_done());
        !handles.is_empty()
    });
}
