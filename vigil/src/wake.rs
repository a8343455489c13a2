use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Source of scoped wake resources held for the duration of a worker run.
pub trait WakeLock: Send + Sync {
    /// Acquires the resource for at most `timeout`. It is released when the
    /// returned guard is dropped.
    fn acquire(&self, tag: &str, timeout: Duration) -> WakeGuard;
}

/// Releases its wake resource on drop, whatever the exit path.
pub struct WakeGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WakeGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Wake lock for hosts that never suspend: it only tracks how many guards are held.
#[derive(Clone, Default)]
pub struct CountingWakeLock {
    held: Arc<AtomicUsize>,
}

impl CountingWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self, tag: &str, timeout: Duration) -> WakeGuard {
        self.held.fetch_add(1, Ordering::SeqCst);
        tracing::trace!("wake lock {} acquired for {:?}", tag, timeout);

        let held = self.held.clone();
        let tag = tag.to_string();
        WakeGuard::new(move || {
            held.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("wake lock {} released", tag);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = CountingWakeLock::new();
        {
            let _first = lock.acquire("a", Duration::from_secs(1));
            let _second = lock.acquire("b", Duration::from_secs(1));
            assert_eq!(lock.held(), 2);
        }
        assert_eq!(lock.held(), 0);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let lock = CountingWakeLock::new();
        let cloned = lock.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = cloned.acquire("panics", Duration::from_secs(1));
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(lock.held(), 0);
    }
}
