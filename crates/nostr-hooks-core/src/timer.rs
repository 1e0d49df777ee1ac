//! Cancelable one-shot scheduled tasks.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A single pending delayed task that can be armed, re-armed or cancelled.
///
/// Drives both the batching window and the cache GC sweep.
#[derive(Debug, Default)]
pub struct Debouncer {
    handle: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Schedule `task` after `delay` unless a task is already pending.
    /// Returns false when it was already armed.
    pub fn arm<F>(&mut self, runtime: &Handle, delay: Duration, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_armed() {
            return false;
        }
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        }));
        true
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Forget the pending task without aborting it; used by the task itself
    /// once it has fired.
    pub(crate) fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_arm_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Debouncer::new();
        let counter = fired.clone();

        assert!(timer.arm(&Handle::current(), Duration::from_millis(500), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_arm_joins_pending_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Debouncer::new();
        let (a, b) = (fired.clone(), fired.clone());

        assert!(timer.arm(&Handle::current(), Duration::from_millis(100), move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!timer.arm(&Handle::current(), Duration::from_millis(100), move || {
            b.fetch_add(10, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Debouncer::new();
        let counter = fired.clone();

        timer.arm(&Handle::current(), Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
