//! Trailing-edge debounce on the Tokio runtime.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// Quiet period between the last keystroke and the lookup it triggers.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Runs only the most recently scheduled task, once `delay` has passed
/// without another call to [`Debouncer::schedule`].
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Aborts any pending task and schedules `task` to start after the delay.
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        let abort = handle.abort_handle();
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
        TaskHandle { abort }
    }

    /// Aborts the pending task. Returns true if one was still outstanding.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                live
            }
            None => false,
        }
    }

    /// Waits for the pending task, if any, to run to completion.
    pub async fn finish(&self) {
        let pending = self.pending.lock().take();
        if let Some(handle) = pending {
            let _ = handle.await;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

/// Handle to one scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}
