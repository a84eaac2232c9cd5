//! Single-shot, cancellable timers.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Holds at most one pending single-shot task.
///
/// Arming replaces (and cancels) whatever was pending. Cancelling only stops
/// tasks that have not fired yet; a task already running completes. Dropping
/// the slot cancels the pending task.
#[derive(Debug, Default)]
pub struct TimerSlot {
    pending: Mutex<Option<CancellationToken>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless cancelled or re-armed first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        task.await;
                    }
                }
            }
        });
    }

    /// Cancel the pending task. Returns whether one was armed.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(token) => {
                let was_live = !token.is_cancelled();
                token.cancel();
                was_live
            }
            None => false,
        }
    }

    /// Whether a task is armed and not cancelled. A task that already fired
    /// still counts until the slot is re-armed or cancelled.
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(token) = self.pending.get_mut().take() {
            token.cancel();
        }
    }
}
