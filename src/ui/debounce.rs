//! Trailing-edge debouncing on the tokio timer.

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

/// Wrapper that runs its function once the calls stop for `delay`.
///
/// Each [`call`](Self::call) cancels the pending run and schedules a new one
/// with the latest arguments. Dropping the wrapper cancels any pending run.
pub struct Debounced<A> {
    func: Arc<dyn Fn(A) + Send + Sync>,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

pub fn debounce<A, F>(func: F, delay: Duration) -> Debounced<A>
where
    A: Send + 'static,
    F: Fn(A) + Send + Sync + 'static,
{
    Debounced {
        func: Arc::new(func),
        delay,
        pending: Mutex::new(None),
    }
}

impl<A: Send + 'static> Debounced<A> {
    /// Schedule `func(args)` after the quiet period. Needs a tokio runtime.
    pub fn call(&self, args: A) {
        // Deadline is fixed here, not when the task first gets polled.
        let timer = tokio::time::sleep(self.delay);
        let func = self.func.clone();

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            timer.await;
            func(args);
        }));
    }

    /// Drop the scheduled run, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<A> Drop for Debounced<A> {
    fn drop(&mut self) {
        if let Some(previous) = self.pending.get_mut().take() {
            previous.abort();
        }
    }
}
