//! Sliding expiry timers for pool entries.
//!
//! An `Expiry` owns a deadline that any lookup may push forward and, once
//! armed, a background waiter that runs a callback when the deadline passes.
//! The callback may decline (the deadline moved after the waiter woke), in
//! which case the waiter sleeps until the new deadline. The waiter is aborted
//! when the expiry is cancelled or dropped.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    task::AbortHandle,
    time::{Instant, sleep_until},
};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::expiry";

pub(crate) struct Expiry {
    ttl: Duration,
    deadline: Arc<Mutex<Instant>>,
    waiter: Mutex<Option<AbortHandle>>,
}

impl Expiry {
    /// Start a window of `ttl` from now. Nothing fires until [`Expiry::arm`] is called.
    pub(crate) fn start(ttl: Duration) -> Self {
        Self {
            ttl,
            deadline: Arc::new(Mutex::new(Instant::now() + ttl)),
            waiter: Mutex::new(None),
        }
    }

    /// Restart the window from now.
    pub(crate) fn reset(&self) {
        *mutex_lock(&self.deadline, SOURCE, "reset") = Instant::now() + self.ttl;
    }

    pub(crate) fn deadline(&self) -> Instant {
        *mutex_lock(&self.deadline, SOURCE, "deadline")
    }

    pub(crate) fn is_due(&self) -> bool {
        Instant::now() >= self.deadline()
    }

    /// Spawn the waiter. `on_expire` runs each time the latest deadline has
    /// passed and returns `true` once the expiry is settled. It may return
    /// `false` only after observing a deadline that is no longer due; the
    /// waiter then sleeps until that deadline.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn arm<F>(&self, mut on_expire: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let deadline = Arc::clone(&self.deadline);
        let task = tokio::spawn(async move {
            loop {
                let due = *mutex_lock(&deadline, SOURCE, "wait");
                if Instant::now() < due {
                    sleep_until(due).await;
                    continue;
                }
                if on_expire() {
                    break;
                }
            }
        });

        let previous = mutex_lock(&self.waiter, SOURCE, "arm").replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        mutex_lock(&self.waiter, SOURCE, "is_armed").is_some()
    }

    /// Abort the pending waiter, if any.
    pub(crate) fn cancel(&self) {
        let waiter = mutex_lock(&self.waiter, SOURCE, "cancel").take();
        if let Some(waiter) = waiter {
            waiter.abort();
        }
    }
}

impl Drop for Expiry {
    fn drop(&mut self) {
        self.cancel();
    }
}
