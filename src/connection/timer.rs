//! One-shot retry timer owned by the connection manager

use std::time::Duration;
use tokio::task::JoinHandle;

/// At most one pending deferred action; arming replaces (cancels) the old one
#[derive(Debug, Default)]
pub struct RetryTimer {
    pending: Option<JoinHandle<()>>,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay`, cancelling anything armed before
    pub fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        }));
    }

    /// Cancel the pending action; returns whether one was still waiting
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
