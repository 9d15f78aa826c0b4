//
// async_runner.rs
//
// Debounced background task loop
//
// Runs one async task repeatedly with a fixed delay between runs. The
// task decides after each run whether the loop keeps going or suspends;
// a suspended runner restarts when resume() is called. At most one loop
// is live per runner at any time.
//

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Task verdict after one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Sleep the configured delay, then run again.
    Continue,
    /// Stop looping until resumed.
    Suspend,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = RunOutcome> + Send>>;

pub struct AsyncRunner {
    task: Arc<dyn Fn() -> TaskFuture + Send + Sync>,
    delay: Duration,
    scheduled: Arc<AtomicBool>,
    /// Bumped by resume(); a loop that suspends while the epoch moved
    /// underneath it keeps running instead of going quiet.
    epoch: Arc<AtomicU64>,
    token: CancellationToken,
}

impl AsyncRunner {
    pub fn new(task: impl Fn() -> TaskFuture + Send + Sync + 'static, delay: Duration) -> Self {
        Self {
            task: Arc::new(task),
            delay,
            scheduled: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            token: CancellationToken::new(),
        }
    }

    /// Spawn the loop if it is not already live.
    pub fn start(&self) {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = Arc::clone(&self.task);
        let delay = self.delay;
        let scheduled = Arc::clone(&self.scheduled);
        let epoch = Arc::clone(&self.epoch);
        let token = self.token.clone();

        tokio::spawn(async move {
            loop {
                if token.is_cancelled() {
                    scheduled.store(false, Ordering::SeqCst);
                    return;
                }
                let epoch_before = epoch.load(Ordering::SeqCst);
                let outcome = task().await;
                match outcome {
                    RunOutcome::Suspend => {
                        scheduled.store(false, Ordering::SeqCst);
                        // A resume() between the run and this point must
                        // not get lost; reclaim the slot and go on.
                        if epoch.load(Ordering::SeqCst) != epoch_before
                            && !scheduled.swap(true, Ordering::SeqCst)
                        {
                            continue;
                        }
                        return;
                    }
                    RunOutcome::Continue => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                scheduled.store(false, Ordering::SeqCst);
                                return;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        });
    }

    /// Restart a suspended loop. Safe to call while the loop is live.
    pub fn resume(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.start();
    }

    /// Run the task once, immediately, outside the loop.
    pub fn force_run(&self) -> TaskFuture {
        (self.task)()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Cancel the loop. The current task run finishes; no further run
    /// starts.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

impl Drop for AsyncRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
