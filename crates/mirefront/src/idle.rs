//! Idle-activity monitoring for in-world sessions.
//!
//! The monitor polls a shared last-input timestamp. One idle episode runs
//! Active -> Warned (after `idle_timeout` of silence) -> Disconnected (after
//! a further `grace_period`); any input rewinds to Active and re-arms the
//! warning. Stopping the monitor prevents any further callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared last-input timestamp. The command loop calls [`IdleTracker::touch`]
/// on every successful read; the monitor task polls [`IdleTracker::idle_for`].
#[derive(Debug)]
pub struct IdleTracker {
    start: Instant,
    last_input_ms: AtomicU64,
}

impl IdleTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            last_input_ms: AtomicU64::new(0),
        })
    }

    pub fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_input_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        let last = self.last_input_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    /// Silence before the warning fires.
    pub idle_timeout: Duration,
    /// Further silence after the warning before the disconnect fires.
    pub grace_period: Duration,
    /// Poll interval.
    pub tick_interval: Duration,
}

/// Handle to a running idle-monitor task.
#[derive(Debug)]
pub struct IdleMonitor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IdleMonitor {
    /// Launch the monitor task.
    ///
    /// `on_warning` may fire once per idle episode; `on_disconnect` fires at
    /// most once overall, after which the task exits.
    pub fn spawn(
        cfg: IdleConfig,
        tracker: Arc<IdleTracker>,
        mut on_warning: impl FnMut() + Send + 'static,
        mut on_disconnect: impl FnMut() + Send + 'static,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cfg.tick_interval);
            let mut warned = false;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                        let idle = tracker.idle_for();
                        if warned && idle < cfg.idle_timeout {
                            // Input arrived since the warning: new episode.
                            warned = false;
                        }
                        if !warned && idle >= cfg.idle_timeout {
                            warned = true;
                            on_warning();
                        }
                        if warned && idle >= cfg.idle_timeout + cfg.grace_period {
                            on_disconnect();
                            return;
                        }
                    }
                }
            }
        });
        Self { stop_tx, handle }
    }

    /// Stop the monitor. Idempotent; no callback fires after this returns
    /// and the task has wound down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }
}
