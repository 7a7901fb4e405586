//! Liveness tracking for an open controller connection: a heartbeat timer
//! that degrades to `Lost` when no bytes have been read in too long, so the
//! Controller knows when to start a reconnect/backoff cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct ConnectionWatchConfig {
    pub timeout_ms: u64,
    pub check_interval_ms: u64,
}

impl Default for ConnectionWatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            check_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionWatchState {
    Healthy,
    Degraded,
    Lost,
}

/// Tracks time since the last observed heartbeat (any received byte counts)
/// and reports a coarse health state the Controller polls or subscribes to.
pub struct ConnectionWatcher {
    config: ConnectionWatchConfig,
    last_heartbeat_ms: Arc<AtomicU64>,
    epoch: Instant,
    stop: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionWatcher {
    pub fn new(config: ConnectionWatchConfig) -> Self {
        Self {
            config,
            last_heartbeat_ms: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            stop: Arc::new(Notify::new()),
            task: None,
        }
    }

    pub fn heartbeat(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_heartbeat_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn time_since_heartbeat(&self) -> Duration {
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(last))
    }

    pub fn get_state(&self) -> ConnectionWatchState {
        let since = self.time_since_heartbeat();
        if since.as_millis() as u64 >= self.config.timeout_ms {
            ConnectionWatchState::Lost
        } else if since.as_millis() as u64 >= self.config.timeout_ms / 2 {
            ConnectionWatchState::Degraded
        } else {
            ConnectionWatchState::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.get_state() == ConnectionWatchState::Healthy
    }

    pub fn is_lost(&self) -> bool {
        self.get_state() == ConnectionWatchState::Lost
    }

    /// Spawn a background ticker; the caller observes state via `get_state`.
    /// `on_lost` fires at most once per transition into `Lost`.
    pub fn start(&mut self, on_lost: impl Fn() + Send + 'static) {
        self.heartbeat();
        let last_heartbeat_ms = self.last_heartbeat_ms.clone();
        let epoch = self.epoch;
        let config = self.config;
        let stop = self.stop.clone();
        let interval = Duration::from_millis(config.check_interval_ms);

        self.task = Some(tokio::spawn(async move {
            let mut was_lost = false;
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(interval) => {
                        let last = last_heartbeat_ms.load(Ordering::Relaxed);
                        let now = epoch.elapsed().as_millis() as u64;
                        let lost = now.saturating_sub(last) >= config.timeout_ms;
                        if lost && !was_lost {
                            on_lost();
                        }
                        was_lost = lost;
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        self.stop.notify_one();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_watcher_reports_healthy_after_heartbeat() {
        let watcher = ConnectionWatcher::new(ConnectionWatchConfig::default());
        watcher.heartbeat();
        assert_eq!(watcher.get_state(), ConnectionWatchState::Healthy);
    }

    #[test]
    fn watcher_without_any_heartbeat_is_lost_after_timeout_elapses() {
        let config = ConnectionWatchConfig {
            timeout_ms: 0,
            check_interval_ms: 500,
        };
        let watcher = ConnectionWatcher::new(config);
        assert_eq!(watcher.get_state(), ConnectionWatchState::Lost);
    }
}
