//! Traffic statistics monitor.
//!
//! Polls the engine's monotonic transfer counters on a fixed interval while
//! a session is running and pushes human-readable totals and rates to a
//! status sink. The first update of a session raises the status surface; the
//! rest refresh it in place.

use crate::engine::{Engine, TrafficCounters};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Default polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One observation of the engine counters.
#[derive(Debug, Clone, Copy)]
struct TrafficSample {
    at: Instant,
    counters: TrafficCounters,
}

/// A rendered statistics update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficUpdate {
    /// e.g. `"↑ 1.2 MB (12.3 KB/s)"`
    pub upload: String,
    /// e.g. `"↓ 804.0 KB (8.1 KB/s)"`
    pub download: String,
}

/// Where updates land. The platform notification surface implements this;
/// tests use a recording sink.
pub trait StatusSink: Send + Sync {
    /// Raise the status surface with the first update of a session.
    fn notify(&self, update: &TrafficUpdate);
    /// Refresh an already-raised surface in place.
    fn refresh(&self, update: &TrafficUpdate);
}

/// Periodic poller bound to one controller's running state.
pub struct TrafficMonitor {
    engine: Arc<dyn Engine>,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
}

impl TrafficMonitor {
    pub fn new(engine: Arc<dyn Engine>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            engine,
            sink,
            interval: POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Drive the monitor until the `running` channel closes. Polling starts
    /// when the session reports running and stops when it reports stopped;
    /// each session begins with a fresh baseline and a `notify`.
    pub async fn run(self, mut running: watch::Receiver<bool>) {
        loop {
            if running.wait_for(|r| *r).await.is_err() {
                return;
            }
            debug!("Session running, starting statistics polling");
            self.poll_session(&mut running).await;
            debug!("Session stopped, statistics polling paused");
        }
    }

    /// Poll for the duration of one session.
    async fn poll_session(&self, running: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick establishes the baseline sample.
        let mut baseline: Option<TrafficSample> = None;
        let mut rates: (f64, f64) = (0.0, 0.0);
        let mut notified = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = running.changed() => {
                    match changed {
                        Ok(()) if *running.borrow() => continue,
                        _ => return,
                    }
                }
            }

            let sample = TrafficSample {
                at: Instant::now(),
                counters: self.engine.stats(),
            };
            let Some(prev) = baseline else {
                baseline = Some(sample);
                continue;
            };

            // Rates hold their previous value across a sub-second delta.
            let elapsed = sample.at.duration_since(prev.at).as_secs_f64();
            if elapsed >= 1.0 {
                rates = (
                    sample.counters.tx_bytes.saturating_sub(prev.counters.tx_bytes) as f64
                        / elapsed,
                    sample.counters.rx_bytes.saturating_sub(prev.counters.rx_bytes) as f64
                        / elapsed,
                );
            }
            baseline = Some(sample);

            let update = TrafficUpdate {
                upload: format!(
                    "↑ {} ({})",
                    format_bytes(sample.counters.tx_bytes),
                    format_rate(rates.0)
                ),
                download: format!(
                    "↓ {} ({})",
                    format_bytes(sample.counters.rx_bytes),
                    format_rate(rates.1)
                ),
            };
            if notified {
                self.sink.refresh(&update);
            } else {
                self.sink.notify(&update);
                notified = true;
            }
        }
    }
}

/// Cumulative byte totals: integer bytes below 1 KB, one decimal above.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Instantaneous transfer rate.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    if bytes_per_sec >= MB {
        format!("{:.1} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.1} KB/s", bytes_per_sec / KB)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}
