//! Forwarding-engine interface.
//!
//! The packet-forwarding engine is an opaque external component; the
//! controller depends only on the [`Engine`] trait. `run` follows the
//! engine's native shape and blocks until the engine exits, so the
//! controller drives it from a dedicated blocking task and watches for the
//! exit asynchronously.

use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};

/// Point-in-time read of the engine's four monotonic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
}

/// Engine errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    Start(String),

    #[error("Engine exited abnormally: {0}")]
    Exited(String),
}

/// Control surface of the forwarding engine.
pub trait Engine: Send + Sync + 'static {
    /// Run the engine against a configuration document and an interface
    /// descriptor. Blocks until the engine exits, whether through [`stop`]
    /// or on its own.
    ///
    /// [`stop`]: Engine::stop
    fn run(&self, config_path: &Path, tun_fd: i32) -> Result<(), EngineError>;

    /// Signal the engine to stop. Returns immediately; `run` unblocks once
    /// the engine has wound down.
    fn stop(&self);

    /// Read the traffic counters. Must be fast and non-blocking.
    fn stats(&self) -> TrafficCounters;

    /// Most recent engine log output, at most `max_bytes` long.
    fn logs(&self, max_bytes: usize) -> String;
}

#[derive(Default)]
struct FakeState {
    running: bool,
    exit_requested: bool,
    runs: u32,
    stop_calls: u32,
    last_config: Option<PathBuf>,
    last_fd: Option<i32>,
    fail_next_run: bool,
}

/// In-memory engine double. `run` blocks on a condvar until [`stop`] (or
/// [`crash`]) is called, mirroring the real engine's blocking shape.
///
/// [`stop`]: Engine::stop
/// [`crash`]: FakeEngine::crash
pub struct FakeEngine {
    state: Mutex<FakeState>,
    exited: Condvar,
    counters: Mutex<TrafficCounters>,
    log: Mutex<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            exited: Condvar::new(),
            counters: Mutex::new(TrafficCounters::default()),
            log: Mutex::new(String::new()),
        }
    }

    /// Make the next `run` call return an error immediately.
    pub fn fail_next_run(&self) {
        self.state.lock().unwrap().fail_next_run = true;
    }

    /// Simulate an engine-initiated exit: `run` returns without `stop`
    /// having been called.
    pub fn crash(&self) {
        let mut state = self.state.lock().unwrap();
        state.exit_requested = true;
        self.exited.notify_all();
    }

    pub fn set_counters(&self, counters: TrafficCounters) {
        *self.counters.lock().unwrap() = counters;
    }

    pub fn append_log(&self, line: &str) {
        let mut log = self.log.lock().unwrap();
        log.push_str(line);
        log.push('\n');
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn run_count(&self) -> u32 {
        self.state.lock().unwrap().runs
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().unwrap().stop_calls
    }

    pub fn last_config(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().last_config.clone()
    }

    pub fn last_fd(&self) -> Option<i32> {
        self.state.lock().unwrap().last_fd
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for FakeEngine {
    fn run(&self, config_path: &Path, tun_fd: i32) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.runs += 1;
        state.last_config = Some(config_path.to_path_buf());
        state.last_fd = Some(tun_fd);
        if state.fail_next_run {
            state.fail_next_run = false;
            return Err(EngineError::Start("injected failure".to_string()));
        }
        state.running = true;
        while !state.exit_requested {
            state = self.exited.wait(state).unwrap();
        }
        state.running = false;
        state.exit_requested = false;
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stop_calls += 1;
        state.exit_requested = true;
        self.exited.notify_all();
    }

    fn stats(&self) -> TrafficCounters {
        *self.counters.lock().unwrap()
    }

    fn logs(&self, max_bytes: usize) -> String {
        let log = self.log.lock().unwrap();
        let start = log.len().saturating_sub(max_bytes);
        log[start..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fake_engine_run_blocks_until_stop() {
        let engine = Arc::new(FakeEngine::new());
        let runner = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.run(Path::new("/cache/tproxy.yml"), 42))
        };

        // Wait for run to take hold.
        while !engine.is_running() {
            std::thread::yield_now();
        }
        assert_eq!(engine.last_fd(), Some(42));

        engine.stop();
        assert!(runner.join().unwrap().is_ok());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_fake_engine_failed_run_returns_immediately() {
        let engine = FakeEngine::new();
        engine.fail_next_run();
        assert!(engine.run(Path::new("/tmp/c.yml"), 1).is_err());
        assert!(!engine.is_running());
    }

    #[test]
    fn test_logs_tail() {
        let engine = FakeEngine::new();
        engine.append_log("first line");
        engine.append_log("second line");
        let tail = engine.logs(12);
        assert_eq!(tail, "second line\n");
        assert_eq!(engine.logs(1024), "first line\nsecond line\n");
    }
}
