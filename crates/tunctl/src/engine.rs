//! Adapter for an external packet-forwarding engine process.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, warn};
use tunctl_core::{Engine, EngineError, TrafficCounters};

/// Runs the forwarding engine as a child process. The engine receives the
/// configuration path on its command line and opens the tun device named in
/// the configuration itself; a non-negative descriptor is forwarded when the
/// provisioner supplied one.
pub struct ProcessEngine {
    binary: PathBuf,
    /// Interface whose sysfs statistics back [`Engine::stats`].
    device: String,
    log_file: PathBuf,
    child: Mutex<Option<Child>>,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<PathBuf>, device: &str, log_file: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            device: device.to_string(),
            log_file: log_file.into(),
            child: Mutex::new(None),
        }
    }

    fn read_counter(&self, name: &str) -> u64 {
        let path = format!("/sys/class/net/{}/statistics/{}", self.device, name);
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

impl Engine for ProcessEngine {
    fn run(&self, config_path: &Path, tun_fd: i32) -> Result<(), EngineError> {
        let mut command = Command::new(&self.binary);
        command.arg(config_path);
        if tun_fd >= 0 {
            command.arg(tun_fd.to_string());
        }
        command.stdin(Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| EngineError::Start(format!("{}: {e}", self.binary.display())))?;
        debug!("Engine process {} started", child.id());
        *self.child.lock().unwrap() = Some(child);

        // Blocks until the process exits, whether from a stop request or on
        // its own.
        let status = loop {
            let mut guard = self.child.lock().unwrap();
            let Some(child) = guard.as_mut() else {
                return Ok(());
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    break status;
                }
                Ok(None) => {}
                Err(e) => {
                    guard.take();
                    return Err(EngineError::Exited(format!("wait failed: {e}")));
                }
            }
            drop(guard);
            std::thread::sleep(std::time::Duration::from_millis(100));
        };

        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Exited(format!("engine exited with {status}")))
        }
    }

    fn stop(&self) {
        let mut guard = self.child.lock().unwrap();
        if let Some(child) = guard.as_mut() {
            debug!("Killing engine process {}", child.id());
            if let Err(e) = child.kill() {
                warn!("Failed to kill engine process: {e}");
            }
        }
    }

    fn stats(&self) -> TrafficCounters {
        // From the device's perspective rx is traffic entering the tunnel
        // and tx is traffic coming back out of it.
        TrafficCounters {
            tx_packets: self.read_counter("rx_packets"),
            tx_bytes: self.read_counter("rx_bytes"),
            rx_packets: self.read_counter("tx_packets"),
            rx_bytes: self.read_counter("tx_bytes"),
        }
    }

    fn logs(&self, max_bytes: usize) -> String {
        let Ok(content) = std::fs::read_to_string(&self.log_file) else {
            return String::new();
        };
        if content.len() <= max_bytes {
            return content;
        }
        let mut start = content.len() - max_bytes;
        while !content.is_char_boundary(start) {
            start += 1;
        }
        content[start..].to_string()
    }
}
