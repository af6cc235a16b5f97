//! VPN session controller.
//!
//! The state machine that owns a tunnel session: it snapshots preferences,
//! provisions the virtual interface, persists the engine configuration,
//! supervises the engine process and tears everything down in the safe
//! order. At most one session exists at a time; exclusivity is enforced by
//! the state machine itself, not by locking callers out.
//!
//! ```text
//! Stopped ──start──▶ Starting ──▶ Running ──stop/exit──▶ Stopping ──▶ Stopped
//! ```
//!
//! `Starting` and `Stopping` are guard states: a start request while the
//! session is anything but `Stopped` is a no-op, as is a stop request while
//! `Stopped`/`Stopping`. A stop that arrives during `Starting` is queued and
//! honored once `Running` is reached.

use crate::engine::Engine;
use crate::layout::CacheLayout;
use crate::platform::{
    AppResolver, InterfaceRequest, TunInterface, TunProvisioner, LAN_BYPASS_IPV4, LAN_BYPASS_IPV6,
};
use crate::prefs::{self, Preferences, PreferenceSnapshot, PrefsError};
use crate::synth::{self, SynthError};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Where the synthesized configuration lives between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStrategy {
    /// Rebuild the document from scratch on every start.
    Regenerate,
    /// Update the persisted document in place, preserving foreign keys.
    Merge,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SessionPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionPhase::Running)
    }
}

/// State-change notification for external observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { label: String },
    Stopped,
}

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Platform denied the virtual interface")]
    Establish,

    #[error(transparent)]
    Synth(#[from] SynthError),

    #[error(transparent)]
    Prefs(#[from] PrefsError),
}

/// Controller identity and policy knobs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Our own application identifier, excluded from the tunnel whenever no
    /// explicit allow entry exists (self-tunneling guard).
    pub self_id: String,
    pub strategy: ConfigStrategy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            self_id: "org.tunctl".to_string(),
            strategy: ConfigStrategy::Regenerate,
        }
    }
}

/// Runtime record of the single live session.
struct SessionState {
    label: String,
    /// Owned interface handle; dropped only after the engine has exited.
    tun: Box<dyn TunInterface>,
}

struct Inner {
    phase: SessionPhase,
    session: Option<SessionState>,
    /// Completion signal from the engine-monitoring task.
    engine_done: Option<watch::Receiver<bool>>,
}

/// The VPN session controller.
pub struct SessionController {
    config: ControllerConfig,
    layout: CacheLayout,
    prefs: Arc<Mutex<Preferences>>,
    provisioner: Arc<dyn TunProvisioner>,
    resolver: Arc<dyn AppResolver>,
    engine: Arc<dyn Engine>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    running_tx: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(
        config: ControllerConfig,
        layout: CacheLayout,
        prefs: Arc<Mutex<Preferences>>,
        provisioner: Arc<dyn TunProvisioner>,
        resolver: Arc<dyn AppResolver>,
        engine: Arc<dyn Engine>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let (running_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            layout,
            prefs,
            provisioner,
            resolver,
            engine,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Stopped,
                session: None,
                engine_done: None,
            }),
            events,
            running_tx,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().unwrap().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Human-readable label of the live session, if any.
    pub fn session_label(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .session
            .as_ref()
            .map(|s| s.label.clone())
    }

    /// Subscribe to state-change notifications.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watch channel that is `true` exactly while the session is `Running`.
    /// The statistics monitor keys off this.
    pub fn running_watch(&self) -> watch::Receiver<bool> {
        self.running_tx.subscribe()
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    /// Start a session. Returns `Ok(false)` when a session already exists
    /// (no-op), `Ok(true)` once the session is `Running`.
    pub async fn start(self: &Arc<Self>) -> Result<bool, ControllerError> {
        // The lock is held across the whole transition: no awaits happen
        // inside, and holding it is what queues a concurrent stop request
        // until `Running` is reached.
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != SessionPhase::Stopped {
            debug!("Start requested while {:?}, ignoring", inner.phase);
            return Ok(false);
        }
        inner.phase = SessionPhase::Starting;

        let snapshot = self.prefs.lock().unwrap().snapshot();
        let label = session_label(&snapshot);
        info!("Starting session ({})", label);

        let request = self.build_request(&snapshot);

        let Some(tun) = self.provisioner.establish(&request) else {
            warn!("Platform denied the virtual interface, aborting start");
            inner.phase = SessionPhase::Stopped;
            return Err(ControllerError::Establish);
        };

        let config_path = self.layout.config_file();
        let config = synth::synthesize(&snapshot, &self.layout.log_file(), &self.layout);
        let written = match self.config.strategy {
            ConfigStrategy::Regenerate => config.write_to(&config_path),
            ConfigStrategy::Merge => config.merge_write(&config_path),
        };
        if let Err(e) = written {
            error!("Failed to persist engine configuration: {e}");
            drop(tun);
            inner.phase = SessionPhase::Stopped;
            return Err(e.into());
        }

        if let Err(e) = self.prefs.lock().unwrap().set_enabled(true) {
            error!("Failed to mark session enabled: {e}");
            drop(tun);
            inner.phase = SessionPhase::Stopped;
            return Err(e.into());
        }

        let fd = tun.descriptor();
        let (done_tx, done_rx) = watch::channel(false);
        inner.session = Some(SessionState {
            label: label.clone(),
            tun,
        });
        inner.engine_done = Some(done_rx);
        inner.phase = SessionPhase::Running;
        drop(inner);

        // The engine call blocks until exit, so it runs on a dedicated
        // blocking task; its completion drives the stop transition.
        let engine = Arc::clone(&self.engine);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let outcome =
                tokio::task::spawn_blocking(move || engine.run(&config_path, fd)).await;
            match outcome {
                Ok(Ok(())) => info!("Engine exited"),
                Ok(Err(e)) => warn!("Engine exited with error: {e}"),
                Err(e) => error!("Engine task panicked: {e}"),
            }
            let _ = done_tx.send(true);
            // An engine-initiated exit drives the same stop transition as an
            // external stop request.
            controller.stop().await;
        });

        let _ = self.running_tx.send(true);
        let _ = self.events.send(SessionEvent::Started { label });
        info!("Session running");
        Ok(true)
    }

    /// Stop the session. Returns `false` (and fires no notification) when
    /// nothing was running.
    pub async fn stop(self: &Arc<Self>) -> bool {
        let done_rx = {
            let mut inner = self.inner.lock().unwrap();
            if matches!(inner.phase, SessionPhase::Stopped | SessionPhase::Stopping) {
                debug!("Stop requested while {:?}, ignoring", inner.phase);
                return false;
            }
            inner.phase = SessionPhase::Stopping;
            inner.engine_done.take()
        };

        info!("Stopping session");
        self.engine.stop();

        // The engine may still be reading from the interface descriptor:
        // wait for it to exit before the handle is released. This wait is
        // not cancellable.
        if let Some(mut done) = done_rx {
            if done.wait_for(|exited| *exited).await.is_err() {
                warn!("Engine monitor dropped before signalling exit");
            }
        }

        let session = {
            let mut inner = self.inner.lock().unwrap();
            inner.phase = SessionPhase::Stopped;
            inner.session.take()
        };
        drop(session); // releases the interface handle

        // Stop-path errors are logged but never keep us from Stopped.
        if let Err(e) = self.prefs.lock().unwrap().set_enabled(false) {
            warn!("Failed to clear session flag: {e}");
        }

        let _ = self.running_tx.send(false);
        let _ = self.events.send(SessionEvent::Stopped);
        info!("Session stopped");
        true
    }

    /// The platform revoked the interface out-of-band; treated exactly like
    /// an external stop request.
    pub async fn on_interface_revoked(self: &Arc<Self>) {
        warn!("Virtual interface revoked by platform");
        self.stop().await;
    }

    /// Build the ordered interface-provisioning request from a snapshot.
    fn build_request(&self, snapshot: &PreferenceSnapshot) -> InterfaceRequest {
        let mut request = InterfaceRequest::new(prefs::TUNNEL_MTU);

        // Exclusions must land before the default route of the same family;
        // on some platforms a later exclusion has no effect on an installed
        // covering route.
        let exclude_lan = snapshot.bypass_lan && self.provisioner.supports_route_exclusion();

        if snapshot.ipv4 {
            if exclude_lan {
                for prefix in LAN_BYPASS_IPV4 {
                    request.exclude_route(prefix);
                }
            }
            request.add_address(prefs::TUNNEL_IPV4_ADDRESS, prefs::TUNNEL_IPV4_PREFIX);
            request.add_route("0.0.0.0", 0);
            if !snapshot.remote_dns && !snapshot.dns_ipv4.is_empty() {
                request.add_dns_server(&snapshot.dns_ipv4);
            }
        }
        if snapshot.ipv6 {
            if exclude_lan {
                for prefix in LAN_BYPASS_IPV6 {
                    request.exclude_route(prefix);
                }
            }
            request.add_address(prefs::TUNNEL_IPV6_ADDRESS, prefs::TUNNEL_IPV6_PREFIX);
            request.add_route("::", 0);
            if !snapshot.remote_dns && !snapshot.dns_ipv6.is_empty() {
                request.add_dns_server(&snapshot.dns_ipv6);
            }
        }
        if snapshot.remote_dns {
            if snapshot.ipv4 {
                request.add_dns_server(prefs::MAPPED_DNS_IPV4);
            }
            if snapshot.ipv6 {
                request.add_dns_server(prefs::MAPPED_DNS_IPV6);
            }
        }

        // Global mode: the list is a deny set. Per-app mode: an allow set.
        // A missing app skips that entry only.
        let mut allowed_any = false;
        for app in &snapshot.apps {
            if !self.resolver.exists(app) {
                debug!("Skipping unresolvable app {:?}", app);
                continue;
            }
            if snapshot.global_mode {
                request.deny_app(app);
            } else {
                request.allow_app(app);
                allowed_any = true;
            }
        }
        // Without an explicit allow entry, exclude ourselves so the
        // controller's own traffic never loops through the tunnel.
        if !allowed_any {
            request.deny_app(&self.config.self_id);
        }

        request
    }
}

/// Session label shown to the user, derived from the enabled families and
/// the filtering mode.
fn session_label(snapshot: &PreferenceSnapshot) -> String {
    let families = match (snapshot.ipv4, snapshot.ipv6) {
        (true, true) => "IPv4+IPv6",
        (true, false) => "IPv4",
        (false, true) => "IPv6",
        // Snapshot invariant: at least one family is always enabled.
        (false, false) => "IPv4",
    };
    let mode = if snapshot.global_mode { "global" } else { "per-app" };
    format!("{families} ({mode})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FakeEngine;
    use crate::platform::{AllowAllResolver, FixedAppResolver, InterfaceOp, RecordingProvisioner};
    use std::time::Duration;

    struct Fixture {
        controller: Arc<SessionController>,
        provisioner: Arc<RecordingProvisioner>,
        engine: Arc<FakeEngine>,
        prefs: Arc<Mutex<Preferences>>,
        layout: CacheLayout,
    }

    fn fixture(tag: &str) -> Fixture {
        fixture_with(tag, RecordingProvisioner::new(), Arc::new(AllowAllResolver))
    }

    fn fixture_with(
        tag: &str,
        provisioner: Arc<RecordingProvisioner>,
        resolver: Arc<dyn AppResolver>,
    ) -> Fixture {
        let dir = std::env::temp_dir().join(format!(
            "tunctl-controller-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let layout = CacheLayout::new(&dir);
        layout.ensure().unwrap();

        let prefs = Arc::new(Mutex::new(Preferences::load(layout.prefs_file())));
        let engine = Arc::new(FakeEngine::new());
        let controller = SessionController::new(
            ControllerConfig {
                self_id: "org.tunctl".to_string(),
                strategy: ConfigStrategy::Regenerate,
            },
            layout.clone(),
            prefs.clone(),
            provisioner.clone(),
            resolver,
            engine.clone(),
        );
        Fixture {
            controller,
            provisioner,
            engine,
            prefs,
            layout,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(self.layout.root());
        }
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let f = fixture("cycle");
        let mut events = f.controller.events();

        assert!(f.controller.start().await.unwrap());
        assert_eq!(f.controller.phase(), SessionPhase::Running);
        assert_eq!(
            f.controller.session_label().as_deref(),
            Some("IPv4+IPv6 (per-app)")
        );
        assert!(f.prefs.lock().unwrap().enabled());
        assert!(f.layout.config_file().exists());

        let engine = f.engine.clone();
        wait_until(move || engine.is_running()).await;
        assert_eq!(f.engine.last_config(), Some(f.layout.config_file()));
        assert!(f.engine.last_fd().unwrap() > 0);

        assert!(f.controller.stop().await);
        assert_eq!(f.controller.phase(), SessionPhase::Stopped);
        assert!(!f.prefs.lock().unwrap().enabled());
        assert_eq!(f.engine.stop_count(), 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Started { .. }
        ));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Stopped);
    }

    #[tokio::test]
    async fn test_start_while_running_is_noop() {
        let f = fixture("noop-start");

        assert!(f.controller.start().await.unwrap());
        let engine = f.engine.clone();
        wait_until(move || engine.is_running()).await;

        // Second start: still Running, no new interface, no new engine run.
        assert!(!f.controller.start().await.unwrap());
        assert_eq!(f.controller.phase(), SessionPhase::Running);
        assert_eq!(f.provisioner.requests().len(), 1);
        assert_eq!(f.engine.run_count(), 1);

        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_while_stopped_is_noop_without_event() {
        let f = fixture("noop-stop");
        let mut events = f.controller.events();

        assert!(!f.controller.stop().await);
        assert_eq!(f.controller.phase(), SessionPhase::Stopped);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_establish_failure_aborts_cleanly() {
        let f = fixture_with(
            "deny",
            RecordingProvisioner::denying(),
            Arc::new(AllowAllResolver),
        );

        let result = f.controller.start().await;
        assert!(matches!(result, Err(ControllerError::Establish)));
        assert_eq!(f.controller.phase(), SessionPhase::Stopped);
        assert_eq!(f.engine.run_count(), 0);
        assert!(!f.prefs.lock().unwrap().enabled());
        // A fresh start stays possible.
        assert_eq!(f.provisioner.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_lan_bypass_exclusions_precede_default_routes() {
        let f = fixture("bypass");
        f.prefs.lock().unwrap().set_bypass_lan(true).unwrap();

        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        let ops = request.ops();

        for (default_route, excluded) in [
            ("0.0.0.0", LAN_BYPASS_IPV4),
            ("::", LAN_BYPASS_IPV6),
        ] {
            let route_pos = ops
                .iter()
                .position(|op| {
                    matches!(op, InterfaceOp::AddRoute { address, prefix: 0 } if address == default_route)
                })
                .unwrap();
            for prefix in excluded {
                let exclude_pos = ops
                    .iter()
                    .position(|op| matches!(op, InterfaceOp::ExcludeRoute(p) if p == prefix))
                    .unwrap();
                assert!(
                    exclude_pos < route_pos,
                    "{prefix} excluded after default route {default_route}"
                );
            }
        }

        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_no_exclusions_without_platform_capability() {
        let f = fixture_with(
            "nocap",
            RecordingProvisioner::without_route_exclusion(),
            Arc::new(AllowAllResolver),
        );
        f.prefs.lock().unwrap().set_bypass_lan(true).unwrap();

        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert!(!request
            .ops()
            .iter()
            .any(|op| matches!(op, InterfaceOp::ExcludeRoute(_))));

        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_global_mode_inverts_app_list_semantics() {
        let apps = vec!["com.example.a".to_string(), "com.example.b".to_string()];

        let f = fixture("global");
        {
            let mut prefs = f.prefs.lock().unwrap();
            prefs.set_global_mode(true).unwrap();
            prefs.set_apps(&apps).unwrap();
        }
        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert_eq!(
            request.denied_apps(),
            vec!["com.example.a", "com.example.b", "org.tunctl"]
        );
        assert!(request.allowed_apps().is_empty());
        f.controller.stop().await;

        let f = fixture("perapp");
        {
            let mut prefs = f.prefs.lock().unwrap();
            prefs.set_global_mode(false).unwrap();
            prefs.set_apps(&apps).unwrap();
        }
        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert_eq!(request.allowed_apps(), vec!["com.example.a", "com.example.b"]);
        assert!(request.denied_apps().is_empty());
        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_empty_allow_list_excludes_self_only() {
        let f = fixture_with(
            "self-guard",
            RecordingProvisioner::new(),
            // None of the selected apps resolve.
            Arc::new(FixedAppResolver::new(&[])),
        );
        {
            let mut prefs = f.prefs.lock().unwrap();
            prefs.set_global_mode(false).unwrap();
            prefs
                .set_apps(&["com.gone.a".to_string(), "com.gone.b".to_string()])
                .unwrap();
        }

        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert!(request.allowed_apps().is_empty());
        assert_eq!(request.denied_apps(), vec!["org.tunctl"]);

        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_engine_exit_drives_stop_transition() {
        let f = fixture("crash");
        let mut events = f.controller.events();

        f.controller.start().await.unwrap();
        let engine = f.engine.clone();
        wait_until(move || engine.is_running()).await;

        f.engine.crash();
        let controller = f.controller.clone();
        wait_until(move || controller.phase() == SessionPhase::Stopped).await;

        assert!(!f.prefs.lock().unwrap().enabled());
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Started { .. }
        ));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Stopped);

        // The crash is recoverable: a user-initiated restart works.
        assert!(f.controller.start().await.unwrap());
        f.controller.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_stop_lands_after_start() {
        let f = fixture("queued");

        let starter = tokio::spawn({
            let c = f.controller.clone();
            async move { c.start().await.unwrap() }
        });
        let stopper = tokio::spawn({
            let c = f.controller.clone();
            async move {
                // Retry until the stop lands against the live session; a
                // stop racing the start transition queues on it rather than
                // tearing down half-built state.
                loop {
                    if c.stop().await {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });

        assert!(starter.await.unwrap());
        stopper.await.unwrap();
        assert_eq!(f.controller.phase(), SessionPhase::Stopped);
        assert!(!f.prefs.lock().unwrap().enabled());
    }

    #[tokio::test]
    async fn test_engine_start_failure_unwinds_session() {
        let f = fixture("runfail");
        f.engine.fail_next_run();

        // Start succeeds; the engine failure surfaces as an immediate
        // engine-driven stop.
        assert!(f.controller.start().await.unwrap());
        let controller = f.controller.clone();
        wait_until(move || controller.phase() == SessionPhase::Stopped).await;
        assert!(!f.prefs.lock().unwrap().enabled());
        assert_eq!(f.engine.run_count(), 1);
    }

    #[tokio::test]
    async fn test_revocation_is_an_external_stop() {
        let f = fixture("revoke");
        f.controller.start().await.unwrap();
        let engine = f.engine.clone();
        wait_until(move || engine.is_running()).await;

        f.controller.on_interface_revoked().await;
        assert_eq!(f.controller.phase(), SessionPhase::Stopped);
        assert!(!f.prefs.lock().unwrap().enabled());
    }

    #[tokio::test]
    async fn test_dns_registration_modes() {
        // Remote DNS: mapped responders for each enabled family.
        let f = fixture("dns-remote");
        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert_eq!(request.dns_servers(), vec!["198.18.0.2", "fc00::2"]);
        f.controller.stop().await;

        // Local DNS: the configured resolvers.
        let f = fixture("dns-local");
        f.prefs.lock().unwrap().set_remote_dns(false).unwrap();
        f.controller.start().await.unwrap();
        let request = f.provisioner.last_request().unwrap();
        assert_eq!(
            request.dns_servers(),
            vec!["8.8.8.8", "2001:4860:4860::8888"]
        );
        f.controller.stop().await;
    }

    #[tokio::test]
    async fn test_end_to_end_ipv4_global_session() {
        let f = fixture("e2e");
        {
            let mut prefs = f.prefs.lock().unwrap();
            prefs.set_ipv6(false).unwrap();
            prefs.set_global_mode(true).unwrap();
            prefs.set_apps(&["com.example.a".to_string()]).unwrap();
            prefs.set_socks_address("198.51.100.1").unwrap();
            prefs.set_socks_port(1080).unwrap();
            prefs.set_socks_username("user").unwrap();
            prefs.set_socks_password("pass").unwrap();
        }

        f.controller.start().await.unwrap();
        assert_eq!(
            f.controller.session_label().as_deref(),
            Some("IPv4 (global)")
        );

        let request = f.provisioner.last_request().unwrap();
        assert_eq!(request.default_routes(), vec!["0.0.0.0"]);
        assert_eq!(request.denied_apps(), vec!["com.example.a", "org.tunctl"]);
        assert_eq!(request.dns_servers(), vec!["198.18.0.2"]);

        let doc: serde_yaml::Value = serde_yaml::from_str(
            &std::fs::read_to_string(f.layout.config_file()).unwrap(),
        )
        .unwrap();
        let udp = doc.get("socks5").and_then(|v| v.get("udp")).unwrap();
        assert_eq!(udp.get("address").unwrap().as_str(), Some("198.51.100.1"));
        assert_eq!(udp.get("port").unwrap().as_u64(), Some(1080));
        assert_eq!(udp.get("username").unwrap().as_str(), Some("user"));
        assert_eq!(udp.get("password").unwrap().as_str(), Some("pass"));

        f.controller.stop().await;
    }
}
