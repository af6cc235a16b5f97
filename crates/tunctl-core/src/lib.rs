//! tunctl-core - Control plane for a SOCKS5-backed local tunnel
//!
//! Owns everything around the packet-forwarding engine: preference
//! persistence, configuration synthesis, virtual-interface provisioning,
//! session lifecycle and traffic statistics. The engine itself is an
//! injected dependency behind the [`Engine`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     SessionController                      │
//! │                                                            │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐   │
//! │  │ Preferences │──▶│ Synthesizer │──▶│ tproxy.yml      │   │
//! │  │ (prefs.json)│   │             │   │ (engine config) │   │
//! │  └─────────────┘   └─────────────┘   └────────┬────────┘   │
//! │         │                                     │            │
//! │         ▼                                     ▼            │
//! │  ┌──────────────┐   descriptor   ┌────────────────────┐    │
//! │  │TunProvisioner│───────────────▶│       Engine       │    │
//! │  │ (interface)  │                │ (blocking run loop)│    │
//! │  └──────────────┘                └─────────┬──────────┘    │
//! │                                            │ counters      │
//! │                                            ▼               │
//! │                                  ┌────────────────────┐    │
//! │                                  │   TrafficMonitor   │    │
//! │                                  └────────────────────┘    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Session lifecycle
//!
//! - **Start**: snapshot preferences, provision the interface (LAN-bypass
//!   exclusions before default routes), synthesize and persist the engine
//!   configuration, hand the descriptor to the engine.
//! - **Stop**: ask the engine to exit, wait for the acknowledgement, only
//!   then release the interface handle.
//! - Engine crashes and platform revocations drive the same stop
//!   transition as an explicit request.

mod controller;
mod engine;
mod layout;
mod monitor;
mod platform;
mod prefs;
mod synth;

pub use controller::{
    ConfigStrategy, ControllerConfig, ControllerError, SessionController, SessionEvent,
    SessionPhase,
};
pub use engine::{Engine, EngineError, FakeEngine, TrafficCounters};
pub use layout::CacheLayout;
pub use monitor::{format_bytes, format_rate, StatusSink, TrafficMonitor, TrafficUpdate};
pub use platform::{
    AllowAllResolver, AppResolver, FixedAppResolver, InterfaceOp, InterfaceRequest,
    RecordingProvisioner, TunInterface, TunProvisioner, LAN_BYPASS_IPV4, LAN_BYPASS_IPV6,
};
pub use prefs::{PreferenceSnapshot, Preferences, PrefsError};
pub use synth::{synthesize, SynthError, TunnelConfig};
