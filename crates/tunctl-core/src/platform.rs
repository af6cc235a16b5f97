//! Platform interface-provisioning primitive.
//!
//! The controller describes the virtual interface it wants as an ordered
//! [`InterfaceRequest`] and hands it to a [`TunProvisioner`]. Provisioning
//! itself is platform glue and lives outside this crate; tests use
//! [`RecordingProvisioner`] to observe exactly what was requested.

use std::sync::{Arc, Mutex};

/// LAN-bypass prefixes excluded from the IPv4 default route.
pub const LAN_BYPASS_IPV4: &[&str] = &[
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.168.0.0/16",
];

/// LAN-bypass prefixes excluded from the IPv6 default route.
pub const LAN_BYPASS_IPV6: &[&str] = &["::1/128", "::ffff:0:0/96", "fc00::/7", "fe80::/10"];

/// One recorded builder operation. Order matters: route exclusions must land
/// before the default route of the same family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceOp {
    ExcludeRoute(String),
    AddAddress { address: String, prefix: u8 },
    AddRoute { address: String, prefix: u8 },
    AddDnsServer(String),
    AllowApp(String),
    DenyApp(String),
}

/// Ordered description of the virtual interface to provision.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRequest {
    pub non_blocking: bool,
    pub mtu: u32,
    ops: Vec<InterfaceOp>,
}

impl InterfaceRequest {
    pub fn new(mtu: u32) -> Self {
        Self {
            non_blocking: true,
            mtu,
            ops: Vec::new(),
        }
    }

    pub fn exclude_route(&mut self, prefix: &str) {
        self.ops.push(InterfaceOp::ExcludeRoute(prefix.to_string()));
    }

    pub fn add_address(&mut self, address: &str, prefix: u8) {
        self.ops.push(InterfaceOp::AddAddress {
            address: address.to_string(),
            prefix,
        });
    }

    pub fn add_route(&mut self, address: &str, prefix: u8) {
        self.ops.push(InterfaceOp::AddRoute {
            address: address.to_string(),
            prefix,
        });
    }

    pub fn add_dns_server(&mut self, address: &str) {
        self.ops.push(InterfaceOp::AddDnsServer(address.to_string()));
    }

    pub fn allow_app(&mut self, id: &str) {
        self.ops.push(InterfaceOp::AllowApp(id.to_string()));
    }

    pub fn deny_app(&mut self, id: &str) {
        self.ops.push(InterfaceOp::DenyApp(id.to_string()));
    }

    /// Operations in the order they were requested.
    pub fn ops(&self) -> &[InterfaceOp] {
        &self.ops
    }

    pub fn denied_apps(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                InterfaceOp::DenyApp(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn allowed_apps(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                InterfaceOp::AllowApp(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn dns_servers(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                InterfaceOp::AddDnsServer(addr) => Some(addr.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn default_routes(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                InterfaceOp::AddRoute { address, prefix: 0 } => Some(address.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Opaque handle to a provisioned interface; exactly one is live per
/// session. Dropping the handle releases the interface.
pub trait TunInterface: Send + Sync {
    /// Raw descriptor handed to the forwarding engine.
    fn descriptor(&self) -> i32;
}

/// Platform primitive that turns an [`InterfaceRequest`] into a live
/// interface.
///
/// Route exclusion is an optional capability: it is probed once via
/// [`TunProvisioner::supports_route_exclusion`], and the controller simply
/// skips exclusion when unsupported.
pub trait TunProvisioner: Send + Sync {
    fn supports_route_exclusion(&self) -> bool;

    /// `None` means the platform denied the interface (permission missing,
    /// no networks available). The caller aborts the start transition.
    fn establish(&self, request: &InterfaceRequest) -> Option<Box<dyn TunInterface>>;
}

/// Resolves application identifiers for per-app filtering. A selected app
/// may have been uninstalled since it was chosen; resolution failure skips
/// that single entry and is never fatal.
pub trait AppResolver: Send + Sync {
    fn exists(&self, id: &str) -> bool;
}

/// Resolver for platforms without an app registry: every identifier
/// resolves.
pub struct AllowAllResolver;

impl AppResolver for AllowAllResolver {
    fn exists(&self, _id: &str) -> bool {
        true
    }
}

/// Fixed-set resolver, used in tests to model uninstalled apps.
pub struct FixedAppResolver {
    known: std::collections::HashSet<String>,
}

impl FixedAppResolver {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AppResolver for FixedAppResolver {
    fn exists(&self, id: &str) -> bool {
        self.known.contains(id)
    }
}

/// In-memory interface handle for the recording provisioner.
pub struct RecordedInterface {
    descriptor: i32,
}

impl TunInterface for RecordedInterface {
    fn descriptor(&self) -> i32 {
        self.descriptor
    }
}

/// Test/dry-run provisioner that records every request it sees.
pub struct RecordingProvisioner {
    route_exclusion: bool,
    deny_establish: bool,
    requests: Mutex<Vec<InterfaceRequest>>,
}

impl RecordingProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            route_exclusion: true,
            deny_establish: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A provisioner on a platform without the route-exclusion capability.
    pub fn without_route_exclusion() -> Arc<Self> {
        Arc::new(Self {
            route_exclusion: false,
            deny_establish: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A provisioner that refuses to establish, as when permission was not
    /// granted.
    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            route_exclusion: true,
            deny_establish: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<InterfaceRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<InterfaceRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl TunProvisioner for RecordingProvisioner {
    fn supports_route_exclusion(&self) -> bool {
        self.route_exclusion
    }

    fn establish(&self, request: &InterfaceRequest) -> Option<Box<dyn TunInterface>> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.deny_establish {
            return None;
        }
        let descriptor = 100 + requests.len() as i32;
        Some(Box::new(RecordedInterface { descriptor }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_records_order() {
        let mut req = InterfaceRequest::new(8500);
        req.exclude_route("10.0.0.0/8");
        req.add_address("198.18.0.1", 32);
        req.add_route("0.0.0.0", 0);
        req.add_dns_server("8.8.8.8");

        assert!(req.non_blocking);
        assert_eq!(req.mtu, 8500);
        assert_eq!(
            req.ops()[0],
            InterfaceOp::ExcludeRoute("10.0.0.0/8".to_string())
        );
        assert_eq!(req.default_routes(), vec!["0.0.0.0"]);
        assert_eq!(req.dns_servers(), vec!["8.8.8.8"]);
    }

    #[test]
    fn test_recording_provisioner_establish() {
        let provisioner = RecordingProvisioner::new();
        let req = InterfaceRequest::new(8500);

        let tun = provisioner.establish(&req).unwrap();
        assert!(tun.descriptor() > 0);
        assert_eq!(provisioner.requests().len(), 1);
    }

    #[test]
    fn test_denying_provisioner_returns_none() {
        let provisioner = RecordingProvisioner::denying();
        assert!(provisioner.establish(&InterfaceRequest::new(1500)).is_none());
        // The attempt is still recorded.
        assert_eq!(provisioner.requests().len(), 1);
    }
}
