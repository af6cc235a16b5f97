//! iproute2-backed interface provisioning for plain Linux hosts.

use std::process::Command;
use tracing::{debug, info, warn};
use tunctl_core::{InterfaceOp, InterfaceRequest, TunInterface, TunProvisioner};

/// Routing table holding the tunnel default and its exclusions. A `throw`
/// route there terminates the lookup and falls through to the main table,
/// which is what makes LAN bypass work.
const ROUTE_TABLE: &str = "118";
const RULE_PREF: &str = "100";

/// Provisions a tun device with `ip` commands. The engine opens the device
/// by name, so no descriptor crosses this boundary.
///
/// Per-app filtering has no iproute2 counterpart; allow/deny entries are
/// logged and skipped. DNS registration is likewise left to the host
/// resolver configuration.
pub struct IprouteProvisioner {
    device: String,
}

impl IprouteProvisioner {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }

    fn ip(args: &[&str]) -> Result<(), String> {
        debug!("ip {}", args.join(" "));
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| format!("failed to run ip: {e}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    fn family(address: &str) -> &'static str {
        if address.contains(':') { "-6" } else { "-4" }
    }

    fn teardown(device: &str) {
        for family in ["-4", "-6"] {
            let _ = Self::ip(&[family, "rule", "del", "pref", RULE_PREF, "table", ROUTE_TABLE]);
            let _ = Self::ip(&[family, "route", "flush", "table", ROUTE_TABLE]);
        }
        let _ = Self::ip(&["tuntap", "del", "dev", device, "mode", "tun"]);
    }
}

impl TunProvisioner for IprouteProvisioner {
    fn supports_route_exclusion(&self) -> bool {
        true
    }

    fn establish(&self, request: &InterfaceRequest) -> Option<Box<dyn TunInterface>> {
        let dev = self.device.as_str();
        // A leftover device from an unclean shutdown is replaced.
        Self::teardown(dev);
        if let Err(e) = Self::ip(&["tuntap", "add", "dev", dev, "mode", "tun"]) {
            warn!("Cannot create {dev}: {e}");
            return None;
        }

        let mtu = request.mtu.to_string();
        let mut steps: Vec<Result<(), String>> = vec![Self::ip(&[
            "link", "set", "dev", dev, "mtu", &mtu, "up",
        ])];

        for op in request.ops() {
            steps.push(match op {
                InterfaceOp::ExcludeRoute(prefix) => Self::ip(&[
                    Self::family(prefix),
                    "route",
                    "add",
                    "throw",
                    prefix,
                    "table",
                    ROUTE_TABLE,
                ]),
                InterfaceOp::AddAddress { address, prefix } => Self::ip(&[
                    Self::family(address),
                    "addr",
                    "add",
                    &format!("{address}/{prefix}"),
                    "dev",
                    dev,
                ]),
                InterfaceOp::AddRoute { address, prefix } => {
                    let family = Self::family(address);
                    Self::ip(&[
                        family,
                        "route",
                        "add",
                        &format!("{address}/{prefix}"),
                        "dev",
                        dev,
                        "table",
                        ROUTE_TABLE,
                    ])
                    .and_then(|_| {
                        // The rule is added only once the table has content.
                        Self::ip(&[
                            family,
                            "rule",
                            "add",
                            "pref",
                            RULE_PREF,
                            "table",
                            ROUTE_TABLE,
                        ])
                    })
                }
                InterfaceOp::AddDnsServer(address) => {
                    info!("DNS server {address} (configure the host resolver manually)");
                    Ok(())
                }
                InterfaceOp::AllowApp(id) | InterfaceOp::DenyApp(id) => {
                    debug!("Per-app filtering unavailable on this platform, skipping {id:?}");
                    Ok(())
                }
            });
        }

        for step in steps {
            if let Err(e) = step {
                warn!("Interface setup failed: {e}");
                Self::teardown(dev);
                return None;
            }
        }

        info!("Interface {dev} up");
        Some(Box::new(IprouteInterface {
            device: self.device.clone(),
        }))
    }
}

struct IprouteInterface {
    device: String,
}

impl TunInterface for IprouteInterface {
    fn descriptor(&self) -> i32 {
        // The engine opens the device by name from its configuration.
        -1
    }
}

impl Drop for IprouteInterface {
    fn drop(&mut self) {
        info!("Releasing interface {}", self.device);
        IprouteProvisioner::teardown(&self.device);
    }
}
