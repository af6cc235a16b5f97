//! Tunnel configuration synthesizer.
//!
//! Renders a [`PreferenceSnapshot`] into the YAML document the forwarding
//! engine consumes. Synthesis is a pure function of the snapshot plus the
//! log/cache locations; the only failure mode is writing the result to disk.
//!
//! Two strategies are supported:
//! - **Regeneration**: build the whole document from scratch each start
//!   ([`TunnelConfig::write_to`]).
//! - **Merge**: update only the keys this system owns inside a previously
//!   persisted document, preserving everything else
//!   ([`TunnelConfig::merge_write`]).
//!
//! Both produce structurally equivalent output for identical inputs.

use crate::layout::CacheLayout;
use crate::prefs::{self, PreferenceSnapshot};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Virtual interface name handed to the engine.
pub const TUN_NAME: &str = "tun0";

/// Fallback when the stored smart-proxy timeout fails to parse.
pub const SMART_PROXY_TIMEOUT_DEFAULT_MS: u32 = 2000;

/// Fallback when the stored smart-proxy block expiry fails to parse.
pub const SMART_PROXY_BLOCK_EXPIRY_DEFAULT_MIN: u32 = 360;

/// Mapped-DNS responder cache size.
const MAPDNS_CACHE_SIZE: u32 = 10000;

/// Synthesis errors. Missing preference values are never an error; every
/// field has a default.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("Failed to write configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse existing configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// `tunnel` section: interface name, MTU and addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelSection {
    pub name: String,
    pub mtu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

/// One SOCKS5 upstream endpoint. The authentication keys appear only when
/// both halves are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSection {
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// `socks5.udp`: endpoint plus the relay transport selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpEndpointSection {
    pub address: String,
    pub port: u16,
    #[serde(rename = "udp-relay")]
    pub udp_relay: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Socks5Section {
    pub tcp: EndpointSection,
    pub udp: UdpEndpointSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsSplitTunnelSection {
    #[serde(rename = "split-tunnel")]
    pub split_tunnel: bool,
    #[serde(rename = "foreign-dns")]
    pub foreign_dns: Vec<String>,
}

/// `dns-forwarder`: virtual/target pairs, one per IP family. A family is
/// emitted only when both halves are known; a single complete family is a
/// valid forwarder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsForwarderSection {
    #[serde(rename = "virtual-ip4", skip_serializing_if = "Option::is_none")]
    pub virtual_ip4: Option<String>,
    #[serde(rename = "target-ip4", skip_serializing_if = "Option::is_none")]
    pub target_ip4: Option<String>,
    #[serde(rename = "virtual-ip6", skip_serializing_if = "Option::is_none")]
    pub virtual_ip6: Option<String>,
    #[serde(rename = "target-ip6", skip_serializing_if = "Option::is_none")]
    pub target_ip6: Option<String>,
}

impl DnsForwarderSection {
    pub fn is_empty(&self) -> bool {
        self.virtual_ip4.is_none() && self.virtual_ip6.is_none()
    }
}

/// `mapdns`: the locally terminated DNS responder the engine runs when
/// remote DNS is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDnsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address6: Option<String>,
    #[serde(rename = "cache-size")]
    pub cache_size: u32,
}

/// `chnroutes` / `acl`: a file reference, present only while enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListSection {
    #[serde(rename = "file-path")]
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartProxySection {
    pub ports: Vec<u16>,
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u32,
    #[serde(rename = "blocked-ip-expiry-minutes")]
    pub blocked_ip_expiry_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiscSection {
    #[serde(rename = "task-stack-size")]
    pub task_stack_size: u32,
    #[serde(rename = "tcp-buffer-size")]
    pub tcp_buffer_size: u32,
    #[serde(rename = "udp-recv-buffer-size")]
    pub udp_recv_buffer_size: u32,
    #[serde(rename = "udp-copy-buffer-nums")]
    pub udp_copy_buffer_nums: u32,
    #[serde(rename = "max-session-count", skip_serializing_if = "Option::is_none")]
    pub max_session_count: Option<u32>,
    #[serde(rename = "connect-timeout")]
    pub connect_timeout: u32,
    #[serde(rename = "tcp-read-write-timeout")]
    pub tcp_read_write_timeout: u32,
    #[serde(rename = "udp-read-write-timeout")]
    pub udp_read_write_timeout: u32,
    #[serde(rename = "log-file")]
    pub log_file: String,
    #[serde(rename = "log-level")]
    pub log_level: String,
}

/// The synthesized, engine-facing configuration document.
///
/// Created fresh on every session start and never mutated after being handed
/// to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub tunnel: TunnelSection,
    pub socks5: Socks5Section,
    #[serde(rename = "dns-split-tunnel")]
    pub dns_split_tunnel: DnsSplitTunnelSection,
    #[serde(rename = "dns-forwarder", skip_serializing_if = "Option::is_none")]
    pub dns_forwarder: Option<DnsForwarderSection>,
    pub mapdns: MapDnsSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chnroutes: Option<FileListSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<FileListSection>,
    #[serde(rename = "smart-proxy", skip_serializing_if = "Option::is_none")]
    pub smart_proxy: Option<SmartProxySection>,
    pub misc: MiscSection,
}

/// Parse a stored numeric feature parameter, falling back to the documented
/// default when corrupt. This is a recoverable condition, not a failure.
fn parse_or_default(stored: &str, default: u32, what: &str) -> u32 {
    match stored.trim().parse::<u32>() {
        Ok(n) => n,
        Err(_) => {
            warn!("Unparseable {} {:?}, using default {}", what, stored, default);
            default
        }
    }
}

/// Synthesize the engine configuration from a preference snapshot.
///
/// Pure and deterministic: identical inputs yield structurally identical
/// documents.
pub fn synthesize(
    snapshot: &PreferenceSnapshot,
    log_file: &Path,
    layout: &CacheLayout,
) -> TunnelConfig {
    // UDP endpoint falls back to TCP when unset.
    let udp_address = if snapshot.udp_address.is_empty() {
        snapshot.socks_address.clone()
    } else {
        snapshot.udp_address.clone()
    };
    let udp_port = if snapshot.udp_port == 0 {
        snapshot.socks_port
    } else {
        snapshot.udp_port
    };

    // UDP credentials fall back to TCP only when both halves are empty. A
    // partial UDP credential is used as given, which suppresses the auth
    // block below.
    let (udp_user, udp_pass) = if snapshot.udp_username.is_empty() && snapshot.udp_password.is_empty()
    {
        (snapshot.socks_username.clone(), snapshot.socks_password.clone())
    } else {
        (snapshot.udp_username.clone(), snapshot.udp_password.clone())
    };

    let forwarder = dns_forwarder(snapshot);

    TunnelConfig {
        tunnel: TunnelSection {
            name: TUN_NAME.to_string(),
            mtu: prefs::TUNNEL_MTU,
            ipv4: snapshot
                .ipv4
                .then(|| format!("{}/{}", prefs::TUNNEL_IPV4_ADDRESS, prefs::TUNNEL_IPV4_PREFIX)),
            ipv6: snapshot
                .ipv6
                .then(|| format!("{}/{}", prefs::TUNNEL_IPV6_ADDRESS, prefs::TUNNEL_IPV6_PREFIX)),
        },
        socks5: Socks5Section {
            tcp: EndpointSection {
                address: snapshot.socks_address.clone(),
                port: snapshot.socks_port,
                username: auth_field(&snapshot.socks_username, &snapshot.socks_password)
                    .map(|(u, _)| u),
                password: auth_field(&snapshot.socks_username, &snapshot.socks_password)
                    .map(|(_, p)| p),
            },
            udp: UdpEndpointSection {
                address: udp_address,
                port: udp_port,
                udp_relay: if snapshot.udp_in_tcp { "tcp" } else { "udp" }.to_string(),
                username: auth_field(&udp_user, &udp_pass).map(|(u, _)| u),
                password: auth_field(&udp_user, &udp_pass).map(|(_, p)| p),
            },
        },
        dns_split_tunnel: DnsSplitTunnelSection {
            split_tunnel: snapshot.dns_split_tunnel,
            foreign_dns: snapshot
                .dns_foreign_servers
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
        },
        dns_forwarder: (!forwarder.is_empty()).then_some(forwarder),
        mapdns: MapDnsSection {
            address: snapshot.ipv4.then(|| prefs::MAPPED_DNS_IPV4.to_string()),
            address6: snapshot.ipv6.then(|| prefs::MAPPED_DNS_IPV6.to_string()),
            cache_size: MAPDNS_CACHE_SIZE,
        },
        chnroutes: snapshot.chnroutes_enabled.then(|| FileListSection {
            file_path: layout.chnroutes_file().display().to_string(),
        }),
        acl: snapshot.acl_enabled.then(|| FileListSection {
            file_path: layout.acl_file().display().to_string(),
        }),
        smart_proxy: snapshot.smart_proxy_enabled.then(|| SmartProxySection {
            ports: snapshot.smart_proxy_ports.clone(),
            timeout_ms: parse_or_default(
                &snapshot.smart_proxy_timeout,
                SMART_PROXY_TIMEOUT_DEFAULT_MS,
                "smart-proxy timeout",
            ),
            blocked_ip_expiry_minutes: parse_or_default(
                &snapshot.smart_proxy_block_expiry,
                SMART_PROXY_BLOCK_EXPIRY_DEFAULT_MIN,
                "smart-proxy block expiry",
            ),
        }),
        misc: MiscSection {
            task_stack_size: prefs::TASK_STACK_SIZE,
            tcp_buffer_size: snapshot.tcp_buffer_size,
            udp_recv_buffer_size: snapshot.udp_recv_buffer_size,
            udp_copy_buffer_nums: snapshot.udp_copy_buffer_nums,
            max_session_count: (snapshot.max_session_count > 0)
                .then_some(snapshot.max_session_count),
            connect_timeout: snapshot.connect_timeout,
            tcp_read_write_timeout: snapshot.tcp_read_write_timeout,
            udp_read_write_timeout: snapshot.udp_read_write_timeout,
            log_file: log_file.display().to_string(),
            log_level: snapshot.log_level.clone(),
        },
    }
}

/// The auth block is emitted only when both username and password are
/// non-empty.
fn auth_field(username: &str, password: &str) -> Option<(String, String)> {
    (!username.is_empty() && !password.is_empty())
        .then(|| (username.to_string(), password.to_string()))
}

/// A family's forwarder pair needs both the virtual responder address and a
/// configured target resolver.
fn dns_forwarder(snapshot: &PreferenceSnapshot) -> DnsForwarderSection {
    let mut section = DnsForwarderSection::default();
    if snapshot.ipv4 && !snapshot.dns_ipv4.is_empty() {
        section.virtual_ip4 = Some(prefs::MAPPED_DNS_IPV4.to_string());
        section.target_ip4 = Some(format!("{}:53", snapshot.dns_ipv4));
    }
    if snapshot.ipv6 && !snapshot.dns_ipv6.is_empty() {
        section.virtual_ip6 = Some(prefs::MAPPED_DNS_IPV6.to_string());
        section.target_ip6 = Some(format!("[{}]:53", snapshot.dns_ipv6));
    }
    section
}

// Keys this system owns inside each section. Merge replaces exactly these,
// so foreign keys in a hand-edited document survive.
const TUNNEL_KEYS: &[&str] = &["name", "mtu", "ipv4", "ipv6"];
const ENDPOINT_KEYS: &[&str] = &["address", "port", "username", "password"];
const UDP_ENDPOINT_KEYS: &[&str] = &["address", "port", "udp-relay", "username", "password"];
const SPLIT_TUNNEL_KEYS: &[&str] = &["split-tunnel", "foreign-dns"];
const FORWARDER_KEYS: &[&str] = &["virtual-ip4", "target-ip4", "virtual-ip6", "target-ip6"];
const MAPDNS_KEYS: &[&str] = &["address", "address6", "cache-size"];
const FILE_LIST_KEYS: &[&str] = &["file-path"];
const SMART_PROXY_KEYS: &[&str] = &["ports", "timeout-ms", "blocked-ip-expiry-minutes"];
const MISC_KEYS: &[&str] = &[
    "task-stack-size",
    "tcp-buffer-size",
    "udp-recv-buffer-size",
    "udp-copy-buffer-nums",
    "max-session-count",
    "connect-timeout",
    "tcp-read-write-timeout",
    "udp-read-write-timeout",
    "log-file",
    "log-level",
];

impl TunnelConfig {
    /// Render the document as YAML.
    pub fn render(&self) -> String {
        serde_yaml::to_string(self).expect("configuration is always serializable")
    }

    /// Full regeneration: overwrite `path` with a freshly rendered document.
    pub fn write_to(&self, path: &Path) -> Result<(), SynthError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }

    /// Partial merge: load the document at `path` (or start empty), update
    /// the keys this system owns, and write it back. Keys outside this
    /// system's ownership are preserved; disabled optional sections are
    /// removed.
    pub fn merge_write(&self, path: &Path) -> Result<(), SynthError> {
        let mut doc = match fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str(&text)?,
            Err(_) => Value::Mapping(Mapping::new()),
        };
        self.merge_into(&mut doc);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, serde_yaml::to_string(&doc).expect("mapping is serializable"))?;
        Ok(())
    }

    /// Apply this configuration to an existing document in place.
    pub fn merge_into(&self, doc: &mut Value) {
        if !doc.is_mapping() {
            *doc = Value::Mapping(Mapping::new());
        }
        let ours = serde_yaml::to_value(self).expect("configuration is always serializable");
        let ours = ours.as_mapping().expect("configuration serializes to a mapping");
        let root = doc.as_mapping_mut().expect("document is a mapping");

        merge_section(root, "tunnel", ours.get("tunnel"), TUNNEL_KEYS);

        // socks5 nests one level deeper.
        let ours_socks5 = ours.get("socks5").and_then(Value::as_mapping);
        let socks5 = child_mapping(root, "socks5");
        merge_section(socks5, "tcp", ours_socks5.and_then(|m| m.get("tcp")), ENDPOINT_KEYS);
        merge_section(
            socks5,
            "udp",
            ours_socks5.and_then(|m| m.get("udp")),
            UDP_ENDPOINT_KEYS,
        );

        merge_section(
            root,
            "dns-split-tunnel",
            ours.get("dns-split-tunnel"),
            SPLIT_TUNNEL_KEYS,
        );
        merge_section(root, "dns-forwarder", ours.get("dns-forwarder"), FORWARDER_KEYS);
        merge_section(root, "mapdns", ours.get("mapdns"), MAPDNS_KEYS);
        merge_section(root, "chnroutes", ours.get("chnroutes"), FILE_LIST_KEYS);
        merge_section(root, "acl", ours.get("acl"), FILE_LIST_KEYS);
        merge_section(root, "smart-proxy", ours.get("smart-proxy"), SMART_PROXY_KEYS);
        merge_section(root, "misc", ours.get("misc"), MISC_KEYS);
    }
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Get or create `parent[name]` as a mapping.
fn child_mapping<'a>(parent: &'a mut Mapping, name: &str) -> &'a mut Mapping {
    let k = key(name);
    if !matches!(parent.get(&k), Some(Value::Mapping(_))) {
        parent.insert(k.clone(), Value::Mapping(Mapping::new()));
    }
    parent
        .get_mut(&k)
        .and_then(Value::as_mapping_mut)
        .expect("just inserted a mapping")
}

/// Replace the owned keys of `parent[name]` with ours. `ours == None` means
/// the section is disabled and is removed wholesale.
fn merge_section(parent: &mut Mapping, name: &str, ours: Option<&Value>, owned: &[&str]) {
    let Some(ours) = ours else {
        parent.remove(&key(name));
        return;
    };
    let target = child_mapping(parent, name);
    for k in owned {
        target.remove(&key(k));
    }
    if let Some(src) = ours.as_mapping() {
        for (k, v) in src {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::PreferenceSnapshot;

    fn layout() -> CacheLayout {
        CacheLayout::new("/cache")
    }

    fn synth(snapshot: &PreferenceSnapshot) -> TunnelConfig {
        synthesize(snapshot, Path::new("/cache/tunnel.log"), &layout())
    }

    #[test]
    fn test_udp_endpoint_falls_back_to_tcp() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.socks_address = "198.51.100.1".to_string();
        snapshot.socks_port = 1080;

        let config = synth(&snapshot);
        assert_eq!(config.socks5.udp.address, "198.51.100.1");
        assert_eq!(config.socks5.udp.port, 1080);

        snapshot.udp_address = "203.0.113.5".to_string();
        snapshot.udp_port = 1081;
        let config = synth(&snapshot);
        assert_eq!(config.socks5.udp.address, "203.0.113.5");
        assert_eq!(config.socks5.udp.port, 1081);
    }

    #[test]
    fn test_udp_credentials_fall_back_only_when_both_empty() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.socks_username = "user".to_string();
        snapshot.socks_password = "pass".to_string();

        let config = synth(&snapshot);
        assert_eq!(config.socks5.udp.username.as_deref(), Some("user"));
        assert_eq!(config.socks5.udp.password.as_deref(), Some("pass"));

        // A UDP username with no password is taken as given, which
        // suppresses the auth block entirely.
        snapshot.udp_username = "udp-user".to_string();
        let config = synth(&snapshot);
        assert_eq!(config.socks5.udp.username, None);
        assert_eq!(config.socks5.udp.password, None);
    }

    #[test]
    fn test_auth_block_iff_both_credentials() {
        let mut snapshot = PreferenceSnapshot::default();
        let config = synth(&snapshot);
        assert_eq!(config.socks5.tcp.username, None);

        snapshot.socks_username = "user".to_string();
        let config = synth(&snapshot);
        assert_eq!(config.socks5.tcp.username, None);
        assert_eq!(config.socks5.tcp.password, None);

        snapshot.socks_password = "pass".to_string();
        let config = synth(&snapshot);
        assert_eq!(config.socks5.tcp.username.as_deref(), Some("user"));
        assert_eq!(config.socks5.tcp.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_foreign_dns_filters_empties_preserves_order() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.dns_foreign_servers = vec![
            "1.1.1.1".to_string(),
            String::new(),
            "9.9.9.9".to_string(),
            "8.8.8.8".to_string(),
        ];
        let config = synth(&snapshot);
        assert_eq!(
            config.dns_split_tunnel.foreign_dns,
            vec!["1.1.1.1", "9.9.9.9", "8.8.8.8"]
        );
    }

    #[test]
    fn test_forwarder_single_family_is_valid() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.ipv6 = false;
        let config = synth(&snapshot);
        let fwd = config.dns_forwarder.unwrap();
        assert_eq!(fwd.virtual_ip4.as_deref(), Some("198.18.0.2"));
        assert_eq!(fwd.target_ip4.as_deref(), Some("8.8.8.8:53"));
        assert_eq!(fwd.virtual_ip6, None);
        assert_eq!(fwd.target_ip6, None);
    }

    #[test]
    fn test_forwarder_requires_both_halves() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.dns_ipv4 = String::new();
        let config = synth(&snapshot);
        let fwd = config.dns_forwarder.unwrap();
        assert_eq!(fwd.virtual_ip4, None);
        assert!(fwd.virtual_ip6.is_some());

        snapshot.dns_ipv6 = String::new();
        let config = synth(&snapshot);
        assert!(config.dns_forwarder.is_none());
    }

    #[test]
    fn test_optional_sections_follow_enable_flags() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.chnroutes_enabled = true;
        snapshot.acl_enabled = false;
        snapshot.smart_proxy_enabled = false;

        let config = synth(&snapshot);
        assert_eq!(
            config.chnroutes.unwrap().file_path,
            "/cache/chnroutes.txt"
        );
        assert!(config.acl.is_none());
        assert!(config.smart_proxy.is_none());

        let rendered = synth(&snapshot).render();
        assert!(!rendered.contains("acl"));
        assert!(!rendered.contains("smart-proxy"));
    }

    #[test]
    fn test_smart_proxy_corrupt_values_use_defaults() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.smart_proxy_enabled = true;
        snapshot.smart_proxy_timeout = "abc".to_string();
        snapshot.smart_proxy_block_expiry = "12x".to_string();

        let config = synth(&snapshot);
        let sp = config.smart_proxy.unwrap();
        assert_eq!(sp.timeout_ms, 2000);
        assert_eq!(sp.blocked_ip_expiry_minutes, 360);
        assert_eq!(sp.ports, vec![80, 443]);
    }

    #[test]
    fn test_max_session_count_omitted_when_zero() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.max_session_count = 0;
        let config = synth(&snapshot);
        assert_eq!(config.misc.max_session_count, None);
        assert!(!config.render().contains("max-session-count"));

        snapshot.max_session_count = 500;
        let config = synth(&snapshot);
        assert_eq!(config.misc.max_session_count, Some(500));
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.socks_username = "user".to_string();
        snapshot.socks_password = "pass".to_string();
        snapshot.udp_in_tcp = true;

        let a = synth(&snapshot);
        let b = synth(&snapshot);
        assert_eq!(a, b);
        assert_eq!(a.render(), b.render());
    }

    #[test]
    fn test_regeneration_and_merge_are_equivalent() {
        let snapshot = PreferenceSnapshot::default();
        let config = synth(&snapshot);

        let regenerated: Value = serde_yaml::from_str(&config.render()).unwrap();

        let mut merged = Value::Mapping(Mapping::new());
        config.merge_into(&mut merged);

        assert_eq!(regenerated, merged);
    }

    #[test]
    fn test_merge_preserves_foreign_keys() {
        let snapshot = PreferenceSnapshot::default();
        let config = synth(&snapshot);

        let mut doc: Value = serde_yaml::from_str(
            "socks5:\n  tcp:\n    address: 'stale'\n    mark: 7\nextra-section:\n  keep: true\n",
        )
        .unwrap();
        config.merge_into(&mut doc);

        let root = doc.as_mapping().unwrap();
        assert!(root.contains_key(Value::String("extra-section".into())));

        let tcp = root
            .get(Value::String("socks5".into()))
            .and_then(|v| v.get("tcp"))
            .unwrap();
        // Owned key updated, foreign key kept.
        assert_eq!(tcp.get("address").unwrap().as_str(), Some("127.0.0.1"));
        assert_eq!(tcp.get("mark").unwrap().as_u64(), Some(7));
    }

    #[test]
    fn test_merge_removes_disabled_sections_and_stale_auth() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.acl_enabled = false;
        snapshot.smart_proxy_enabled = false;
        let config = synth(&snapshot);

        let mut doc: Value = serde_yaml::from_str(
            "acl:\n  file-path: '/old/acl.txt'\nsmart-proxy:\n  timeout-ms: 99\nsocks5:\n  tcp:\n    username: 'stale'\n    password: 'stale'\n",
        )
        .unwrap();
        config.merge_into(&mut doc);

        let root = doc.as_mapping().unwrap();
        assert!(!root.contains_key(Value::String("acl".into())));
        assert!(!root.contains_key(Value::String("smart-proxy".into())));

        // No credentials in the snapshot, so the stale auth block is gone.
        let tcp = root
            .get(Value::String("socks5".into()))
            .and_then(|v| v.get("tcp"))
            .unwrap();
        assert!(tcp.get("username").is_none());
        assert!(tcp.get("password").is_none());
    }

    #[test]
    fn test_end_to_end_ipv4_global_scenario() {
        let mut snapshot = PreferenceSnapshot::default();
        snapshot.ipv4 = true;
        snapshot.ipv6 = false;
        snapshot.global_mode = true;
        snapshot.apps = vec!["com.example.a".to_string()];
        snapshot.socks_address = "198.51.100.1".to_string();
        snapshot.socks_port = 1080;
        snapshot.socks_username = "user".to_string();
        snapshot.socks_password = "pass".to_string();
        snapshot.remote_dns = true;

        let config = synth(&snapshot);
        assert_eq!(config.socks5.udp.address, "198.51.100.1");
        assert_eq!(config.socks5.udp.port, 1080);
        assert_eq!(config.socks5.udp.username.as_deref(), Some("user"));
        assert_eq!(config.socks5.udp.password.as_deref(), Some("pass"));

        assert!(config.tunnel.ipv4.is_some());
        assert!(config.tunnel.ipv6.is_none());
        assert_eq!(config.mapdns.address.as_deref(), Some("198.18.0.2"));
        assert_eq!(config.mapdns.address6, None);
    }

    #[test]
    fn test_write_and_merge_write_round_trip() {
        let dir = std::env::temp_dir().join(format!("tunctl-synth-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("tproxy.yml");

        let snapshot = PreferenceSnapshot::default();
        let config = synth(&snapshot);

        config.write_to(&path).unwrap();
        let first: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        config.merge_write(&path).unwrap();
        let second: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(first, second);
        let _ = fs::remove_dir_all(&dir);
    }
}
