//! Preference store.
//!
//! Typed key→value settings with documented defaults, persisted as a JSON
//! document. This is the source of truth for every configuration decision;
//! components never read it directly at runtime; they take an immutable
//! [`PreferenceSnapshot`] at session start and work from that.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// Keys, kept stable for on-disk compatibility.
const SOCKS_ADDR: &str = "SocksAddr";
const SOCKS_PORT: &str = "SocksPort";
const SOCKS_USER: &str = "SocksUser";
const SOCKS_PASS: &str = "SocksPass";
const UDP_ADDR: &str = "UdpAddr";
const UDP_PORT: &str = "UdpPort";
const UDP_USER: &str = "UdpUser";
const UDP_PASS: &str = "UdpPass";
const UDP_IN_TCP: &str = "UdpInTcp";
const IPV4: &str = "Ipv4";
const IPV6: &str = "Ipv6";
const GLOBAL: &str = "Global";
const APPS: &str = "Apps";
const REMOTE_DNS: &str = "RemoteDNS";
const DNS_IPV4: &str = "DnsIpv4";
const DNS_IPV6: &str = "DnsIpv6";
const DNS_SPLIT_TUNNEL: &str = "DnsSplitTunnel";
const DNS_FOREIGN_SERVERS: &str = "DnsForeignServers";
const BYPASS_LAN: &str = "BypassLan";
const CHNROUTES_ENABLED: &str = "ChnroutesEnabled";
const ACL_ENABLED: &str = "AclEnabled";
const SMART_PROXY_ENABLED: &str = "SmartProxyEnabled";
const SMART_PROXY_PORTS: &str = "SmartProxyPorts";
const SMART_PROXY_TIMEOUT: &str = "SmartProxyTimeout";
const SMART_PROXY_BLOCK_EXPIRY: &str = "SmartProxyBlockExpiry";
const LOG_LEVEL: &str = "LogLevel";
const TCP_BUFFER_SIZE: &str = "TcpBufferSize";
const UDP_RECV_BUFFER_SIZE: &str = "UdpRecvBufferSize";
const UDP_COPY_BUFFER_NUMS: &str = "UdpCopyBufferNums";
const MAX_SESSION_COUNT: &str = "MaxSessionCount";
const CONNECT_TIMEOUT: &str = "ConnectTimeout";
const TCP_READ_WRITE_TIMEOUT: &str = "TcpReadWriteTimeout";
const UDP_READ_WRITE_TIMEOUT: &str = "UdpReadWriteTimeout";
const ENABLE: &str = "Enable";

/// Tunnel-side constants. These are not user preferences; the interface
/// addressing is owned by the control plane.
pub const TUNNEL_MTU: u32 = 8500;
pub const TUNNEL_IPV4_ADDRESS: &str = "198.18.0.1";
pub const TUNNEL_IPV4_PREFIX: u8 = 32;
pub const TUNNEL_IPV6_ADDRESS: &str = "fc00::1";
pub const TUNNEL_IPV6_PREFIX: u8 = 128;
pub const MAPPED_DNS_IPV4: &str = "198.18.0.2";
pub const MAPPED_DNS_IPV6: &str = "fc00::2";
pub const TASK_STACK_SIZE: u32 = 81920;

/// Preference store errors
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid integer value: {0:?}")]
    InvalidInteger(String),

    #[error("Port out of range: {0}")]
    PortOutOfRange(i64),
}

/// JSON-file-backed preference store with write-through setters.
pub struct Preferences {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Preferences {
    /// Load the store, starting empty (all defaults) when the file does not
    /// exist or fails to parse.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    warn!("Malformed preference file {}, using defaults", path.display());
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        Self { path, values }
    }

    fn persist(&self) -> Result<(), PrefsError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&Value::Object(self.values.clone()))
            .expect("preference map is always serializable");
        fs::write(&self.path, text)?;
        Ok(())
    }

    fn get_str(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    fn get_u32(&self, key: &str, default: u32) -> u32 {
        match self.values.get(key).and_then(Value::as_u64) {
            Some(n) => n.min(u32::MAX as u64) as u32,
            None => default,
        }
    }

    fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(key) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), PrefsError> {
        self.values.insert(key.to_string(), value);
        self.persist()
    }

    /// Parse a user-entered integer, rejecting invalid input so the caller
    /// keeps the prior value.
    fn parse_int(input: &str) -> Result<i64, PrefsError> {
        input
            .trim()
            .parse::<i64>()
            .map_err(|_| PrefsError::InvalidInteger(input.to_string()))
    }

    fn validate_port(port: i64) -> Result<u16, PrefsError> {
        // 0 means "derive from TCP".
        if (0..=65535).contains(&port) {
            Ok(port as u16)
        } else {
            Err(PrefsError::PortOutOfRange(port))
        }
    }

    // SOCKS5 TCP endpoint

    pub fn socks_address(&self) -> String {
        self.get_str(SOCKS_ADDR, "127.0.0.1")
    }

    pub fn set_socks_address(&mut self, addr: &str) -> Result<(), PrefsError> {
        self.set(SOCKS_ADDR, Value::from(addr))
    }

    pub fn socks_port(&self) -> u16 {
        self.get_u32(SOCKS_PORT, 1080) as u16
    }

    pub fn set_socks_port(&mut self, port: u16) -> Result<(), PrefsError> {
        self.set(SOCKS_PORT, Value::from(port))
    }

    /// User-entered port; rejects non-integer and out-of-range input.
    pub fn set_socks_port_str(&mut self, input: &str) -> Result<(), PrefsError> {
        let port = Self::validate_port(Self::parse_int(input)?)?;
        self.set_socks_port(port)
    }

    pub fn socks_username(&self) -> String {
        self.get_str(SOCKS_USER, "")
    }

    pub fn set_socks_username(&mut self, user: &str) -> Result<(), PrefsError> {
        self.set(SOCKS_USER, Value::from(user))
    }

    pub fn socks_password(&self) -> String {
        self.get_str(SOCKS_PASS, "")
    }

    pub fn set_socks_password(&mut self, pass: &str) -> Result<(), PrefsError> {
        self.set(SOCKS_PASS, Value::from(pass))
    }

    // SOCKS5 UDP endpoint (empty/zero means "derive from TCP")

    pub fn udp_address(&self) -> String {
        self.get_str(UDP_ADDR, "")
    }

    pub fn set_udp_address(&mut self, addr: &str) -> Result<(), PrefsError> {
        self.set(UDP_ADDR, Value::from(addr))
    }

    pub fn udp_port(&self) -> u16 {
        self.get_u32(UDP_PORT, 0) as u16
    }

    pub fn set_udp_port(&mut self, port: u16) -> Result<(), PrefsError> {
        self.set(UDP_PORT, Value::from(port))
    }

    pub fn set_udp_port_str(&mut self, input: &str) -> Result<(), PrefsError> {
        let port = Self::validate_port(Self::parse_int(input)?)?;
        self.set_udp_port(port)
    }

    pub fn udp_username(&self) -> String {
        self.get_str(UDP_USER, "")
    }

    pub fn set_udp_username(&mut self, user: &str) -> Result<(), PrefsError> {
        self.set(UDP_USER, Value::from(user))
    }

    pub fn udp_password(&self) -> String {
        self.get_str(UDP_PASS, "")
    }

    pub fn set_udp_password(&mut self, pass: &str) -> Result<(), PrefsError> {
        self.set(UDP_PASS, Value::from(pass))
    }

    pub fn udp_in_tcp(&self) -> bool {
        self.get_bool(UDP_IN_TCP, false)
    }

    pub fn set_udp_in_tcp(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(UDP_IN_TCP, Value::from(enable))
    }

    // Network families and app filtering

    pub fn ipv4(&self) -> bool {
        self.get_bool(IPV4, true)
    }

    pub fn set_ipv4(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(IPV4, Value::from(enable))
    }

    pub fn ipv6(&self) -> bool {
        self.get_bool(IPV6, true)
    }

    pub fn set_ipv6(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(IPV6, Value::from(enable))
    }

    /// Global mode: the app list is a deny-list. Per-app mode: an allow-list.
    pub fn global_mode(&self) -> bool {
        self.get_bool(GLOBAL, false)
    }

    pub fn set_global_mode(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(GLOBAL, Value::from(enable))
    }

    pub fn apps(&self) -> Vec<String> {
        self.get_string_list(APPS).unwrap_or_default()
    }

    pub fn set_apps(&mut self, apps: &[String]) -> Result<(), PrefsError> {
        self.set(APPS, Value::from(apps.to_vec()))
    }

    // DNS

    pub fn remote_dns(&self) -> bool {
        self.get_bool(REMOTE_DNS, true)
    }

    pub fn set_remote_dns(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(REMOTE_DNS, Value::from(enable))
    }

    pub fn dns_ipv4(&self) -> String {
        self.get_str(DNS_IPV4, "8.8.8.8")
    }

    pub fn set_dns_ipv4(&mut self, addr: &str) -> Result<(), PrefsError> {
        self.set(DNS_IPV4, Value::from(addr))
    }

    pub fn dns_ipv6(&self) -> String {
        self.get_str(DNS_IPV6, "2001:4860:4860::8888")
    }

    pub fn set_dns_ipv6(&mut self, addr: &str) -> Result<(), PrefsError> {
        self.set(DNS_IPV6, Value::from(addr))
    }

    pub fn dns_split_tunnel(&self) -> bool {
        self.get_bool(DNS_SPLIT_TUNNEL, true)
    }

    pub fn set_dns_split_tunnel(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(DNS_SPLIT_TUNNEL, Value::from(enable))
    }

    pub fn dns_foreign_servers(&self) -> Vec<String> {
        self.get_string_list(DNS_FOREIGN_SERVERS).unwrap_or_else(|| {
            vec![
                "1.1.1.1".to_string(),
                "8.8.8.8".to_string(),
                "2606:4700:4700::1111".to_string(),
                "2001:4860:4860::8888".to_string(),
            ]
        })
    }

    pub fn set_dns_foreign_servers(&mut self, servers: &[String]) -> Result<(), PrefsError> {
        self.set(DNS_FOREIGN_SERVERS, Value::from(servers.to_vec()))
    }

    // Feature toggles

    pub fn bypass_lan(&self) -> bool {
        self.get_bool(BYPASS_LAN, false)
    }

    pub fn set_bypass_lan(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(BYPASS_LAN, Value::from(enable))
    }

    pub fn chnroutes_enabled(&self) -> bool {
        self.get_bool(CHNROUTES_ENABLED, true)
    }

    pub fn set_chnroutes_enabled(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(CHNROUTES_ENABLED, Value::from(enable))
    }

    pub fn acl_enabled(&self) -> bool {
        self.get_bool(ACL_ENABLED, false)
    }

    pub fn set_acl_enabled(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(ACL_ENABLED, Value::from(enable))
    }

    pub fn smart_proxy_enabled(&self) -> bool {
        self.get_bool(SMART_PROXY_ENABLED, true)
    }

    pub fn set_smart_proxy_enabled(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(SMART_PROXY_ENABLED, Value::from(enable))
    }

    pub fn smart_proxy_ports(&self) -> Vec<u16> {
        match self.values.get(SMART_PROXY_PORTS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_u64)
                .filter(|p| (1..=65535).contains(p))
                .map(|p| p as u16)
                .collect(),
            _ => vec![80, 443],
        }
    }

    pub fn set_smart_proxy_ports(&mut self, ports: &[u16]) -> Result<(), PrefsError> {
        self.set(SMART_PROXY_PORTS, Value::from(ports.to_vec()))
    }

    /// Stored as a string; corrupt values fall back to a default during
    /// synthesis, not here.
    pub fn smart_proxy_timeout(&self) -> String {
        self.get_str(SMART_PROXY_TIMEOUT, "2000")
    }

    pub fn set_smart_proxy_timeout(&mut self, timeout: &str) -> Result<(), PrefsError> {
        self.set(SMART_PROXY_TIMEOUT, Value::from(timeout))
    }

    pub fn smart_proxy_block_expiry(&self) -> String {
        self.get_str(SMART_PROXY_BLOCK_EXPIRY, "360")
    }

    pub fn set_smart_proxy_block_expiry(&mut self, expiry: &str) -> Result<(), PrefsError> {
        self.set(SMART_PROXY_BLOCK_EXPIRY, Value::from(expiry))
    }

    // Runtime tunables

    pub fn log_level(&self) -> String {
        let default = if cfg!(debug_assertions) { "debug" } else { "info" };
        self.get_str(LOG_LEVEL, default)
    }

    pub fn set_log_level(&mut self, level: &str) -> Result<(), PrefsError> {
        self.set(LOG_LEVEL, Value::from(level))
    }

    pub fn tcp_buffer_size(&self) -> u32 {
        self.get_u32(TCP_BUFFER_SIZE, 65536)
    }

    pub fn set_tcp_buffer_size(&mut self, size: u32) -> Result<(), PrefsError> {
        self.set(TCP_BUFFER_SIZE, Value::from(size))
    }

    pub fn udp_recv_buffer_size(&self) -> u32 {
        self.get_u32(UDP_RECV_BUFFER_SIZE, 524288)
    }

    pub fn set_udp_recv_buffer_size(&mut self, size: u32) -> Result<(), PrefsError> {
        self.set(UDP_RECV_BUFFER_SIZE, Value::from(size))
    }

    pub fn udp_copy_buffer_nums(&self) -> u32 {
        self.get_u32(UDP_COPY_BUFFER_NUMS, 64)
    }

    pub fn set_udp_copy_buffer_nums(&mut self, nums: u32) -> Result<(), PrefsError> {
        self.set(UDP_COPY_BUFFER_NUMS, Value::from(nums))
    }

    /// 0 means unlimited (key omitted from the synthesized document).
    pub fn max_session_count(&self) -> u32 {
        self.get_u32(MAX_SESSION_COUNT, 0)
    }

    pub fn set_max_session_count(&mut self, count: u32) -> Result<(), PrefsError> {
        self.set(MAX_SESSION_COUNT, Value::from(count))
    }

    pub fn set_max_session_count_str(&mut self, input: &str) -> Result<(), PrefsError> {
        let count = Self::parse_int(input)?;
        if count < 0 {
            return Err(PrefsError::InvalidInteger(input.to_string()));
        }
        self.set_max_session_count(count as u32)
    }

    pub fn connect_timeout(&self) -> u32 {
        self.get_u32(CONNECT_TIMEOUT, 5000)
    }

    pub fn set_connect_timeout(&mut self, ms: u32) -> Result<(), PrefsError> {
        self.set(CONNECT_TIMEOUT, Value::from(ms))
    }

    pub fn set_connect_timeout_str(&mut self, input: &str) -> Result<(), PrefsError> {
        let ms = Self::parse_int(input)?;
        if ms < 0 {
            return Err(PrefsError::InvalidInteger(input.to_string()));
        }
        self.set_connect_timeout(ms as u32)
    }

    pub fn tcp_read_write_timeout(&self) -> u32 {
        self.get_u32(TCP_READ_WRITE_TIMEOUT, 60000)
    }

    pub fn set_tcp_read_write_timeout(&mut self, ms: u32) -> Result<(), PrefsError> {
        self.set(TCP_READ_WRITE_TIMEOUT, Value::from(ms))
    }

    pub fn udp_read_write_timeout(&self) -> u32 {
        self.get_u32(UDP_READ_WRITE_TIMEOUT, 60000)
    }

    pub fn set_udp_read_write_timeout(&mut self, ms: u32) -> Result<(), PrefsError> {
        self.set(UDP_READ_WRITE_TIMEOUT, Value::from(ms))
    }

    // Session flag

    /// True while a session is active; presentation layers use this to gate
    /// editability.
    pub fn enabled(&self) -> bool {
        self.get_bool(ENABLE, false)
    }

    pub fn set_enabled(&mut self, enable: bool) -> Result<(), PrefsError> {
        self.set(ENABLE, Value::from(enable))
    }

    /// Take an immutable snapshot of everything a session needs.
    ///
    /// If neither family is enabled, IPv4 is forced on: a tunnel with no
    /// address family cannot carry traffic.
    pub fn snapshot(&self) -> PreferenceSnapshot {
        let mut ipv4 = self.ipv4();
        let ipv6 = self.ipv6();
        if !ipv4 && !ipv6 {
            debug!("Neither address family enabled, forcing IPv4 on");
            ipv4 = true;
        }

        PreferenceSnapshot {
            socks_address: self.socks_address(),
            socks_port: self.socks_port(),
            socks_username: self.socks_username(),
            socks_password: self.socks_password(),
            udp_address: self.udp_address(),
            udp_port: self.udp_port(),
            udp_username: self.udp_username(),
            udp_password: self.udp_password(),
            udp_in_tcp: self.udp_in_tcp(),
            ipv4,
            ipv6,
            global_mode: self.global_mode(),
            apps: self.apps(),
            remote_dns: self.remote_dns(),
            dns_ipv4: self.dns_ipv4(),
            dns_ipv6: self.dns_ipv6(),
            dns_split_tunnel: self.dns_split_tunnel(),
            dns_foreign_servers: self.dns_foreign_servers(),
            bypass_lan: self.bypass_lan(),
            chnroutes_enabled: self.chnroutes_enabled(),
            acl_enabled: self.acl_enabled(),
            smart_proxy_enabled: self.smart_proxy_enabled(),
            smart_proxy_ports: self.smart_proxy_ports(),
            smart_proxy_timeout: self.smart_proxy_timeout(),
            smart_proxy_block_expiry: self.smart_proxy_block_expiry(),
            log_level: self.log_level(),
            tcp_buffer_size: self.tcp_buffer_size(),
            udp_recv_buffer_size: self.udp_recv_buffer_size(),
            udp_copy_buffer_nums: self.udp_copy_buffer_nums(),
            max_session_count: self.max_session_count(),
            connect_timeout: self.connect_timeout(),
            tcp_read_write_timeout: self.tcp_read_write_timeout(),
            udp_read_write_timeout: self.udp_read_write_timeout(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Immutable read of all settings needed for one session.
///
/// Mutation happens only through [`Preferences`] setters; the snapshot is a
/// plain value passed into synthesis and the start transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceSnapshot {
    pub socks_address: String,
    pub socks_port: u16,
    pub socks_username: String,
    pub socks_password: String,
    pub udp_address: String,
    pub udp_port: u16,
    pub udp_username: String,
    pub udp_password: String,
    pub udp_in_tcp: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub global_mode: bool,
    pub apps: Vec<String>,
    pub remote_dns: bool,
    pub dns_ipv4: String,
    pub dns_ipv6: String,
    pub dns_split_tunnel: bool,
    pub dns_foreign_servers: Vec<String>,
    pub bypass_lan: bool,
    pub chnroutes_enabled: bool,
    pub acl_enabled: bool,
    pub smart_proxy_enabled: bool,
    pub smart_proxy_ports: Vec<u16>,
    pub smart_proxy_timeout: String,
    pub smart_proxy_block_expiry: String,
    pub log_level: String,
    pub tcp_buffer_size: u32,
    pub udp_recv_buffer_size: u32,
    pub udp_copy_buffer_nums: u32,
    pub max_session_count: u32,
    pub connect_timeout: u32,
    pub tcp_read_write_timeout: u32,
    pub udp_read_write_timeout: u32,
}

impl Default for PreferenceSnapshot {
    /// The documented defaults, as an in-memory store would snapshot them.
    fn default() -> Self {
        Preferences::load(PathBuf::from("/nonexistent/prefs.json")).snapshot()
    }
}
