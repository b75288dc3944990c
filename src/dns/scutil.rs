//! Resolver configuration as reported by `scutil --dns`.
//!
//! The output is a sequence of `resolver #N` blocks, each followed by
//! indented `key : value` lines:
//!
//! ```text
//! resolver #1
//!   search domain[0] : corp.example.com
//!   nameserver[0] : 10.0.0.1
//!   nameserver[1] : fe80::1%en0
//!   if_index : 6 (en0)
//!   flags    : Request A records, Request AAAA records
//!   reach    : 0x00020002 (Reachable,Directly Reachable Address)
//! ```
//!
//! Parsing is deliberately lenient: unknown keys and malformed values are
//! skipped, never reported. The only failure is not getting the text at all.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::time::Duration;
use tokio::process::Command;

/// Standard DNS port, used when a resolver does not specify one.
pub const DEFAULT_PORT: u16 = 53;

const RESOLVER_MARKER: &str = "resolver #";
const MDNS_OPTION: &str = "mdns";

/// Flags attached to a resolver group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolverFlag {
    Scoped,
    RequestARecords,
    RequestAaaaRecords,
    ServiceSpecific,
    Supplemental,
    Other(String),
}

impl From<&str> for ResolverFlag {
    fn from(token: &str) -> Self {
        match token {
            "Scoped" => ResolverFlag::Scoped,
            "Request A records" => ResolverFlag::RequestARecords,
            "Request AAAA records" => ResolverFlag::RequestAaaaRecords,
            "Service-specific" => ResolverFlag::ServiceSpecific,
            "Supplemental" => ResolverFlag::Supplemental,
            other => ResolverFlag::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ResolverFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolverFlag::Scoped => "Scoped",
            ResolverFlag::RequestARecords => "Request A records",
            ResolverFlag::RequestAaaaRecords => "Request AAAA records",
            ResolverFlag::ServiceSpecific => "Service-specific",
            ResolverFlag::Supplemental => "Supplemental",
            ResolverFlag::Other(token) => token,
        })
    }
}

/// Reachability of the network a resolver group sits on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReachFlag {
    Reachable,
    NotReachable,
    TransientConnection,
    ConnectionRequired,
    AutomaticConnection,
    InterventionRequired,
    LocalAddress,
    DirectlyReachable,
    Wwan,
    Other(String),
}

impl From<&str> for ReachFlag {
    fn from(token: &str) -> Self {
        match token {
            "Reachable" => ReachFlag::Reachable,
            "Not Reachable" => ReachFlag::NotReachable,
            "Transient Connection" => ReachFlag::TransientConnection,
            "Connection Required" => ReachFlag::ConnectionRequired,
            "Automatic Connection" => ReachFlag::AutomaticConnection,
            "Intervention Required" => ReachFlag::InterventionRequired,
            "Local Address" => ReachFlag::LocalAddress,
            "Directly Reachable Address" => ReachFlag::DirectlyReachable,
            "WWAN" => ReachFlag::Wwan,
            other => ReachFlag::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ReachFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReachFlag::Reachable => "Reachable",
            ReachFlag::NotReachable => "Not Reachable",
            ReachFlag::TransientConnection => "Transient Connection",
            ReachFlag::ConnectionRequired => "Connection Required",
            ReachFlag::AutomaticConnection => "Automatic Connection",
            ReachFlag::InterventionRequired => "Intervention Required",
            ReachFlag::LocalAddress => "Local Address",
            ReachFlag::DirectlyReachable => "Directly Reachable Address",
            ReachFlag::Wwan => "WWAN",
            ReachFlag::Other(token) => token,
        })
    }
}

/// One resolver group.
///
/// Fields hold exactly what the text said; anything absent stays `None`,
/// empty, or `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolver {
    /// Domain suffix this resolver is scoped to.
    pub domain: Option<String>,
    /// Nameserver addresses, verbatim (IPv6 zone suffixes included).
    pub nameservers: Vec<String>,
    pub search_domains: Vec<String>,
    pub flags: Vec<ResolverFlag>,
    pub interface_index: Option<u32>,
    pub interface_name: Option<String>,
    pub multicast_dns: bool,
    /// Priority the OS assigns the resolver; informational.
    pub order: Option<u32>,
    pub reach: Vec<ReachFlag>,
    /// Query timeout the OS uses; informational.
    pub timeout: Option<Duration>,
    pub port: Option<u16>,
}

impl Resolver {
    /// True iff the reach flags contain `Reachable`.
    pub fn reachable(&self) -> bool {
        self.reach.contains(&ReachFlag::Reachable)
    }

    /// Nameserver port, [`DEFAULT_PORT`] when unset.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Socket address for one of this resolver's nameservers.
    ///
    /// An IPv6 zone (`fe80::1%en0`) is mapped to a scope id: numeric zones
    /// directly, interface names through this resolver's `if_index`.
    /// Returns `None` if `nameserver` is not an IP literal.
    pub fn socket_addr(&self, nameserver: &str) -> Option<SocketAddr> {
        let (host, zone) = match nameserver.split_once('%') {
            Some((host, zone)) => (host, Some(zone)),
            None => (nameserver, None),
        };
        match host.parse::<IpAddr>().ok()? {
            IpAddr::V4(ip) => Some(SocketAddr::from((ip, self.port()))),
            IpAddr::V6(ip) => {
                let scope_id = zone.map_or(0, |zone| self.scope_id(zone));
                Some(SocketAddr::V6(SocketAddrV6::new(ip, self.port(), 0, scope_id)))
            }
        }
    }

    fn scope_id(&self, zone: &str) -> u32 {
        if let Ok(id) = zone.parse() {
            return id;
        }
        match (&self.interface_name, self.interface_index) {
            (Some(name), Some(index)) if name == zone => index,
            _ => 0,
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            k if k.starts_with("search domain") => self.search_domains.push(value.to_string()),
            k if k.starts_with("nameserver") => self.nameservers.push(value.to_string()),
            "domain" => self.domain = Some(value.to_string()),
            "flags" => self.flags = tokens(value).map(ResolverFlag::from).collect(),
            "if_index" => self.set_interface(value),
            "options" => {
                self.multicast_dns = value
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .any(|option| option == MDNS_OPTION);
            }
            "order" => {
                if let Ok(order) = value.parse() {
                    self.order = Some(order);
                }
            }
            "reach" => self.set_reach(value),
            "timeout" => {
                if let Ok(secs) = value.parse() {
                    self.timeout = Some(Duration::from_secs(secs));
                }
            }
            "port" => {
                if let Ok(port) = value.parse() {
                    self.port = Some(port);
                }
            }
            _ => {}
        }
    }

    /// `6 (en0)`
    fn set_interface(&mut self, value: &str) {
        let (index, name) = match value.split_once('(') {
            Some((index, rest)) => (index, rest.split(')').next()),
            None => (value, None),
        };
        if let Ok(index) = index.trim().parse() {
            self.interface_index = Some(index);
        }
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            self.interface_name = Some(name.to_string());
        }
    }

    /// `0x00020002 (Reachable,Directly Reachable Address)`
    fn set_reach(&mut self, value: &str) {
        let Some((_, rest)) = value.split_once('(') else {
            return;
        };
        let list = rest.split(')').next().unwrap_or_default();
        self.reach = tokens(list).map(ReachFlag::from).collect();
    }
}

fn tokens(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|token| !token.is_empty())
}

/// `key : value`, both sides trimmed. Lines without a colon are all key.
fn split_line(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((key, value)) => (key.trim(), value.trim()),
        None => (line.trim(), ""),
    }
}

/// All resolver groups, in the order the OS listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub resolvers: Vec<Resolver>,
}

impl ResolverConfig {
    /// Parse `scutil --dns` output. Never fails.
    pub fn parse(text: &str) -> Self {
        let mut resolvers: Vec<Resolver> = Vec::new();
        for line in text.lines() {
            let (key, value) = split_line(line);
            if key.contains(RESOLVER_MARKER) {
                resolvers.push(Resolver::default());
            } else if let Some(resolver) = resolvers.last_mut() {
                resolver.apply(key, value);
            }
        }
        Self { resolvers }
    }

    /// Read the configuration text from `source` and parse it.
    pub async fn load(source: &dyn ConfigSource) -> Result<Self, NetError> {
        let text = match source.read_config().await {
            Err(err) if err.kind() == io::ErrorKind::Unsupported => {
                tracing::debug!(error = %err, "no resolver configuration source");
                return Err(NetError::Unsupported);
            }
            result => result.config_context()?,
        };
        let config = Self::parse(&text);
        tracing::debug!(
            resolvers = config.len(),
            nameservers = config.nameservers().count(),
            "loaded resolver configuration"
        );
        Ok(config)
    }

    pub fn resolvers(&self) -> &[Resolver] {
        &self.resolvers
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Every nameserver with its group: group order, then listing order.
    pub fn nameservers(&self) -> impl Iterator<Item = (&Resolver, &str)> {
        self.resolvers
            .iter()
            .flat_map(|r| r.nameservers.iter().map(move |ns| (r, ns.as_str())))
    }

    #[cfg(feature = "json")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Future returned by [`ConfigSource::read_config`].
pub type ConfigFuture<'a> = BoxFuture<'a, io::Result<String>>;

/// Where raw resolver configuration text comes from.
pub trait ConfigSource: Send + Sync {
    fn read_config(&self) -> ConfigFuture<'_>;
}

impl<F> ConfigSource for F
where
    F: Fn() -> io::Result<String> + Send + Sync,
{
    fn read_config(&self) -> ConfigFuture<'_> {
        Box::pin(std::future::ready(self()))
    }
}

/// Runs `scutil --dns` and captures its output.
#[derive(Debug, Clone)]
pub struct ScutilCommand {
    program: String,
    args: Vec<String>,
}

impl ScutilCommand {
    /// Run an arbitrary command in place of `scutil --dns`.
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl Default for ScutilCommand {
    fn default() -> Self {
        Self::new("scutil", &["--dns"])
    }
}

impl ConfigSource for ScutilCommand {
    fn read_config(&self) -> ConfigFuture<'_> {
        Box::pin(async move {
            tracing::debug!(program = %self.program, "reading resolver configuration");
            let output = match Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output()
                .await
            {
                Ok(output) => output,
                Err(err) if err.kind() == io::ErrorKind::NotFound && !cfg!(target_os = "macos") => {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("{} is not available on this platform", self.program),
                    ));
                }
                Err(err) => return Err(err),
            };

            if !output.status.success() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "{} exited with {}: {}",
                        self.program,
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                ));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}
