//! Host specifications and their numeric resolutions.
//!
//! Every resolved address is kept in the IPv6 address space: IPv4 results
//! become IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`), so comparisons and
//! fail-over loops never branch on the address family.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{NetError, Result};

/// A logical host: a numeric literal or a name still to be looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Name(String),
}

impl Address {
    /// The IPv4 wildcard, used as the default local bind address.
    pub const UNSPECIFIED: Address = Address::Ipv4(Ipv4Addr::UNSPECIFIED);

    /// Resolve into every numeric alternative, in resolver order.
    ///
    /// Literals produce exactly one alternative. Names go through the system
    /// resolver; a failed lookup or an empty answer is a
    /// [`NetError::Resolution`].
    pub fn resolve(&self) -> Result<ResolvedAddress> {
        match self {
            Address::Ipv4(v4) => Ok(ResolvedAddress(vec![v4.to_ipv6_mapped()])),
            Address::Ipv6(v6) => Ok(ResolvedAddress(vec![*v6])),
            Address::Name(name) => resolve_name(name),
        }
    }
}

fn resolve_name(name: &str) -> Result<ResolvedAddress> {
    let lookup = (name, 0u16).to_socket_addrs().map_err(|e| NetError::Resolution {
        address: name.to_string(),
        reason: e.to_string(),
    })?;

    let mut alternatives: Vec<Ipv6Addr> = Vec::new();
    for addr in lookup {
        let ip = to_mapped(addr.ip());
        if !alternatives.contains(&ip) {
            alternatives.push(ip);
        }
    }

    tracing::debug!(name, alternatives = alternatives.len(), "name resolved");

    ResolvedAddress::new(alternatives).ok_or_else(|| NetError::Resolution {
        address: name.to_string(),
        reason: "no usable addresses".to_string(),
    })
}

/// Map any IP address into the IPv6 space.
pub fn to_mapped(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

impl FromStr for Address {
    type Err = NetError;

    /// Numeric literals become `Ipv4`/`Ipv6`; anything else non-empty is a `Name`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(NetError::InvalidConfig("empty address".to_string()));
        }
        let literal = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')).unwrap_or(s);
        match literal.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => Ok(Address::Ipv4(v4)),
            Ok(IpAddr::V6(v6)) => Ok(Address::Ipv6(v6)),
            Err(_) => Ok(Address::Name(s.to_string())),
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(v4) => write!(f, "{v4}"),
            Address::Ipv6(v6) => write!(f, "{v6}"),
            Address::Name(name) => write!(f, "{name}"),
        }
    }
}

/// All numeric alternatives one logical [`Address`] resolved to.
///
/// Never empty. Order is the resolver's order, which carries the system's
/// address-family preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress(Vec<Ipv6Addr>);

impl ResolvedAddress {
    /// Returns `None` for an empty list.
    pub fn new(alternatives: Vec<Ipv6Addr>) -> Option<Self> {
        if alternatives.is_empty() {
            None
        } else {
            Some(Self(alternatives))
        }
    }

    pub fn alternatives(&self) -> &[Ipv6Addr] {
        &self.0
    }

    pub fn contains(&self, ip: &Ipv6Addr) -> bool {
        self.0.contains(ip)
    }

    /// First alternative in its native family.
    pub fn primary(&self) -> IpAddr {
        let ip = self.0.first().copied().unwrap_or(Ipv6Addr::UNSPECIFIED);
        match ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(ip),
        }
    }

    /// Wildcard local address in the family of [`primary`](Self::primary),
    /// for binding a socket that can reach this address.
    pub fn wildcard(&self) -> ResolvedAddress {
        match self.primary() {
            IpAddr::V4(_) => Self(vec![Ipv4Addr::UNSPECIFIED.to_ipv6_mapped()]),
            IpAddr::V6(_) => Self(vec![Ipv6Addr::UNSPECIFIED]),
        }
    }
}

/// An [`Address`] with a port, e.g. a control-message recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressPort {
    pub address: Address,
    pub port: u16,
}

impl AddressPort {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub fn resolve(&self) -> Result<ResolvedAddressPort> {
        Ok(ResolvedAddressPort {
            address: self.address.resolve()?,
            port: self.port,
        })
    }
}

impl FromStr for AddressPort {
    type Err = NetError;

    /// Accepts `host:port`, `a.b.c.d:port` and `[v6]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| NetError::InvalidConfig(format!("missing port in {s:?}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| NetError::InvalidConfig(format!("invalid port in {s:?}")))?;
        Ok(Self {
            address: host.parse()?,
            port,
        })
    }
}

impl fmt::Display for AddressPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Address::Ipv6(v6) => write!(f, "[{v6}]:{}", self.port),
            ref other => write!(f, "{other}:{}", self.port),
        }
    }
}

/// A [`ResolvedAddress`] with a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddressPort {
    pub address: ResolvedAddress,
    pub port: u16,
}

/// Something that resolves into a numeric form.
pub trait Resolve {
    type Resolved: Clone + Send + Sync;

    fn resolve(&self) -> Result<Self::Resolved>;
}

impl Resolve for Address {
    type Resolved = ResolvedAddress;

    fn resolve(&self) -> Result<ResolvedAddress> {
        Address::resolve(self)
    }
}

impl Resolve for AddressPort {
    type Resolved = ResolvedAddressPort;

    fn resolve(&self) -> Result<ResolvedAddressPort> {
        AddressPort::resolve(self)
    }
}

/// A configured list of addresses and its cached resolution.
///
/// The list may be replaced from any thread. Replacing it only marks the
/// cache stale; the next [`resolved`](Self::resolved) call re-resolves.
/// Readers get an `Arc` snapshot and never hold a lock while using it.
///
/// A failed resolution is remembered: later calls return the same failure
/// without a lookup until the list is replaced.
pub struct AddressSet<T: Resolve> {
    configured: RwLock<Vec<T>>,
    stale: AtomicBool,
    resolved: RwLock<Arc<Vec<T::Resolved>>>,
    failure: RwLock<Option<String>>,
}

impl<T: Resolve + Clone> AddressSet<T> {
    pub fn new(addresses: Vec<T>) -> Self {
        Self {
            configured: RwLock::new(addresses),
            stale: AtomicBool::new(true),
            resolved: RwLock::new(Arc::new(Vec::new())),
            failure: RwLock::new(None),
        }
    }

    /// Replace the configured addresses and invalidate the resolution.
    pub fn set(&self, addresses: Vec<T>) {
        *self.configured.write() = addresses;
        *self.failure.write() = None;
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Returns a copy of the configured addresses.
    pub fn configured(&self) -> Vec<T> {
        self.configured.read().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    /// Current resolution, re-resolving first if the configuration changed.
    ///
    /// After a failed resolution every call fails the same way until
    /// [`set`](Self::set) replaces the list.
    pub fn resolved(&self) -> Result<Arc<Vec<T::Resolved>>> {
        if self.stale.swap(false, Ordering::SeqCst) {
            let configured = self.configured();
            let mut resolved = Vec::with_capacity(configured.len());
            for address in &configured {
                match address.resolve() {
                    Ok(r) => resolved.push(r),
                    Err(e) => {
                        tracing::warn!(error = %e, "address set unresolvable until reconfigured");
                        *self.failure.write() = Some(e.to_string());
                        return Err(e);
                    }
                }
            }
            tracing::debug!(entries = resolved.len(), "address set re-resolved");
            *self.resolved.write() = Arc::new(resolved);
            *self.failure.write() = None;
        }
        if let Some(reason) = self.failure.read().as_ref() {
            return Err(NetError::Resolution {
                address: "address set".to_string(),
                reason: reason.clone(),
            });
        }
        Ok(self.resolved.read().clone())
    }

    /// Whether the last resolution failed and no new list was set since.
    pub fn has_failed(&self) -> bool {
        self.failure.read().is_some()
    }
}

impl<T: Resolve + Clone> Default for AddressSet<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl AddressSet<Address> {
    /// Whether `peer` is one of the alternatives of any configured address.
    pub fn authorizes(&self, peer: &SocketAddr) -> Result<bool> {
        let ip = to_mapped(peer.ip());
        Ok(self.resolved()?.iter().any(|r| r.contains(&ip)))
    }
}
