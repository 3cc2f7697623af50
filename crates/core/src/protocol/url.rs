use std::fmt;
use std::str::FromStr;

use crate::error::{NetError, ProtocolErrorKind, Result};
use crate::transport::address::{Address, AddressPort};

/// Port used when an `rtsp://` URL does not name one (RFC 2326 §3.2).
pub const DEFAULT_PORT: u16 = 554;

/// A parsed `rtsp://host[:port][/path]` location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspUrl {
    pub host: Address,
    pub port: u16,
    /// Absolute path, always starting with `/`.
    pub path: String,
    raw: String,
}

impl RtspUrl {
    pub fn parse(location: &str) -> Result<Self> {
        let invalid = || NetError::protocol(ProtocolErrorKind::InvalidUrl(location.to_string()));

        let rest = location
            .get(..7)
            .filter(|scheme| scheme.eq_ignore_ascii_case("rtsp://"))
            .map(|_| &location[7..])
            .ok_or_else(invalid)?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        // Credentials are not used for anything.
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        if authority.is_empty() {
            return Err(invalid());
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, p)) => (host, p.parse().map_err(|_| invalid())?),
                None => (authority, DEFAULT_PORT),
            }
        };

        Ok(RtspUrl {
            host: host.parse().map_err(|_| invalid())?,
            port,
            path: path.to_string(),
            raw: location.trim_end_matches('/').to_string(),
        })
    }

    /// Host and port to connect the control channel to.
    pub fn address_port(&self) -> AddressPort {
        AddressPort::new(self.host.clone(), self.port)
    }

    /// Request URI for a stream's `control` attribute.
    ///
    /// Absolute URLs are used as-is, `*` means the location itself, and
    /// anything else is appended as a path segment.
    pub fn resolve_control(&self, control: &str) -> String {
        if control
            .get(..7)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("rtsp://"))
        {
            control.to_string()
        } else if control == "*" || control.is_empty() {
            self.raw.clone()
        } else {
            format!("{}/{}", self.raw, control.trim_start_matches('/'))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for RtspUrl {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        RtspUrl::parse(s)
    }
}

impl fmt::Display for RtspUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
