//! Network transport layer.
//!
//! - **Addresses** ([`address`]): logical hosts, their resolved alternatives
//!   and the stale-flagged sets shared with the receive loop.
//!
//! - **Fail-over operations** ([`socket`]): bind, send and connect that walk
//!   every resolved alternative before giving up.
//!
//! - **UDP** ([`udp`]): the data/control datagram source loop with
//!   cancellation.
//!
//! - **TCP** ([`tcp`]): the RTSP control connection, which also carries
//!   interleaved RTP (RFC 2326 §10.12).

pub mod address;
pub mod socket;
pub mod tcp;
pub mod udp;

pub use address::{Address, AddressPort, AddressSet, ResolvedAddress, ResolvedAddressPort};
pub use socket::{bind_any, connect_any, send_any};
pub use tcp::{RtspConnection, TcpConnector};
pub use udp::{Canceller, Datagram, DatagramSource, SourceConfig, Unit};
