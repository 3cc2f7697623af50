use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::{NetError, Result};
use crate::transport::address::{Address, AddressPort, AddressSet, ResolvedAddress};
use crate::transport::socket::{bind_any, send_any};

const WAKE: Token = Token(0);
const CONTROL: Token = Token(1);
const DATA: Token = Token(2);

/// Largest possible UDP payload.
const MAX_DATAGRAM: usize = 65_535;

/// Configuration for a [`DatagramSource`].
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Local address both sockets bind to.
    pub local_address: Address,
    /// Port receiving media data. `0` picks an ephemeral port.
    pub data_port: u16,
    /// Port sending and receiving control messages. `0` picks an ephemeral port.
    pub control_port: u16,
    /// Annotate every unit with the sender's socket address.
    pub include_sender: bool,
    /// Hosts whose datagrams are accepted. Everything else is dropped.
    pub authorized_senders: Vec<Address>,
    /// Recipients of [`DatagramSource::send_control`].
    pub remote_receivers: Vec<AddressPort>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            local_address: Address::UNSPECIFIED,
            data_port: 0,
            control_port: 0,
            include_sender: false,
            authorized_senders: Vec::new(),
            remote_receivers: Vec::new(),
        }
    }
}

/// Address sets that may be reconfigured while the receive loop runs.
pub struct SourceAddresses {
    pub authorized_senders: AddressSet<Address>,
    pub remote_receivers: AddressSet<AddressPort>,
}

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    /// Sender address, present only when address annotation is enabled.
    pub sender: Option<SocketAddr>,
}

/// One result of [`DatagramSource::next_unit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// Emitted once per activation, before the first accepted datagram:
    /// the stream carries no origin for the pipeline's elapsed time.
    Discontinuity,
    /// Datagram received on the data socket.
    Data(Datagram),
    /// Datagram received on the control socket.
    Control(Datagram),
    /// Shutdown was requested through a [`Canceller`].
    Canceled,
}

/// Cross-thread handle that interrupts a blocked [`DatagramSource::next_unit`].
///
/// Each [`cancel`](Self::cancel) is consumed by exactly one `next_unit`
/// call, which returns [`Unit::Canceled`] before looking at any socket.
#[derive(Clone)]
pub struct Canceller {
    waker: Arc<Waker>,
    pending: Arc<AtomicUsize>,
}

impl Canceller {
    pub fn cancel(&self) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.waker.wake()?;
        tracing::debug!("receive loop cancellation requested");
        Ok(())
    }

    fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Sockets {
    data: UdpSocket,
    control: UdpSocket,
}

enum Attempt {
    Accepted(Unit),
    Dropped,
    Empty,
}

/// UDP receive loop over a data socket and a control socket.
///
/// Meant to be driven by one dedicated thread calling
/// [`next_unit`](Self::next_unit), which blocks without timeout until a
/// datagram from an authorized sender arrives or a [`Canceller`] fires.
/// Cancellation is checked before the sockets on every iteration, so
/// sustained traffic cannot delay shutdown.
///
/// Sockets exist only between [`activate`](Self::activate) and
/// [`deactivate`](Self::deactivate); the poller and the cancellation
/// waker are created once in [`new`](Self::new) and reused.
pub struct DatagramSource {
    poll: Poll,
    events: Events,
    canceller: Canceller,
    local: AddressSet<Address>,
    data_port: u16,
    control_port: u16,
    include_sender: bool,
    addresses: Arc<SourceAddresses>,
    sockets: Option<Sockets>,
    first_buffer: bool,
    pending: Option<Unit>,
    scratch: Vec<u8>,
}

impl DatagramSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(8),
            canceller: Canceller {
                waker: Arc::new(waker),
                pending: Arc::new(AtomicUsize::new(0)),
            },
            local: AddressSet::new(vec![config.local_address]),
            data_port: config.data_port,
            control_port: config.control_port,
            include_sender: config.include_sender,
            addresses: Arc::new(SourceAddresses {
                authorized_senders: AddressSet::new(config.authorized_senders),
                remote_receivers: AddressSet::new(config.remote_receivers),
            }),
            sockets: None,
            first_buffer: true,
            pending: None,
            scratch: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Shared handle to the authorized-sender and recipient sets.
    pub fn addresses(&self) -> Arc<SourceAddresses> {
        self.addresses.clone()
    }

    pub fn is_active(&self) -> bool {
        self.sockets.is_some()
    }

    pub fn set_local_address(&mut self, address: Address) -> Result<()> {
        self.ensure_inactive("local address")?;
        self.local.set(vec![address]);
        Ok(())
    }

    pub fn set_data_port(&mut self, port: u16) -> Result<()> {
        self.ensure_inactive("data port")?;
        self.data_port = port;
        Ok(())
    }

    pub fn set_control_port(&mut self, port: u16) -> Result<()> {
        self.ensure_inactive("control port")?;
        self.control_port = port;
        Ok(())
    }

    pub fn set_include_sender(&mut self, include: bool) {
        self.include_sender = include;
    }

    pub fn set_authorized_senders(&self, senders: Vec<Address>) {
        self.addresses.authorized_senders.set(senders);
    }

    pub fn set_remote_receivers(&self, receivers: Vec<AddressPort>) {
        self.addresses.remote_receivers.set(receivers);
    }

    fn ensure_inactive(&self, what: &'static str) -> Result<()> {
        if self.is_active() {
            Err(NetError::Active(what))
        } else {
            Ok(())
        }
    }

    /// Bound address of the data socket while active.
    pub fn local_data_addr(&self) -> Option<SocketAddr> {
        self.sockets.as_ref().and_then(|s| s.data.local_addr().ok())
    }

    /// Bound address of the control socket while active.
    pub fn local_control_addr(&self) -> Option<SocketAddr> {
        self.sockets.as_ref().and_then(|s| s.control.local_addr().ok())
    }

    /// Open and bind both sockets. A no-op when already active.
    pub fn activate(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let local = self
            .local
            .resolved()?
            .first()
            .cloned()
            .ok_or_else(|| NetError::InvalidConfig("no local address".to_string()))?;

        let mut data = open(&local, self.data_port)?;
        let mut control = open(&local, self.control_port)?;

        let registry = self.poll.registry();
        registry.register(&mut data, DATA, Interest::READABLE)?;
        if let Err(e) = registry.register(&mut control, CONTROL, Interest::READABLE) {
            let _ = registry.deregister(&mut data);
            return Err(e.into());
        }

        tracing::info!(
            data = ?data.local_addr().ok(),
            control = ?control.local_addr().ok(),
            "datagram source active"
        );

        self.sockets = Some(Sockets { data, control });
        self.first_buffer = true;
        self.pending = None;
        Ok(())
    }

    /// Close both sockets. Cancellation requests stay pending.
    pub fn deactivate(&mut self) {
        if let Some(mut sockets) = self.sockets.take() {
            let registry = self.poll.registry();
            let _ = registry.deregister(&mut sockets.data);
            let _ = registry.deregister(&mut sockets.control);
            tracing::info!("datagram source inactive");
        }
        self.pending = None;
    }

    /// Block until the next unit is available.
    ///
    /// Datagrams from unauthorized senders are dropped silently and the
    /// wait continues. The control socket is read before the data socket.
    pub fn next_unit(&mut self) -> Result<Unit> {
        if !self.is_active() {
            return Err(NetError::NotActive);
        }

        loop {
            if self.canceller.take() {
                tracing::debug!("receive loop canceled");
                return Ok(Unit::Canceled);
            }

            if let Some(unit) = self.pending.take() {
                return Ok(unit);
            }

            match self.try_receive()? {
                Attempt::Accepted(unit) => {
                    if self.first_buffer {
                        self.first_buffer = false;
                        self.pending = Some(unit);
                        return Ok(Unit::Discontinuity);
                    }
                    return Ok(unit);
                }
                Attempt::Dropped => continue,
                Attempt::Empty => {}
            }

            // Both sockets returned WouldBlock, so no readiness edge is lost.
            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn try_receive(&mut self) -> Result<Attempt> {
        let Some(sockets) = self.sockets.as_ref() else {
            return Err(NetError::NotActive);
        };

        for (is_control, socket) in [(true, &sockets.control), (false, &sockets.data)] {
            let (len, peer) = match socket.recv_from(&mut self.scratch) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Attempt::Dropped),
                Err(e) => return Err(e.into()),
            };

            let authorized = match self.addresses.authorized_senders.authorizes(&peer) {
                Ok(authorized) => authorized,
                Err(e) => {
                    tracing::trace!(error = %e, "authorized senders unresolvable, dropping");
                    false
                }
            };
            if !authorized {
                tracing::trace!(%peer, len, "dropped datagram from unauthorized sender");
                return Ok(Attempt::Dropped);
            }

            let datagram = Datagram {
                payload: self.scratch[..len].to_vec(),
                sender: self.include_sender.then_some(peer),
            };
            tracing::trace!(%peer, len, control = is_control, "datagram received");

            let unit = if is_control {
                Unit::Control(datagram)
            } else {
                Unit::Data(datagram)
            };
            return Ok(Attempt::Accepted(unit));
        }

        Ok(Attempt::Empty)
    }

    /// Send `payload` from the control socket to every remote receiver.
    ///
    /// A recipient that cannot be reached is logged and skipped. Returns
    /// the number of recipients the payload was sent to.
    pub fn send_control(&self, payload: &[u8]) -> Result<usize> {
        let sockets = self.sockets.as_ref().ok_or(NetError::NotActive)?;
        let receivers = self.addresses.remote_receivers.resolved()?;

        let mut delivered = 0;
        for receiver in receivers.iter() {
            match send_any(&sockets.control, receiver, payload) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(port = receiver.port, error = %e, "control send failed");
                }
            }
        }
        Ok(delivered)
    }
}

fn open(local: &ResolvedAddress, port: u16) -> Result<UdpSocket> {
    let socket = bind_any(local, port)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket as StdUdpSocket};
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn loopback_source(authorized: Vec<Address>) -> DatagramSource {
        let mut source = DatagramSource::new(SourceConfig {
            local_address: Address::Ipv4(Ipv4Addr::LOCALHOST),
            authorized_senders: authorized,
            ..SourceConfig::default()
        })
        .unwrap();
        source.activate().unwrap();
        source
    }

    fn localhost() -> Address {
        Address::Ipv4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn not_active_before_activate() {
        let mut source = DatagramSource::new(SourceConfig::default()).unwrap();
        assert!(matches!(source.next_unit(), Err(NetError::NotActive)));
        assert!(matches!(source.send_control(b"x"), Err(NetError::NotActive)));
    }

    #[test]
    fn first_datagram_preceded_by_discontinuity() {
        let mut source = loopback_source(vec![localhost()]);
        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let data_addr = source.local_data_addr().unwrap();

        sender.send_to(b"one", data_addr).unwrap();
        sender.send_to(b"two", data_addr).unwrap();

        assert_eq!(source.next_unit().unwrap(), Unit::Discontinuity);
        assert_eq!(
            source.next_unit().unwrap(),
            Unit::Data(Datagram {
                payload: b"one".to_vec(),
                sender: None
            })
        );
        assert_eq!(
            source.next_unit().unwrap(),
            Unit::Data(Datagram {
                payload: b"two".to_vec(),
                sender: None
            })
        );
    }

    #[test]
    fn control_socket_yields_control_units_with_sender() {
        let mut source = loopback_source(vec![localhost()]);
        source.set_include_sender(true);
        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(b"rtcp", source.local_control_addr().unwrap())
            .unwrap();

        assert_eq!(source.next_unit().unwrap(), Unit::Discontinuity);
        match source.next_unit().unwrap() {
            Unit::Control(d) => {
                assert_eq!(d.payload, b"rtcp");
                assert_eq!(d.sender, Some(sender.local_addr().unwrap()));
            }
            other => panic!("expected control unit, got {other:?}"),
        }
    }

    #[test]
    fn unauthorized_sender_dropped_until_reconfigured() {
        let mut source = loopback_source(vec![Address::Ipv4(Ipv4Addr::new(10, 9, 9, 9))]);
        let canceller = source.canceller();
        let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let data_addr = source.local_data_addr().unwrap();

        sender.send_to(b"rejected", data_addr).unwrap();
        let cancel_thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            canceller.cancel().unwrap();
        });
        assert_eq!(source.next_unit().unwrap(), Unit::Canceled);
        cancel_thread.join().unwrap();

        source.addresses().authorized_senders.set(vec![localhost()]);
        sender.send_to(b"accepted", data_addr).unwrap();
        assert_eq!(source.next_unit().unwrap(), Unit::Discontinuity);
        match source.next_unit().unwrap() {
            Unit::Data(d) => assert_eq!(d.payload, b"accepted"),
            other => panic!("expected data unit, got {other:?}"),
        }
    }

    #[test]
    fn cancel_wakes_blocked_receiver() {
        let mut source = loopback_source(vec![localhost()]);
        let canceller = source.canceller();
        let receiver = thread::spawn(move || source.next_unit().unwrap());
        thread::sleep(Duration::from_millis(50));
        canceller.cancel().unwrap();
        assert_eq!(receiver.join().unwrap(), Unit::Canceled);
    }

    #[test]
    fn cancel_wins_over_sustained_traffic() {
        let mut source = loopback_source(vec![localhost()]);
        let data_addr = source.local_data_addr().unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let flood = {
            let running = running.clone();
            thread::spawn(move || {
                let sender = StdUdpSocket::bind("127.0.0.1:0").unwrap();
                while running.load(Ordering::SeqCst) {
                    let _ = sender.send_to(&[0u8; 64], data_addr);
                }
            })
        };

        for _ in 0..10 {
            assert_ne!(source.next_unit().unwrap(), Unit::Canceled);
        }
        source.canceller().cancel().unwrap();
        assert_eq!(source.next_unit().unwrap(), Unit::Canceled);

        running.store(false, Ordering::SeqCst);
        flood.join().unwrap();
    }

    #[test]
    fn setters_rejected_while_active() {
        let mut source = loopback_source(vec![localhost()]);
        assert!(matches!(
            source.set_data_port(5000),
            Err(NetError::Active("data port"))
        ));
        assert!(matches!(
            source.set_control_port(5001),
            Err(NetError::Active("control port"))
        ));
        assert!(matches!(
            source.set_local_address(Address::UNSPECIFIED),
            Err(NetError::Active("local address"))
        ));

        source.deactivate();
        assert!(!source.is_active());
        source.set_data_port(0).unwrap();
        source.set_local_address(localhost()).unwrap();
        source.activate().unwrap();
        assert!(source.is_active());
    }

    #[test]
    fn control_send_survives_unreachable_recipient() {
        let source = loopback_source(vec![localhost()]);
        let receiver = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        source.set_remote_receivers(vec![
            // IPv6-only destination is unusable from the IPv4 control socket.
            AddressPort::new("2001:db8::1".parse().unwrap(), 9),
            AddressPort::new(localhost(), receiver.local_addr().unwrap().port()),
        ]);
        assert_eq!(source.send_control(b"bye").unwrap(), 1);

        let mut buf = [0u8; 8];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"bye");
        assert_eq!(from, source.local_control_addr().unwrap());
    }
}
