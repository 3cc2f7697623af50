pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{NetError, Result};
pub use media::{Depacketizer, MediaBuffer, Packetizer};
pub use session::{ControlSession, SessionConfig, SessionPhase, StateChange};
pub use transport::{Address, AddressPort, DatagramSource, SourceConfig, Unit};
