//! Datagram sockets and connection fan-out.
//!
//! - [`datagram`]: the `DatagramSocket` connection trait and its UDP implementation
//! - [`escalation`]: staggering policies deciding when backups join a race
//! - [`fanout`]: one logical connection racing I/O over many

pub mod datagram;
pub mod escalation;
pub mod fanout;

pub use datagram::{BoxedDatagram, DatagramSocket, SocketFuture, UdpConnect, UdpDatagram};
pub use escalation::Escalation;
pub use fanout::FanoutConnection;
