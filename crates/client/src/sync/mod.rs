// Live replica synchronization over the note room transport.

pub mod connection;
pub mod transport;

pub use connection::ConnectionController;
pub use transport::{ReconnectPolicy, Transport, TransportError, TransportLink, WsTransport};
