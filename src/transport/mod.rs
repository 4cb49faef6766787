//! Transport bindings for SOME/IP messages.

pub mod udp;

pub use udp::{TransportListener, UdpTransport, UdpTransportConfig, MAX_UDP_PAYLOAD};
