//! SOME/IP middleware stack.
//!
//! This crate implements the SOME/IP family of automotive middleware
//! protocols for embedded and server-class nodes exchanging
//! service-oriented request/response and event traffic over IP:
//!
//! - The base message format with an optional End-to-End protection
//!   header inferred from length arithmetic
//! - A UDP transport with a dedicated receive thread and multicast
//!   management
//! - SOME/IP-SD service discovery (offer/find/subscribe)
//! - SOME/IP-TP segmentation and reassembly for large payloads
//! - An E2E profile engine with a process-wide registry
//! - A big-endian primitive-type serializer for payloads
//!
//! # Example
//!
//! ```no_run
//! use someip_stack::{MethodId, ServiceId, SomeIpMessage};
//! use someip_stack::transport::UdpTransport;
//!
//! let message = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
//!     .payload(b"hello".as_slice())
//!     .build();
//!
//! let transport = UdpTransport::new("0.0.0.0:0".parse().unwrap());
//! transport.start().unwrap();
//! transport
//!     .send_message(&message, "192.168.1.10:30490".parse().unwrap())
//!     .unwrap();
//! ```
//!
//! # Wire format
//!
//! SOME/IP messages consist of a 16-byte header, an optional 12-byte E2E
//! header, and the payload:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |    Service ID   |   Method ID     |  (4 bytes)
//! +--------+--------+--------+--------+
//! |  Length = 8 + e2e + payload size  |  (4 bytes)
//! +--------+--------+--------+--------+
//! |    Client ID    |   Session ID    |  (4 bytes)
//! +--------+--------+--------+--------+
//! |Proto|Iface|MsgType|RetCode|          (4 bytes)
//! +--------+--------+--------+--------+
//! |      E2E header (optional)        |  (12 bytes)
//! +--------+--------+--------+--------+
//! |           Payload ...             |  (variable)
//! +--------+--------+--------+--------+
//! ```

pub mod codec;
pub mod e2e;
pub mod error;
pub mod header;
pub mod message;
pub mod sd;
pub mod tp;
pub mod transport;
pub mod types;

// Re-export commonly used types at the crate root
pub use error::{Result, SomeIpError};
pub use header::{ClientId, MethodId, ServiceId, SessionId, SomeIpHeader, HEADER_SIZE};
pub use message::{MessageBuilder, SomeIpMessage};
pub use types::{MessageType, ReturnCode, INTERFACE_VERSION, PROTOCOL_VERSION};
