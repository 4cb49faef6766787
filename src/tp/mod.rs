//! SOME/IP-TP (Transport Protocol) segmentation and reassembly.
//!
//! TP carries messages whose payload exceeds a single datagram. The
//! segmenter splits a payload into sized, sequence-numbered segments with
//! 16-byte-aligned offsets; the reassembler reconstructs the payload from
//! a coverage mask, tolerating duplicates and out-of-order delivery.
//! SOME/IP-TP is fire-and-forget: lost segments expire the reassembly
//! buffer and no negative acknowledgement is sent.

pub mod header;
pub mod reassembly;
pub mod segment;

pub use header::{TpHeader, TP_HEADER_SIZE};
pub use reassembly::TpReassembler;
pub use segment::{TpConfig, TpSegment, TpSegmentHeader, TpSegmentKind, TpSegmenter};
