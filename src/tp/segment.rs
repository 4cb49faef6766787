//! SOME/IP-TP segmentation.

use std::sync::Mutex;

use bytes::Bytes;

use crate::error::{Result, SomeIpError};
use crate::header::HEADER_SIZE;
use crate::message::SomeIpMessage;
use crate::types::MAX_TCP_PAYLOAD_SIZE;

use super::header::{TpHeader, TP_HEADER_SIZE};

/// Payloads above this size get the TP flag even when they fit in a
/// single segment.
const SINGLE_SEGMENT_TP_THRESHOLD: usize = 1000;

/// TP configuration shared by the segmenter and the reassembler.
#[derive(Debug, Clone)]
pub struct TpConfig {
    /// Maximum wire size of one segment.
    pub max_segment_size: usize,
    /// Maximum payload size of a reassembled message.
    pub max_message_size: usize,
    /// Age at which an incomplete reassembly buffer is dropped.
    pub reassembly_timeout: std::time::Duration,
}

impl Default for TpConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 1392,
            max_message_size: MAX_TCP_PAYLOAD_SIZE,
            reassembly_timeout: std::time::Duration::from_secs(5),
        }
    }
}

/// Position of a segment within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpSegmentKind {
    /// First segment; carries the SOME/IP header.
    First,
    /// Middle segment.
    Consecutive,
    /// Final segment.
    Last,
    /// The whole message in one segment.
    Single,
}

impl TpSegmentKind {
    /// Whether further segments follow this one.
    pub fn more_segments(&self) -> bool {
        matches!(self, Self::First | Self::Consecutive)
    }
}

/// Metadata describing one TP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpSegmentHeader {
    /// Sequence number shared by all segments of one message.
    pub sequence_number: u8,
    /// Byte offset of this segment's data within the original payload,
    /// aligned to 16 bytes.
    pub segment_offset: u32,
    /// Size of the segment payload in bytes.
    pub segment_length: u16,
    /// Total payload size of the original message.
    pub message_length: u32,
    /// Segment position.
    pub kind: TpSegmentKind,
}

/// One TP segment: metadata plus the bytes it carries.
///
/// For FIRST and SINGLE segments the payload begins with the 16-byte
/// SOME/IP header; CONSECUTIVE and LAST segments carry raw payload data
/// only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpSegment {
    /// Segment metadata.
    pub header: TpSegmentHeader,
    /// Segment bytes.
    pub payload: Bytes,
}

impl TpSegment {
    /// The 4-byte wire TP header for this segment.
    pub fn tp_header(&self) -> TpHeader {
        TpHeader::from_byte_offset(self.header.segment_offset as usize, self.header.kind.more_segments())
    }

    /// Serialize the segment for transmission.
    ///
    /// FIRST: SOME/IP header, TP header, data. CONSECUTIVE/LAST: TP
    /// header, data. SINGLE: the full serialized message as-is.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self.header.kind {
            TpSegmentKind::Single => self.payload.to_vec(),
            TpSegmentKind::First => {
                let mut buf = Vec::with_capacity(self.payload.len() + TP_HEADER_SIZE);
                buf.extend_from_slice(&self.payload[..HEADER_SIZE]);
                buf.extend_from_slice(&self.tp_header().to_bytes());
                buf.extend_from_slice(&self.payload[HEADER_SIZE..]);
                buf
            }
            TpSegmentKind::Consecutive | TpSegmentKind::Last => {
                let mut buf = Vec::with_capacity(TP_HEADER_SIZE + self.payload.len());
                buf.extend_from_slice(&self.tp_header().to_bytes());
                buf.extend_from_slice(&self.payload);
                buf
            }
        }
    }
}

/// Splits large messages into offset-indexed TP segments.
pub struct TpSegmenter {
    config: TpConfig,
    next_sequence: Mutex<u8>,
}

impl TpSegmenter {
    /// Create a segmenter with the given configuration.
    pub fn new(config: TpConfig) -> Self {
        Self {
            config,
            next_sequence: Mutex::new(0),
        }
    }

    /// Replace the configuration.
    pub fn update_config(&mut self, config: TpConfig) {
        self.config = config;
    }

    fn allocate_sequence(&self) -> u8 {
        let mut next = self.next_sequence.lock().unwrap();
        let sequence = *next;
        *next = next.wrapping_add(1);
        sequence
    }

    /// Segment a message's payload.
    ///
    /// Payloads within `max_segment_size` yield one SINGLE segment holding
    /// the fully serialized message. Larger payloads are split into a
    /// FIRST segment (SOME/IP header plus the leading chunk) and
    /// CONSECUTIVE/LAST segments, all sharing one sequence number. Chunk
    /// sizes leave room for the wire headers and are rounded down to a
    /// 16-byte multiple so every segment offset stays aligned.
    pub fn segment_message(&self, message: &SomeIpMessage) -> Result<Vec<TpSegment>> {
        let payload = &message.payload;

        if payload.len() > self.config.max_message_size {
            return Err(SomeIpError::MessageTooLarge {
                size: payload.len(),
                max: self.config.max_message_size,
            });
        }

        let sequence_number = self.allocate_sequence();

        if payload.len() <= self.config.max_segment_size {
            return self.single_segment(message, sequence_number);
        }

        let tp_type = message.header.message_type.to_tp().ok_or_else(|| {
            SomeIpError::invalid_argument(format!(
                "message type {:?} has no TP variant",
                message.header.message_type
            ))
        })?;

        let first_data = align_down(self.config.max_segment_size - HEADER_SIZE - TP_HEADER_SIZE);
        let consecutive_capacity = self.config.max_segment_size - TP_HEADER_SIZE;
        let consecutive_data = align_down(consecutive_capacity.min(u16::MAX as usize));
        if first_data == 0 || consecutive_data == 0 {
            return Err(SomeIpError::invalid_argument(format!(
                "max segment size {} leaves no room for data",
                self.config.max_segment_size
            )));
        }

        let total_length = payload.len() as u32;
        let mut segments = Vec::with_capacity(1 + payload.len() / consecutive_data);

        // First segment: TP-flagged SOME/IP header plus the leading chunk
        let mut tp_wire_header = message.header.clone();
        tp_wire_header.message_type = tp_type;
        tp_wire_header.length = 8 + TP_HEADER_SIZE as u32 + first_data as u32;

        let mut first_payload = Vec::with_capacity(HEADER_SIZE + first_data);
        first_payload.extend_from_slice(&tp_wire_header.to_bytes());
        first_payload.extend_from_slice(&payload[..first_data]);

        segments.push(TpSegment {
            header: TpSegmentHeader {
                sequence_number,
                segment_offset: 0,
                segment_length: (HEADER_SIZE + first_data) as u16,
                message_length: total_length,
                kind: TpSegmentKind::First,
            },
            payload: Bytes::from(first_payload),
        });

        let mut offset = first_data;
        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let (kind, take) = if remaining <= consecutive_capacity {
                (TpSegmentKind::Last, remaining)
            } else {
                (TpSegmentKind::Consecutive, consecutive_data)
            };

            segments.push(TpSegment {
                header: TpSegmentHeader {
                    sequence_number,
                    segment_offset: offset as u32,
                    segment_length: take as u16,
                    message_length: total_length,
                    kind,
                },
                payload: payload.slice(offset..offset + take),
            });

            offset += take;
        }

        Ok(segments)
    }

    fn single_segment(&self, message: &SomeIpMessage, sequence_number: u8) -> Result<Vec<TpSegment>> {
        let mut single = message.clone();
        if message.payload.len() > SINGLE_SEGMENT_TP_THRESHOLD {
            let tp_type = message.header.message_type.to_tp().ok_or_else(|| {
                SomeIpError::invalid_argument(format!(
                    "message type {:?} has no TP variant",
                    message.header.message_type
                ))
            })?;
            single.header.message_type = tp_type;
        }

        let data = single.to_bytes();
        let segment_length = u16::try_from(data.len()).map_err(|_| SomeIpError::MessageTooLarge {
            size: data.len(),
            max: u16::MAX as usize,
        })?;

        Ok(vec![TpSegment {
            header: TpSegmentHeader {
                sequence_number,
                segment_offset: 0,
                segment_length,
                message_length: message.payload.len() as u32,
                kind: TpSegmentKind::Single,
            },
            payload: Bytes::from(data),
        }])
    }
}

impl Default for TpSegmenter {
    fn default() -> Self {
        Self::new(TpConfig::default())
    }
}

fn align_down(value: usize) -> usize {
    value & !15
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MethodId, ServiceId};
    use crate::types::MessageType;

    fn request(payload: Vec<u8>) -> SomeIpMessage {
        SomeIpMessage::request(ServiceId(0x1234), MethodId(0x0001))
            .payload_vec(payload)
            .build()
    }

    #[test]
    fn test_small_message_single_segment() {
        let segmenter = TpSegmenter::default();
        let segments = segmenter.segment_message(&request(vec![0x42; 100])).unwrap();

        assert_eq!(segments.len(), 1);
        let segment = &segments[0];
        assert_eq!(segment.header.kind, TpSegmentKind::Single);
        assert_eq!(segment.header.segment_offset, 0);
        assert_eq!(segment.header.message_length, 100);
        assert_eq!(segment.payload.len(), HEADER_SIZE + 100);
        // Small single segments keep their base message type
        assert_eq!(segment.payload[14], MessageType::Request as u8);
    }

    #[test]
    fn test_single_segment_above_threshold_gets_tp_flag() {
        let segmenter = TpSegmenter::default();
        let segments = segmenter.segment_message(&request(vec![0x42; 1200])).unwrap();

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].payload[14], MessageType::TpRequest as u8);
    }

    #[test]
    fn test_multi_segment_layout() {
        let config = TpConfig {
            max_segment_size: 1024,
            max_message_size: 50000,
            ..TpConfig::default()
        };
        let segmenter = TpSegmenter::new(config);
        let segments = segmenter.segment_message(&request(vec![0xAA; 2000])).unwrap();

        // 1024 - 20 = 1004, aligned down to 992; remainder 1008 fits the
        // 1020-byte consecutive capacity
        assert_eq!(segments.len(), 2);

        let first = &segments[0];
        assert_eq!(first.header.kind, TpSegmentKind::First);
        assert_eq!(first.header.segment_offset, 0);
        assert_eq!(first.header.segment_length as usize, HEADER_SIZE + 992);
        assert_eq!(first.header.message_length, 2000);
        // Embedded header carries the TP flag and the segment-local length
        assert_eq!(first.payload[14], MessageType::TpRequest as u8);
        let embedded_length =
            u32::from_be_bytes([first.payload[4], first.payload[5], first.payload[6], first.payload[7]]);
        assert_eq!(embedded_length, 8 + 4 + 992);

        let last = &segments[1];
        assert_eq!(last.header.kind, TpSegmentKind::Last);
        assert_eq!(last.header.segment_offset, 992);
        assert_eq!(last.header.segment_length, 1008);
        assert_eq!(last.payload.len(), 1008);

        // One sequence number across the message
        assert_eq!(first.header.sequence_number, last.header.sequence_number);
    }

    #[test]
    fn test_offsets_stay_aligned() {
        let config = TpConfig {
            max_segment_size: 1024,
            max_message_size: 50000,
            ..TpConfig::default()
        };
        let segmenter = TpSegmenter::new(config);
        let segments = segmenter.segment_message(&request(vec![0x11; 5000])).unwrap();

        assert!(segments.len() > 2);
        for segment in &segments {
            assert_eq!(segment.header.segment_offset % 16, 0);
        }

        // Coverage is contiguous and complete
        let mut expected_offset = 0u32;
        for segment in &segments {
            assert_eq!(segment.header.segment_offset, expected_offset);
            let data_len = match segment.header.kind {
                TpSegmentKind::First => segment.payload.len() - HEADER_SIZE,
                _ => segment.payload.len(),
            };
            expected_offset += data_len as u32;
        }
        assert_eq!(expected_offset, 5000);
    }

    #[test]
    fn test_sequence_numbers_advance_per_message() {
        let segmenter = TpSegmenter::default();
        let first = segmenter.segment_message(&request(vec![1; 10])).unwrap();
        let second = segmenter.segment_message(&request(vec![2; 10])).unwrap();

        assert_eq!(
            second[0].header.sequence_number,
            first[0].header.sequence_number.wrapping_add(1)
        );
    }

    #[test]
    fn test_message_too_large() {
        let config = TpConfig {
            max_segment_size: 1024,
            max_message_size: 4096,
            ..TpConfig::default()
        };
        let segmenter = TpSegmenter::new(config);
        let result = segmenter.segment_message(&request(vec![0; 5000]));
        assert!(matches!(result, Err(SomeIpError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_response_cannot_be_segmented() {
        let config = TpConfig {
            max_segment_size: 256,
            ..TpConfig::default()
        };
        let segmenter = TpSegmenter::new(config);
        let message = SomeIpMessage::request(ServiceId(1), MethodId(1))
            .payload_vec(vec![0; 1000])
            .build();
        let mut response = message.create_response().payload_vec(vec![0; 1000]).build();
        response.update_length();

        assert!(matches!(
            segmenter.segment_message(&response),
            Err(SomeIpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_first_segment_wire_bytes() {
        let config = TpConfig {
            max_segment_size: 1024,
            max_message_size: 50000,
            ..TpConfig::default()
        };
        let segmenter = TpSegmenter::new(config);
        let segments = segmenter.segment_message(&request(vec![0xAA; 2000])).unwrap();

        let wire = segments[0].to_bytes();
        assert_eq!(wire.len(), HEADER_SIZE + TP_HEADER_SIZE + 992);
        // TP header sits right after the SOME/IP header: offset 0, more set
        assert_eq!(&wire[16..20], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(wire[20], 0xAA);

        let wire_last = segments[1].to_bytes();
        assert_eq!(wire_last.len(), TP_HEADER_SIZE + 1008);
        // 992 / 16 = 62 units, more clear
        let tp = TpHeader::from_bytes(&wire_last[..4]).unwrap();
        assert_eq!(tp.byte_offset(), 992);
        assert!(!tp.more);
    }
}
