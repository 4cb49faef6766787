//! SOME/IP-TP reassembly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Result;
use crate::header::HEADER_SIZE;

use super::segment::{TpConfig, TpSegment, TpSegmentKind};

/// In-progress reassembly of one segmented message.
#[derive(Debug)]
struct ReassemblyBuffer {
    total_length: usize,
    received_data: Vec<u8>,
    received_mask: Vec<bool>,
    start_time: Instant,
}

impl ReassemblyBuffer {
    fn new(total_length: usize) -> Self {
        Self {
            total_length,
            received_data: vec![0; total_length],
            received_mask: vec![false; total_length],
            start_time: Instant::now(),
        }
    }

    fn range_received(&self, offset: usize, length: usize) -> bool {
        length > 0
            && offset + length <= self.received_mask.len()
            && self.received_mask[offset..offset + length].iter().all(|&b| b)
    }

    fn insert(&mut self, offset: usize, data: &[u8]) {
        let end = (offset + data.len()).min(self.total_length);
        if offset >= end {
            return;
        }
        let take = end - offset;
        self.received_data[offset..end].copy_from_slice(&data[..take]);
        for marked in &mut self.received_mask[offset..end] {
            *marked = true;
        }
    }

    fn is_complete(&self) -> bool {
        self.received_mask.iter().all(|&b| b)
    }
}

/// Collects TP segments keyed by sequence number and reconstructs the
/// original payloads.
///
/// A buffer exists only after a FIRST or SINGLE segment has arrived;
/// stray CONSECUTIVE/LAST segments are dropped. Completion is decided by
/// the coverage mask alone, so arrival order does not matter and
/// duplicates are ignored.
pub struct TpReassembler {
    config: Mutex<TpConfig>,
    buffers: Mutex<HashMap<u8, ReassemblyBuffer>>,
}

impl TpReassembler {
    /// Create a reassembler with the given configuration.
    pub fn new(config: TpConfig) -> Self {
        Self {
            config: Mutex::new(config),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the configuration.
    pub fn update_config(&self, config: TpConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Feed one segment.
    ///
    /// Returns the reconstructed payload once the final covering segment
    /// arrives; `None` while incomplete. Invalid, stray and duplicate
    /// segments are dropped silently.
    pub fn process_segment(&self, segment: &TpSegment) -> Result<Option<Vec<u8>>> {
        if !self.validate_segment(segment) {
            return Ok(None);
        }

        let mut buffers = self.buffers.lock().unwrap();
        let sequence = segment.header.sequence_number;

        if !buffers.contains_key(&sequence) {
            // Only a FIRST or SINGLE segment opens a buffer
            if !matches!(
                segment.header.kind,
                TpSegmentKind::First | TpSegmentKind::Single
            ) {
                return Ok(None);
            }
            buffers.insert(
                sequence,
                ReassemblyBuffer::new(segment.header.message_length as usize),
            );
        }
        let buffer = buffers.get_mut(&sequence).expect("buffer just ensured");

        let (offset, data) = match segment.header.kind {
            // FIRST and SINGLE carry the SOME/IP header; strip it
            TpSegmentKind::First | TpSegmentKind::Single => {
                if segment.payload.len() < HEADER_SIZE {
                    return Ok(None);
                }
                (0usize, &segment.payload[HEADER_SIZE..])
            }
            TpSegmentKind::Consecutive | TpSegmentKind::Last => {
                (segment.header.segment_offset as usize, &segment.payload[..])
            }
        };

        if buffer.range_received(offset, data.len()) {
            return Ok(None); // Duplicate
        }

        buffer.insert(offset, data);

        if buffer.is_complete() {
            let buffer = buffers.remove(&sequence).expect("buffer present");
            return Ok(Some(buffer.received_data));
        }

        Ok(None)
    }

    fn validate_segment(&self, segment: &TpSegment) -> bool {
        let config = self.config.lock().unwrap();
        let header = &segment.header;

        if segment.payload.len() != header.segment_length as usize {
            return false;
        }
        if header.message_length as usize > config.max_message_size {
            return false;
        }

        // Bounds are checked against the data that will actually be
        // copied; FIRST/SINGLE payloads embed the 16-byte SOME/IP header
        let data_length = match header.kind {
            TpSegmentKind::First | TpSegmentKind::Single => {
                (header.segment_length as usize).saturating_sub(HEADER_SIZE)
            }
            _ => header.segment_length as usize,
        };
        let offset = match header.kind {
            TpSegmentKind::First | TpSegmentKind::Single => 0,
            _ => header.segment_offset as usize,
        };

        offset + data_length <= header.message_length as usize
    }

    /// Drop buffers older than the reassembly timeout.
    ///
    /// Returns the number of buffers removed.
    pub fn process_timeouts(&self) -> usize {
        let timeout = self.config.lock().unwrap().reassembly_timeout;
        let mut buffers = self.buffers.lock().unwrap();
        let before = buffers.len();
        buffers.retain(|_, buffer| buffer.start_time.elapsed() <= timeout);
        before - buffers.len()
    }

    /// Abort the reassembly for a sequence number.
    pub fn cancel_reassembly(&self, sequence_number: u8) {
        self.buffers.lock().unwrap().remove(&sequence_number);
    }

    /// Number of reassemblies in progress.
    pub fn active_reassemblies(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

impl Default for TpReassembler {
    fn default() -> Self {
        Self::new(TpConfig::default())
    }
}
