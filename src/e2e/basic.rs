//! Reference E2E profile.
//!
//! A simple profile built from publicly available standards: CRC over the
//! canonical header-plus-payload image, a per-data-id monotonic counter
//! with a rollover window for replay detection, and a 16-bit freshness
//! timestamp. It is NOT an industry E2E profile and is not suitable for
//! production safety-critical use; AUTOSAR profiles plug in through the
//! registry.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::codec::Serializer;
use crate::error::{Result, SomeIpError};
use crate::message::SomeIpMessage;

use super::config::E2eConfig;
use super::crc;
use super::header::{E2eHeader, E2E_HEADER_SIZE};
use super::profile::E2eProfile;

/// Width of the rollover acceptance window on either side of the wrap.
const ROLLOVER_WINDOW: u32 = 10;

/// Low 16 bits of the steady-clock milliseconds since process start.
fn freshness_now() -> u16 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    (origin.elapsed().as_millis() & 0xFFFF) as u16
}

/// The reference profile ("basic", id 0).
pub struct BasicProfile {
    counters: Mutex<HashMap<u16, u32>>,
}

impl BasicProfile {
    /// Create a new profile instance with no counter history.
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Canonical byte image the CRC covers: fixed header fields with the
    /// given length, then the payload. The E2E header itself is excluded.
    fn crc_image(message: &SomeIpMessage, length: u32) -> Vec<u8> {
        let mut ser = Serializer::new();
        ser.write_u32(message.header.message_id());
        ser.write_u32(length);
        ser.write_u32(message.header.request_id());
        ser.write_u8(message.header.protocol_version);
        ser.write_u8(message.header.interface_version);
        ser.write_u8(message.header.message_type as u8);
        ser.write_u8(message.header.return_code as u8);
        ser.write_bytes(&message.payload);
        ser.into_bytes()
    }

    fn check_counter(&self, received: u32, config: &E2eConfig) -> Result<()> {
        let mut counters = self.counters.lock().unwrap();
        let last = counters.entry(config.data_id).or_insert(0);

        let accepted = if *last == 0 {
            // First message for this data id
            received >= 1 && received <= config.max_counter_value
        } else if received >= *last {
            // Same counter is an idempotent revalidation; greater is new data
            true
        } else {
            // Counter went backwards: only a rollover near the wrap point is
            // legitimate, anything else is a replay
            *last > config.max_counter_value.saturating_sub(ROLLOVER_WINDOW)
                && (1..=ROLLOVER_WINDOW).contains(&received)
        };

        if !accepted {
            return Err(SomeIpError::invalid_argument(format!(
                "counter {received} rejected, last accepted was {last}"
            )));
        }

        let rolled_over = *last > config.max_counter_value.saturating_sub(ROLLOVER_WINDOW)
            && received <= ROLLOVER_WINDOW;
        if received > *last || rolled_over {
            *last = received;
        }

        Ok(())
    }

    fn check_freshness(received: u16, config: &E2eConfig) -> Result<()> {
        let diff = freshness_now().wrapping_sub(received);
        let timeout = config.freshness_timeout_ms as u16;
        if diff > timeout && diff < 0xFFFF - timeout {
            return Err(SomeIpError::Timeout);
        }
        Ok(())
    }
}

impl Default for BasicProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl E2eProfile for BasicProfile {
    fn protect(&self, message: &mut SomeIpMessage, config: &E2eConfig) -> Result<()> {
        let crc_value = if config.enable_crc {
            // The length that will be on the wire once the header is in place
            let length = 8 + E2E_HEADER_SIZE as u32 + message.payload.len() as u32;
            let image = Self::crc_image(message, length);
            crc::crc(&image, 0, image.len(), config.crc_type)
        } else {
            0
        };

        let counter = if config.enable_counter {
            let mut counters = self.counters.lock().unwrap();
            let entry = counters.entry(config.data_id).or_insert(0);
            *entry += 1;
            if *entry > config.max_counter_value {
                *entry = 1;
            }
            *entry
        } else {
            0
        };

        let freshness = if config.enable_freshness {
            freshness_now()
        } else {
            0
        };

        message.set_e2e_header(E2eHeader::new(crc_value, counter, config.data_id, freshness));
        Ok(())
    }

    fn validate(&self, message: &SomeIpMessage, config: &E2eConfig) -> Result<()> {
        let header = message
            .e2e_header
            .ok_or_else(|| SomeIpError::invalid_argument("message carries no E2E header"))?;

        if header.data_id != config.data_id {
            return Err(SomeIpError::invalid_argument(format!(
                "data id 0x{:04X} does not match configured 0x{:04X}",
                header.data_id, config.data_id
            )));
        }

        if config.enable_crc {
            let image = Self::crc_image(message, message.header.length);
            let expected = crc::crc(&image, 0, image.len(), config.crc_type);

            let mask = match config.crc_type {
                0 => 0xFF,
                1 => 0xFFFF,
                _ => 0xFFFF_FFFF,
            };
            if header.crc & mask != expected & mask {
                return Err(SomeIpError::invalid_argument(format!(
                    "CRC mismatch: received 0x{:08X}, expected 0x{:08X}",
                    header.crc & mask,
                    expected & mask
                )));
            }
        }

        if config.enable_counter {
            self.check_counter(header.counter, config)?;
        }

        if config.enable_freshness {
            Self::check_freshness(header.freshness, config)?;
        }

        Ok(())
    }

    fn header_size(&self) -> usize {
        E2E_HEADER_SIZE
    }

    fn name(&self) -> &str {
        "basic"
    }

    fn profile_id(&self) -> u32 {
        0
    }
}
