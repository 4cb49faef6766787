//! SOME/IP-SD message container.

use bytes::Bytes;

use crate::error::{Result, SomeIpError};
use crate::header::{MethodId, ServiceId};
use crate::message::SomeIpMessage;

use super::entry::SdEntry;
use super::option::{Ipv4EndpointOption, Ipv4MulticastOption, SdOption, SD_OPTION_HEADER_SIZE};
use super::types::{EntryType, OptionType, SD_SERVICE_ID};

/// SD message flags.
///
/// Bit 7 is the reboot flag, bit 6 the unicast-capable flag. The low six
/// bits are reserved: masked to zero on transmit, ignored on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdFlags {
    /// Reboot flag - set until the sender's session id wraps once.
    pub reboot: bool,
    /// Unicast flag - the sender can receive unicast responses.
    pub unicast: bool,
}

impl SdFlags {
    /// Parse flags from a byte.
    pub fn from_u8(byte: u8) -> Self {
        Self {
            reboot: (byte & 0x80) != 0,
            unicast: (byte & 0x40) != 0,
        }
    }

    /// Serialize flags to a byte, reserved bits zero.
    pub fn to_u8(self) -> u8 {
        let mut byte = 0u8;
        if self.reboot {
            byte |= 0x80;
        }
        if self.unicast {
            byte |= 0x40;
        }
        byte
    }
}

/// A SOME/IP-SD message: flags, then one length-prefixed region holding
/// entries followed by options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SdMessage {
    /// Message flags.
    pub flags: SdFlags,
    /// Reserved 24 bits following the flags byte.
    pub reserved: u32,
    /// Entries, in wire order.
    pub entries: Vec<SdEntry>,
    /// Options, in wire order; entries reference them by index.
    pub options: Vec<SdOption>,
}

impl SdMessage {
    /// Create a new empty SD message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn add_entry(&mut self, entry: SdEntry) {
        self.entries.push(entry);
    }

    /// Add an option.
    pub fn add_option(&mut self, option: SdOption) {
        self.options.push(option);
    }

    /// Serialize the SD payload.
    ///
    /// Layout: `flags & 0xC0 (u8), reserved (u24), length (u32), entries,
    /// options`, with the length back-patched to cover everything after it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);

        buf.push(self.flags.to_u8());
        let reserved = self.reserved.to_be_bytes();
        buf.extend_from_slice(&reserved[1..4]);

        let length_offset = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);

        for entry in &self.entries {
            buf.extend_from_slice(&entry.to_bytes());
        }
        for option in &self.options {
            buf.extend_from_slice(&option.to_bytes());
        }

        let region_length = (buf.len() - 8) as u32;
        buf[length_offset..length_offset + 4].copy_from_slice(&region_length.to_be_bytes());

        buf
    }

    /// Parse an SD payload.
    ///
    /// The entries-and-options region is walked with a discriminator on
    /// each record. Entries precede options on the wire, and an option's
    /// leading length byte is 0x00 for any realistic length, which
    /// collides with the FindService entry type; so a record is taken as
    /// an entry while its first byte is an entry type and its bytes do
    /// not form a plausible known option, and the walk switches to
    /// options permanently at the first record that does. Unknown option
    /// types are skipped via their length prefix. Parsing fails unless
    /// the declared region is consumed exactly.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(SomeIpError::malformed(format!(
                "SD header needs 8 bytes, got {}",
                data.len()
            )));
        }

        let flags = SdFlags::from_u8(data[0]);
        let reserved = u32::from_be_bytes([0, data[1], data[2], data[3]]);
        let region_length = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;

        let region_end = 8usize
            .checked_add(region_length)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                SomeIpError::malformed(format!(
                    "SD region of {region_length} bytes exceeds payload of {}",
                    data.len()
                ))
            })?;

        let mut entries = Vec::new();
        let mut options = Vec::new();
        let mut offset = 8;
        let mut in_options = false;

        while offset < region_end {
            let record = &data[offset..region_end];
            let is_entry =
                !in_options && EntryType::from_u8(record[0]).is_some() && !plausible_option(record);
            if is_entry {
                let (entry, size) = SdEntry::from_bytes(record)?;
                entries.push(entry);
                offset += size;
            } else {
                in_options = true;
                let (option, size) = SdOption::from_bytes(record)?;
                if let Some(option) = option {
                    options.push(option);
                }
                offset += size;
            }
        }

        if offset != region_end {
            return Err(SomeIpError::malformed(
                "SD region length does not match its contents",
            ));
        }

        Ok(Self {
            flags,
            reserved,
            entries,
            options,
        })
    }

    /// Parse the SD payload of a SOME/IP message.
    pub fn from_someip_message(message: &SomeIpMessage) -> Result<Self> {
        if message.header.service_id != ServiceId(SD_SERVICE_ID) {
            return Err(SomeIpError::invalid_argument(format!(
                "not an SD message: service id {}",
                message.header.service_id
            )));
        }
        Self::from_bytes(&message.payload)
    }

    /// Wrap this SD payload in a SOME/IP notification.
    pub fn to_someip_message(&self, method_id: u16) -> SomeIpMessage {
        SomeIpMessage::notification(ServiceId(SD_SERVICE_ID), MethodId(method_id))
            .payload(Bytes::from(self.to_bytes()))
            .build()
    }

    /// Options referenced by an entry, per its first-option run.
    pub fn options_for_entry(&self, entry: &SdEntry) -> Vec<&SdOption> {
        let (index, run) = entry.option_run();
        (index..index + run)
            .filter_map(|i| self.options.get(i))
            .collect()
    }

    /// First endpoint option referenced by an entry.
    pub fn endpoint_for_entry(&self, entry: &SdEntry) -> Option<&Ipv4EndpointOption> {
        self.options_for_entry(entry)
            .into_iter()
            .find_map(SdOption::as_endpoint)
    }
}

/// Whether a record's bytes form a well-known option: a fitting length
/// prefix, a zero reserved byte, a recognized type, and the fixed data
/// length the type implies.
fn plausible_option(record: &[u8]) -> bool {
    if record.len() < SD_OPTION_HEADER_SIZE {
        return false;
    }
    let length = u16::from_be_bytes([record[0], record[1]]) as usize;
    if record[3] != 0 || SD_OPTION_HEADER_SIZE + length > record.len() {
        return false;
    }
    match OptionType::from_u8(record[2]) {
        Some(OptionType::IPv4Endpoint | OptionType::IPv4SdEndpoint) => {
            length == Ipv4EndpointOption::DATA_LENGTH as usize
        }
        Some(OptionType::IPv4Multicast) => length == Ipv4MulticastOption::DATA_LENGTH as usize,
        Some(OptionType::Configuration) => true,
        None => false,
    }
}
