//! SOME/IP-SD option types.
//!
//! Options are length-prefixed: a 4-byte header (`length (u16), type (u8),
//! reserved (u8)`) followed by `length` bytes of data. The length counts
//! only the data after the header.

use std::net::Ipv4Addr;

use tracing::warn;

use crate::error::{Result, SomeIpError};

use super::types::OptionType;

/// Size of the option header (length, type, reserved).
pub const SD_OPTION_HEADER_SIZE: usize = 4;

fn warn_on_reserved_address(address: Ipv4Addr, option: &str) {
    if address == Ipv4Addr::UNSPECIFIED || address == Ipv4Addr::BROADCAST {
        warn!(%address, option, "reserved IPv4 address in SD option");
    }
}

/// IPv4 endpoint option: a unicast service endpoint.
///
/// Data portion is 8 bytes: `ipv4 (u32), reserved (u8), protocol (u8),
/// port (u16)`; 12 bytes total with the option header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4EndpointOption {
    /// IPv4 address.
    pub address: Ipv4Addr,
    /// Transport protocol byte (0x11 = UDP, 0x06 = TCP).
    pub protocol: u8,
    /// Port number.
    pub port: u16,
}

impl Ipv4EndpointOption {
    /// Length of the data after the option header.
    pub const DATA_LENGTH: u16 = 8;

    /// Create a new IPv4 endpoint option.
    pub fn new(address: Ipv4Addr, protocol: u8, port: u16) -> Self {
        Self {
            address,
            protocol,
            port,
        }
    }

    fn to_bytes(self, option_type: OptionType) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SD_OPTION_HEADER_SIZE + Self::DATA_LENGTH as usize);
        buf.extend_from_slice(&Self::DATA_LENGTH.to_be_bytes());
        buf.push(option_type as u8);
        buf.push(0); // Reserved
        buf.extend_from_slice(&self.address.octets());
        buf.push(0); // Reserved
        buf.push(self.protocol);
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Parse the data portion (after the option header).
    pub fn from_data(data: &[u8]) -> Result<Self> {
        if data.len() < Self::DATA_LENGTH as usize {
            return Err(SomeIpError::malformed(format!(
                "IPv4 endpoint option needs {} data bytes, got {}",
                Self::DATA_LENGTH,
                data.len()
            )));
        }

        let address = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        warn_on_reserved_address(address, "endpoint");

        Ok(Self {
            address,
            protocol: data[5],
            port: u16::from_be_bytes([data[6], data[7]]),
        })
    }
}

/// IPv4 multicast option: the group events are published to.
///
/// Data portion is 7 bytes: `ipv4 (u32), reserved (u8), port (u16)`;
/// 11 bytes total with the option header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4MulticastOption {
    /// IPv4 multicast address.
    pub address: Ipv4Addr,
    /// Port number.
    pub port: u16,
}

impl Ipv4MulticastOption {
    /// Length of the data after the option header.
    pub const DATA_LENGTH: u16 = 7;

    /// Create a new IPv4 multicast option.
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SD_OPTION_HEADER_SIZE + Self::DATA_LENGTH as usize);
        buf.extend_from_slice(&Self::DATA_LENGTH.to_be_bytes());
        buf.push(OptionType::IPv4Multicast as u8);
        buf.push(0); // Reserved
        buf.extend_from_slice(&self.address.octets());
        buf.push(0); // Reserved
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Parse the data portion (after the option header).
    pub fn from_data(data: &[u8]) -> Result<Self> {
        if data.len() < Self::DATA_LENGTH as usize {
            return Err(SomeIpError::malformed(format!(
                "IPv4 multicast option needs {} data bytes, got {}",
                Self::DATA_LENGTH,
                data.len()
            )));
        }

        let address = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        warn_on_reserved_address(address, "multicast");

        Ok(Self {
            address,
            port: u16::from_be_bytes([data[5], data[6]]),
        })
    }
}

/// Configuration string option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationOption {
    /// Configuration string.
    pub config_string: String,
}

impl ConfigurationOption {
    /// Create a new configuration option.
    pub fn new(config_string: impl Into<String>) -> Self {
        Self {
            config_string: config_string.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let data = self.config_string.as_bytes();
        let mut buf = Vec::with_capacity(SD_OPTION_HEADER_SIZE + data.len());
        buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        buf.push(OptionType::Configuration as u8);
        buf.push(0); // Reserved
        buf.extend_from_slice(data);
        buf
    }

    /// Parse the data portion (after the option header).
    pub fn from_data(data: &[u8]) -> Result<Self> {
        let config_string = String::from_utf8(data.to_vec())
            .map_err(|_| SomeIpError::malformed("configuration option is not valid UTF-8"))?;
        Ok(Self { config_string })
    }
}

/// An SD option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdOption {
    /// IPv4 endpoint option (type 0x04).
    Ipv4Endpoint(Ipv4EndpointOption),
    /// IPv4 SD endpoint option (type 0x24, same layout as endpoint).
    Ipv4SdEndpoint(Ipv4EndpointOption),
    /// IPv4 multicast option (type 0x14).
    Ipv4Multicast(Ipv4MulticastOption),
    /// Configuration string option (type 0x01).
    Configuration(ConfigurationOption),
}

impl SdOption {
    /// Serialize the option, including its header.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SdOption::Ipv4Endpoint(opt) => opt.to_bytes(OptionType::IPv4Endpoint),
            SdOption::Ipv4SdEndpoint(opt) => opt.to_bytes(OptionType::IPv4SdEndpoint),
            SdOption::Ipv4Multicast(opt) => opt.to_bytes(),
            SdOption::Configuration(opt) => opt.to_bytes(),
        }
    }

    /// Parse an option from bytes (including its header).
    ///
    /// Returns the option, or `None` for an unknown type (which the caller
    /// skips), together with the total wire size consumed.
    pub fn from_bytes(data: &[u8]) -> Result<(Option<Self>, usize)> {
        if data.len() < SD_OPTION_HEADER_SIZE {
            return Err(SomeIpError::malformed(format!(
                "option header needs {SD_OPTION_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let length = u16::from_be_bytes([data[0], data[1]]) as usize;
        let type_byte = data[2];

        let total = SD_OPTION_HEADER_SIZE + length;
        if data.len() < total {
            return Err(SomeIpError::malformed(format!(
                "option of {total} bytes truncated at {}",
                data.len()
            )));
        }

        let option_data = &data[SD_OPTION_HEADER_SIZE..total];

        let option = match OptionType::from_u8(type_byte) {
            Some(OptionType::IPv4Endpoint) => {
                Some(SdOption::Ipv4Endpoint(Ipv4EndpointOption::from_data(option_data)?))
            }
            Some(OptionType::IPv4SdEndpoint) => {
                Some(SdOption::Ipv4SdEndpoint(Ipv4EndpointOption::from_data(option_data)?))
            }
            Some(OptionType::IPv4Multicast) => {
                Some(SdOption::Ipv4Multicast(Ipv4MulticastOption::from_data(option_data)?))
            }
            Some(OptionType::Configuration) => {
                Some(SdOption::Configuration(ConfigurationOption::from_data(option_data)?))
            }
            None => {
                warn!(option_type = type_byte, "skipping unknown SD option type");
                None
            }
        };

        Ok((option, total))
    }

    /// The endpoint data if this is an endpoint-shaped option.
    pub fn as_endpoint(&self) -> Option<&Ipv4EndpointOption> {
        match self {
            SdOption::Ipv4Endpoint(opt) | SdOption::Ipv4SdEndpoint(opt) => Some(opt),
            _ => None,
        }
    }
}
