//! SOME/IP-SD type definitions.

use std::net::Ipv4Addr;

/// SD Service ID (always 0xFFFF).
pub const SD_SERVICE_ID: u16 = 0xFFFF;

/// Method ID used by SD servers for notifications.
pub const SD_METHOD_ID: u16 = 0x8100;

/// Fixed SD multicast group joined by clients and servers.
pub const SD_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 224, 224, 245);

/// Default SD port.
pub const SD_DEFAULT_PORT: u16 = 30490;

/// Transport protocol byte for UDP endpoints.
pub const PROTOCOL_UDP: u8 = 0x11;

/// Transport protocol byte for TCP endpoints.
pub const PROTOCOL_TCP: u8 = 0x06;

/// Instance ID of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstanceId(pub u16);

impl InstanceId {
    /// Wildcard instance ID matching any instance.
    pub const ANY: InstanceId = InstanceId(0xFFFF);

    /// Check if this is the wildcard instance ID.
    pub fn is_any(&self) -> bool {
        self.0 == 0xFFFF
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Eventgroup ID for event subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventgroupId(pub u16);

impl std::fmt::Display for EventgroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// SD entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryType {
    /// Find a service.
    FindService = 0x00,
    /// Offer a service (TTL > 0) or stop offering (TTL = 0).
    OfferService = 0x01,
    /// Subscribe to an eventgroup (TTL > 0) or unsubscribe (TTL = 0).
    SubscribeEventgroup = 0x06,
    /// Acknowledge (TTL > 0) or reject (TTL = 0) a subscription.
    SubscribeEventgroupAck = 0x07,
}

impl EntryType {
    /// Create an EntryType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::FindService),
            0x01 => Some(Self::OfferService),
            0x06 => Some(Self::SubscribeEventgroup),
            0x07 => Some(Self::SubscribeEventgroupAck),
            _ => None,
        }
    }

    /// Check if this is a service entry type.
    pub fn is_service_entry(&self) -> bool {
        matches!(self, Self::FindService | Self::OfferService)
    }

    /// Check if this is an eventgroup entry type.
    pub fn is_eventgroup_entry(&self) -> bool {
        matches!(self, Self::SubscribeEventgroup | Self::SubscribeEventgroupAck)
    }
}

/// SD option types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OptionType {
    /// Configuration string option.
    Configuration = 0x01,
    /// IPv4 endpoint option.
    IPv4Endpoint = 0x04,
    /// IPv4 multicast option.
    IPv4Multicast = 0x14,
    /// IPv4 SD endpoint option.
    IPv4SdEndpoint = 0x24,
}

impl OptionType {
    /// Create an OptionType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Configuration),
            0x04 => Some(Self::IPv4Endpoint),
            0x14 => Some(Self::IPv4Multicast),
            0x24 => Some(Self::IPv4SdEndpoint),
            _ => None,
        }
    }
}

/// Discovered or offered state of a remote service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Service ID.
    pub service_id: u16,
    /// Instance ID.
    pub instance_id: u16,
    /// Major interface version.
    pub major_version: u8,
    /// Minor interface version.
    pub minor_version: u32,
    /// Endpoint address, when known.
    pub ip_address: Ipv4Addr,
    /// Endpoint port.
    pub port: u16,
    /// Endpoint transport protocol byte (0x11 = UDP, 0x06 = TCP).
    pub protocol: u8,
    /// Offer time-to-live in seconds.
    pub ttl_seconds: u32,
}

impl ServiceInstance {
    /// Create a service instance description with no endpoint yet.
    pub fn new(service_id: u16, instance_id: u16, major_version: u8, ttl_seconds: u32) -> Self {
        Self {
            service_id,
            instance_id,
            major_version,
            minor_version: 0,
            ip_address: Ipv4Addr::UNSPECIFIED,
            port: 0,
            protocol: PROTOCOL_UDP,
            ttl_seconds,
        }
    }
}
