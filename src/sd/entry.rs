//! SOME/IP-SD entry types.
//!
//! Wire layout shared by all entries: `type (u8), index1 (u8), index2 (u8),
//! numOpts1 (u8), numOpts2 (u8)`, then `service_id (u16), instance_id (u16),
//! major_version (u8), ttl (u32)`. Eventgroup entries append a 2-byte
//! eventgroup id. The option-count bytes are always written as zero;
//! receivers derive option runs from `index1` alone.

use crate::error::{Result, SomeIpError};
use crate::header::ServiceId;

use super::types::{EntryType, EventgroupId, InstanceId};

/// Service entry wire size (5-byte common prefix + 9 bytes).
pub const SERVICE_ENTRY_SIZE: usize = 14;

/// Eventgroup entry wire size (5-byte common prefix + 11 bytes).
pub const EVENTGROUP_ENTRY_SIZE: usize = 16;

/// A service entry (FindService or OfferService).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Entry type (FindService or OfferService).
    pub entry_type: EntryType,
    /// Index of the first option run.
    pub index1: u8,
    /// Index of the second option run.
    pub index2: u8,
    /// Service ID.
    pub service_id: ServiceId,
    /// Instance ID.
    pub instance_id: InstanceId,
    /// Major version.
    pub major_version: u8,
    /// Time-to-live in seconds (0 = stop offer).
    pub ttl: u32,
    /// Minor version. Held in memory; the encoder does not put it on the
    /// wire.
    pub minor_version: u32,
}

impl ServiceEntry {
    /// Create a FindService entry.
    pub fn find_service(service_id: ServiceId, instance_id: InstanceId, major_version: u8, ttl: u32) -> Self {
        Self {
            entry_type: EntryType::FindService,
            index1: 0,
            index2: 0,
            service_id,
            instance_id,
            major_version,
            ttl,
            minor_version: 0,
        }
    }

    /// Create an OfferService entry.
    pub fn offer_service(service_id: ServiceId, instance_id: InstanceId, major_version: u8, ttl: u32) -> Self {
        Self {
            entry_type: EntryType::OfferService,
            ..Self::find_service(service_id, instance_id, major_version, ttl)
        }
    }

    /// Create a StopOfferService entry (OfferService with TTL = 0).
    pub fn stop_offer_service(service_id: ServiceId, instance_id: InstanceId, major_version: u8) -> Self {
        Self::offer_service(service_id, instance_id, major_version, 0)
    }

    /// Check if this is a stop offer (TTL = 0).
    pub fn is_stop_offer(&self) -> bool {
        self.entry_type == EntryType::OfferService && self.ttl == 0
    }

    /// Serialize the entry to its wire form.
    pub fn to_bytes(&self) -> [u8; SERVICE_ENTRY_SIZE] {
        let mut buf = [0u8; SERVICE_ENTRY_SIZE];
        buf[0] = self.entry_type as u8;
        buf[1] = self.index1;
        buf[2] = self.index2;
        // buf[3], buf[4]: option counts, always zero
        buf[5..7].copy_from_slice(&self.service_id.0.to_be_bytes());
        buf[7..9].copy_from_slice(&self.instance_id.0.to_be_bytes());
        buf[9] = self.major_version;
        buf[10..14].copy_from_slice(&self.ttl.to_be_bytes());
        buf
    }

    /// Parse a service entry from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SERVICE_ENTRY_SIZE {
            return Err(SomeIpError::malformed(format!(
                "service entry needs {SERVICE_ENTRY_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let entry_type = EntryType::from_u8(data[0])
            .filter(EntryType::is_service_entry)
            .ok_or_else(|| {
                SomeIpError::malformed(format!("not a service entry type: 0x{:02X}", data[0]))
            })?;

        Ok(Self {
            entry_type,
            index1: data[1],
            index2: data[2],
            service_id: ServiceId(u16::from_be_bytes([data[5], data[6]])),
            instance_id: InstanceId(u16::from_be_bytes([data[7], data[8]])),
            major_version: data[9],
            ttl: u32::from_be_bytes([data[10], data[11], data[12], data[13]]),
            minor_version: 0,
        })
    }
}

/// An eventgroup entry (Subscribe or SubscribeAck).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventgroupEntry {
    /// Entry type (SubscribeEventgroup or SubscribeEventgroupAck).
    pub entry_type: EntryType,
    /// Index of the first option run.
    pub index1: u8,
    /// Index of the second option run.
    pub index2: u8,
    /// Service ID.
    pub service_id: ServiceId,
    /// Instance ID.
    pub instance_id: InstanceId,
    /// Major version.
    pub major_version: u8,
    /// Time-to-live in seconds (0 = unsubscribe / nack).
    pub ttl: u32,
    /// Eventgroup ID.
    pub eventgroup_id: EventgroupId,
}

impl EventgroupEntry {
    /// Create a SubscribeEventgroup entry.
    pub fn subscribe(
        service_id: ServiceId,
        instance_id: InstanceId,
        major_version: u8,
        eventgroup_id: EventgroupId,
        ttl: u32,
    ) -> Self {
        Self {
            entry_type: EntryType::SubscribeEventgroup,
            index1: 0,
            index2: 0,
            service_id,
            instance_id,
            major_version,
            ttl,
            eventgroup_id,
        }
    }

    /// Create an unsubscribe entry (Subscribe with TTL = 0).
    pub fn unsubscribe(
        service_id: ServiceId,
        instance_id: InstanceId,
        major_version: u8,
        eventgroup_id: EventgroupId,
    ) -> Self {
        Self::subscribe(service_id, instance_id, major_version, eventgroup_id, 0)
    }

    /// Create a SubscribeEventgroupAck entry.
    pub fn subscribe_ack(
        service_id: ServiceId,
        instance_id: InstanceId,
        major_version: u8,
        eventgroup_id: EventgroupId,
        ttl: u32,
    ) -> Self {
        Self {
            entry_type: EntryType::SubscribeEventgroupAck,
            ..Self::subscribe(service_id, instance_id, major_version, eventgroup_id, ttl)
        }
    }

    /// Check if this is an unsubscribe or nack (TTL = 0).
    pub fn is_negative(&self) -> bool {
        self.ttl == 0
    }

    /// Serialize the entry to its wire form.
    pub fn to_bytes(&self) -> [u8; EVENTGROUP_ENTRY_SIZE] {
        let mut buf = [0u8; EVENTGROUP_ENTRY_SIZE];
        buf[0] = self.entry_type as u8;
        buf[1] = self.index1;
        buf[2] = self.index2;
        // buf[3], buf[4]: option counts, always zero
        buf[5..7].copy_from_slice(&self.service_id.0.to_be_bytes());
        buf[7..9].copy_from_slice(&self.instance_id.0.to_be_bytes());
        buf[9] = self.major_version;
        buf[10..14].copy_from_slice(&self.ttl.to_be_bytes());
        buf[14..16].copy_from_slice(&self.eventgroup_id.0.to_be_bytes());
        buf
    }

    /// Parse an eventgroup entry from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < EVENTGROUP_ENTRY_SIZE {
            return Err(SomeIpError::malformed(format!(
                "eventgroup entry needs {EVENTGROUP_ENTRY_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let entry_type = EntryType::from_u8(data[0])
            .filter(EntryType::is_eventgroup_entry)
            .ok_or_else(|| {
                SomeIpError::malformed(format!("not an eventgroup entry type: 0x{:02X}", data[0]))
            })?;

        Ok(Self {
            entry_type,
            index1: data[1],
            index2: data[2],
            service_id: ServiceId(u16::from_be_bytes([data[5], data[6]])),
            instance_id: InstanceId(u16::from_be_bytes([data[7], data[8]])),
            major_version: data[9],
            ttl: u32::from_be_bytes([data[10], data[11], data[12], data[13]]),
            eventgroup_id: EventgroupId(u16::from_be_bytes([data[14], data[15]])),
        })
    }
}

/// An SD entry (either Service or Eventgroup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdEntry {
    /// Service entry (Find/Offer).
    Service(ServiceEntry),
    /// Eventgroup entry (Subscribe/Ack).
    Eventgroup(EventgroupEntry),
}

impl SdEntry {
    /// Parse an entry from bytes, returning it and its wire size.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        let first = *data.first().ok_or_else(|| SomeIpError::malformed("empty entry"))?;

        match EntryType::from_u8(first) {
            Some(t) if t.is_service_entry() => {
                Ok((SdEntry::Service(ServiceEntry::from_bytes(data)?), SERVICE_ENTRY_SIZE))
            }
            Some(t) if t.is_eventgroup_entry() => Ok((
                SdEntry::Eventgroup(EventgroupEntry::from_bytes(data)?),
                EVENTGROUP_ENTRY_SIZE,
            )),
            _ => Err(SomeIpError::malformed(format!(
                "unknown entry type: 0x{first:02X}"
            ))),
        }
    }

    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SdEntry::Service(e) => e.to_bytes().to_vec(),
            SdEntry::Eventgroup(e) => e.to_bytes().to_vec(),
        }
    }

    /// Wire size of this entry.
    pub fn wire_size(&self) -> usize {
        match self {
            SdEntry::Service(_) => SERVICE_ENTRY_SIZE,
            SdEntry::Eventgroup(_) => EVENTGROUP_ENTRY_SIZE,
        }
    }

    /// Get the service ID from this entry.
    pub fn service_id(&self) -> ServiceId {
        match self {
            SdEntry::Service(e) => e.service_id,
            SdEntry::Eventgroup(e) => e.service_id,
        }
    }

    /// Get the instance ID from this entry.
    pub fn instance_id(&self) -> InstanceId {
        match self {
            SdEntry::Service(e) => e.instance_id,
            SdEntry::Eventgroup(e) => e.instance_id,
        }
    }

    /// Get the TTL from this entry.
    pub fn ttl(&self) -> u32 {
        match self {
            SdEntry::Service(e) => e.ttl,
            SdEntry::Eventgroup(e) => e.ttl,
        }
    }

    /// First option index and run length for this entry. The encoder never
    /// fills the option-count bytes, so the run is derived from `index1`
    /// alone: a run of one when it is non-zero.
    pub fn option_run(&self) -> (usize, usize) {
        let index1 = match self {
            SdEntry::Service(e) => e.index1,
            SdEntry::Eventgroup(e) => e.index1,
        };
        (index1 as usize, usize::from(index1 != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_entry_roundtrip() {
        let mut entry = ServiceEntry::offer_service(ServiceId(0x1234), InstanceId(0x0001), 1, 3600);
        entry.index1 = 2;

        let bytes = entry.to_bytes();
        let parsed = ServiceEntry::from_bytes(&bytes).unwrap();

        assert_eq!(entry, parsed);
    }

    #[test]
    fn test_service_entry_layout() {
        let entry = ServiceEntry::offer_service(ServiceId(0x1234), InstanceId(0x5678), 0x02, 0x0000_0E10);
        let bytes = entry.to_bytes();

        assert_eq!(bytes[0], 0x01); // OfferService
        assert_eq!(&bytes[1..5], &[0, 0, 0, 0]); // indices and zeroed option counts
        assert_eq!(&bytes[5..7], &[0x12, 0x34]);
        assert_eq!(&bytes[7..9], &[0x56, 0x78]);
        assert_eq!(bytes[9], 0x02);
        assert_eq!(&bytes[10..14], &[0x00, 0x00, 0x0E, 0x10]);
    }

    #[test]
    fn test_find_service_entry() {
        let entry = ServiceEntry::find_service(ServiceId(0x1234), InstanceId::ANY, 0xFF, 3);
        assert_eq!(entry.entry_type, EntryType::FindService);
        assert!(entry.instance_id.is_any());
        assert_eq!(entry.ttl, 3);
    }

    #[test]
    fn test_stop_offer() {
        let entry = ServiceEntry::stop_offer_service(ServiceId(0x1234), InstanceId(0x0001), 1);
        assert!(entry.is_stop_offer());
    }

    #[test]
    fn test_eventgroup_entry_roundtrip() {
        let mut entry = EventgroupEntry::subscribe(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0005),
            3600,
        );
        entry.index1 = 1;

        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), EVENTGROUP_ENTRY_SIZE);
        assert_eq!(&bytes[14..16], &[0x00, 0x05]);

        let parsed = EventgroupEntry::from_bytes(&bytes).unwrap();
        assert_eq!(entry, parsed);
    }

    #[test]
    fn test_unsubscribe_and_ack() {
        let unsub = EventgroupEntry::unsubscribe(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0001),
        );
        assert!(unsub.is_negative());

        let ack = EventgroupEntry::subscribe_ack(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0001),
            3600,
        );
        assert_eq!(ack.entry_type, EntryType::SubscribeEventgroupAck);
        assert!(!ack.is_negative());
    }

    #[test]
    fn test_sd_entry_dispatch() {
        let service = ServiceEntry::offer_service(ServiceId(0x1234), InstanceId(0x0001), 1, 3600);
        let (entry, size) = SdEntry::from_bytes(&service.to_bytes()).unwrap();
        assert!(matches!(entry, SdEntry::Service(_)));
        assert_eq!(size, SERVICE_ENTRY_SIZE);

        let eventgroup = EventgroupEntry::subscribe(
            ServiceId(0x1234),
            InstanceId(0x0001),
            1,
            EventgroupId(0x0001),
            3600,
        );
        let (entry, size) = SdEntry::from_bytes(&eventgroup.to_bytes()).unwrap();
        assert!(matches!(entry, SdEntry::Eventgroup(_)));
        assert_eq!(size, EVENTGROUP_ENTRY_SIZE);

        assert!(SdEntry::from_bytes(&[0x04, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_option_run_derivation() {
        let mut entry = ServiceEntry::offer_service(ServiceId(1), InstanceId(1), 1, 10);
        assert_eq!(SdEntry::Service(entry.clone()).option_run(), (0, 0));
        entry.index1 = 3;
        assert_eq!(SdEntry::Service(entry).option_run(), (3, 1));
    }
}
