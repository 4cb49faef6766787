//! SOME/IP-SD (Service Discovery).
//!
//! SD rides on SOME/IP messages with service id 0xFFFF. Servers multicast
//! OfferService entries for the services they host; clients multicast
//! FindService entries and subscribe to eventgroups. Entries reference
//! endpoint options by index into a shared option list.

pub mod client;
pub mod entry;
pub mod message;
pub mod option;
pub mod server;
pub mod types;

pub use client::{
    FindServiceCallback, SdClient, SdConfig, ServiceAvailableCallback, ServiceUnavailableCallback,
};
pub use entry::{EventgroupEntry, SdEntry, ServiceEntry};
pub use message::{SdFlags, SdMessage};
pub use option::{ConfigurationOption, Ipv4EndpointOption, Ipv4MulticastOption, SdOption};
pub use server::SdServer;
pub use types::{
    EntryType, EventgroupId, InstanceId, OptionType, ServiceInstance, SD_DEFAULT_PORT,
    SD_MULTICAST_ADDR, SD_SERVICE_ID,
};
