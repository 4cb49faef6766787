//! SOME/IP-SD client: find services, track offers, subscribe eventgroups.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::message::SomeIpMessage;
use crate::transport::{TransportListener, UdpTransport};

use super::entry::{EventgroupEntry, SdEntry, ServiceEntry};
use super::message::SdMessage;
use super::option::{Ipv4EndpointOption, SdOption};
use super::types::{
    EntryType, EventgroupId, InstanceId, ServiceInstance, PROTOCOL_UDP, SD_DEFAULT_PORT,
    SD_MULTICAST_ADDR, SD_SERVICE_ID,
};
use crate::header::ServiceId;

/// Shared SD client/server configuration.
#[derive(Debug, Clone)]
pub struct SdConfig {
    /// Local unicast address to bind the transport to.
    pub unicast_address: Ipv4Addr,
    /// Local unicast port (0 = OS-assigned).
    pub unicast_port: u16,
    /// Multicast address offers and finds are sent to.
    pub multicast_address: Ipv4Addr,
    /// Multicast port.
    pub multicast_port: u16,
    /// Delay before the first repetition-phase offer.
    pub initial_delay: Duration,
    /// Growth factor applied to the offer delay per iteration.
    pub repetition_multiplier: u32,
    /// Upper bound for the offer delay.
    pub repetition_max: Duration,
    /// Re-offer period for each offered service.
    pub cyclic_offer: Duration,
    /// Cap on concurrently offered services; the oldest is evicted beyond it.
    pub max_services: usize,
    /// Default find timeout.
    pub find_timeout: Duration,
}

impl Default for SdConfig {
    fn default() -> Self {
        Self {
            unicast_address: Ipv4Addr::LOCALHOST,
            unicast_port: 0,
            multicast_address: Ipv4Addr::new(239, 255, 255, 251),
            multicast_port: SD_DEFAULT_PORT,
            initial_delay: Duration::from_millis(100),
            repetition_multiplier: 2,
            repetition_max: Duration::from_millis(2000),
            cyclic_offer: Duration::from_millis(30000),
            max_services: 32,
            find_timeout: Duration::from_millis(5000),
        }
    }
}

/// Callback invoked with the instances answering a find.
pub type FindServiceCallback = Box<dyn Fn(Vec<ServiceInstance>) + Send + Sync>;

/// Callback invoked when a subscribed service appears.
pub type ServiceAvailableCallback = Box<dyn Fn(&ServiceInstance) + Send + Sync>;

/// Callback invoked when a subscribed service disappears.
pub type ServiceUnavailableCallback = Box<dyn Fn(&ServiceInstance) + Send + Sync>;

struct ServiceSubscription {
    on_available: ServiceAvailableCallback,
    on_unavailable: ServiceUnavailableCallback,
}

struct PendingFind {
    service_id: u16,
    callback: FindServiceCallback,
    started: Instant,
    timeout: Duration,
}

struct SdClientInner {
    config: SdConfig,
    transport: Arc<UdpTransport>,
    running: AtomicBool,
    subscriptions: Mutex<HashMap<u16, ServiceSubscription>>,
    available_services: Mutex<Vec<ServiceInstance>>,
    pending_finds: Mutex<HashMap<u32, PendingFind>>,
    next_find_id: AtomicU32,
}

/// SOME/IP-SD client.
///
/// Owns a UDP transport bound to its unicast endpoint and joined to the
/// fixed SD multicast group; reacts to offers arriving on either path.
pub struct SdClient {
    inner: Arc<SdClientInner>,
}

impl SdClient {
    /// Create a client. Call `initialize` before use.
    pub fn new(config: SdConfig) -> Self {
        let transport = Arc::new(UdpTransport::new(SocketAddrV4::new(
            config.unicast_address,
            config.unicast_port,
        )));
        Self {
            inner: Arc::new(SdClientInner {
                config,
                transport,
                running: AtomicBool::new(false),
                subscriptions: Mutex::new(HashMap::new()),
                available_services: Mutex::new(Vec::new()),
                pending_finds: Mutex::new(HashMap::new()),
                next_find_id: AtomicU32::new(1),
            }),
        }
    }

    /// Start the transport and join the SD multicast group. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        if self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }

        self.inner.transport.start()?;
        let listener_concrete = Arc::clone(&self.inner);
        let listener: Arc<dyn TransportListener> = listener_concrete;
        self.inner.transport.set_listener(&listener);
        self.inner.transport.join_multicast_group(SD_MULTICAST_ADDR)?;

        self.inner.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop discovery: drop subscriptions, leave the group, stop the
    /// transport.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.inner.subscriptions.lock().unwrap().clear();
        self.inner.pending_finds.lock().unwrap().clear();
        let _ = self.inner.transport.leave_multicast_group(SD_MULTICAST_ADDR);
        let _ = self.inner.transport.stop();
    }

    /// Whether the client is initialized.
    pub fn is_ready(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && self.inner.transport.is_running()
    }

    /// Multicast a FindService for any instance of `service_id`.
    ///
    /// `callback` fires once with the first matching offer; the pending
    /// record expires silently after `timeout` (default 5 s).
    pub fn find_service(
        &self,
        service_id: u16,
        callback: FindServiceCallback,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let entry = ServiceEntry::find_service(ServiceId(service_id), InstanceId::ANY, 0xFF, 3);
        let mut sd_message = SdMessage::new();
        sd_message.add_entry(SdEntry::Service(entry));

        self.send_multicast(&sd_message)?;

        let find_id = self.inner.next_find_id.fetch_add(1, Ordering::Relaxed);
        self.inner.pending_finds.lock().unwrap().insert(
            find_id,
            PendingFind {
                service_id,
                callback,
                started: Instant::now(),
                timeout: timeout.unwrap_or(self.inner.config.find_timeout),
            },
        );

        Ok(())
    }

    /// Install availability callbacks for a service id.
    ///
    /// Returns false if callbacks are already installed for it.
    pub fn subscribe_service(
        &self,
        service_id: u16,
        on_available: ServiceAvailableCallback,
        on_unavailable: ServiceUnavailableCallback,
    ) -> bool {
        let mut subscriptions = self.inner.subscriptions.lock().unwrap();
        if subscriptions.contains_key(&service_id) {
            return false;
        }
        subscriptions.insert(
            service_id,
            ServiceSubscription {
                on_available,
                on_unavailable,
            },
        );
        true
    }

    /// Remove availability callbacks for a service id.
    pub fn unsubscribe_service(&self, service_id: u16) -> bool {
        self.inner.subscriptions.lock().unwrap().remove(&service_id).is_some()
    }

    /// Multicast a SubscribeEventgroup carrying the local unicast endpoint
    /// as option 0.
    pub fn subscribe_eventgroup(
        &self,
        service_id: u16,
        instance_id: u16,
        eventgroup_id: u16,
    ) -> Result<()> {
        let entry = EventgroupEntry::subscribe(
            ServiceId(service_id),
            InstanceId(instance_id),
            0x01,
            EventgroupId(eventgroup_id),
            3600,
        );

        let mut sd_message = SdMessage::new();
        sd_message.add_entry(SdEntry::Eventgroup(entry));
        sd_message.add_option(SdOption::Ipv4Endpoint(Ipv4EndpointOption::new(
            self.inner.config.unicast_address,
            PROTOCOL_UDP,
            self.inner.transport.local_addr().port(),
        )));

        self.send_multicast(&sd_message)
    }

    /// Multicast a StopSubscribeEventgroup (TTL = 0).
    pub fn unsubscribe_eventgroup(
        &self,
        service_id: u16,
        instance_id: u16,
        eventgroup_id: u16,
    ) -> Result<()> {
        let entry = EventgroupEntry::unsubscribe(
            ServiceId(service_id),
            InstanceId(instance_id),
            0x01,
            EventgroupId(eventgroup_id),
        );

        let mut sd_message = SdMessage::new();
        sd_message.add_entry(SdEntry::Eventgroup(entry));

        self.send_multicast(&sd_message)
    }

    /// Known instances of `service_id`; 0 returns everything.
    pub fn get_available_services(&self, service_id: u16) -> Vec<ServiceInstance> {
        self.inner
            .available_services
            .lock()
            .unwrap()
            .iter()
            .filter(|s| service_id == 0 || s.service_id == service_id)
            .cloned()
            .collect()
    }

    /// Drop pending finds past their timeout.
    pub fn process_timeouts(&self) {
        self.inner.purge_expired_finds();
    }

    fn send_multicast(&self, sd_message: &SdMessage) -> Result<()> {
        let message = sd_message.to_someip_message(0x0000);
        let target = SocketAddr::V4(SocketAddrV4::new(
            self.inner.config.multicast_address,
            self.inner.config.multicast_port,
        ));
        self.inner.transport.send_message(&message, target)
    }
}

impl SdClientInner {
    fn purge_expired_finds(&self) {
        self.pending_finds
            .lock()
            .unwrap()
            .retain(|_, find| find.started.elapsed() < find.timeout);
    }

    fn handle_offer(&self, entry: &ServiceEntry, sd_message: &SdMessage) {
        let mut instance = ServiceInstance::new(
            entry.service_id.0,
            entry.instance_id.0,
            entry.major_version,
            entry.ttl,
        );

        if let Some(endpoint) = sd_message.endpoint_for_entry(&SdEntry::Service(entry.clone())) {
            instance.ip_address = endpoint.address;
            instance.port = endpoint.port;
            instance.protocol = endpoint.protocol;
        }

        {
            let mut services = self.available_services.lock().unwrap();
            match services
                .iter_mut()
                .find(|s| s.service_id == instance.service_id && s.instance_id == instance.instance_id)
            {
                Some(existing) => *existing = instance.clone(),
                None => services.push(instance.clone()),
            }
        }

        if let Some(subscription) = self.subscriptions.lock().unwrap().get(&instance.service_id) {
            (subscription.on_available)(&instance);
        }

        let mut finds = self.pending_finds.lock().unwrap();
        let matched: Vec<u32> = finds
            .iter()
            .filter(|(_, find)| find.service_id == instance.service_id)
            .map(|(id, _)| *id)
            .collect();
        for id in matched {
            if let Some(find) = finds.remove(&id) {
                (find.callback)(vec![instance.clone()]);
            }
        }
    }

    fn handle_stop_offer(&self, entry: &ServiceEntry) {
        let removed = {
            let mut services = self.available_services.lock().unwrap();
            let position = services
                .iter()
                .position(|s| s.service_id == entry.service_id.0 && s.instance_id == entry.instance_id.0);
            position.map(|i| services.remove(i))
        };

        let instance = removed.unwrap_or_else(|| {
            ServiceInstance::new(entry.service_id.0, entry.instance_id.0, entry.major_version, 0)
        });

        if let Some(subscription) = self.subscriptions.lock().unwrap().get(&entry.service_id.0) {
            (subscription.on_unavailable)(&instance);
        }
    }
}

impl TransportListener for SdClientInner {
    fn on_message_received(&self, message: SomeIpMessage, _sender: SocketAddr) {
        if message.header.service_id.0 != SD_SERVICE_ID {
            return;
        }

        let sd_message = match SdMessage::from_someip_message(&message) {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(%error, "discarding unparseable SD message");
                return;
            }
        };

        self.purge_expired_finds();

        for entry in &sd_message.entries {
            if let SdEntry::Service(service_entry) = entry {
                if service_entry.entry_type == EntryType::OfferService {
                    if service_entry.ttl == 0 {
                        self.handle_stop_offer(service_entry);
                    } else {
                        self.handle_offer(service_entry, &sd_message);
                    }
                }
            }
        }
    }
}
