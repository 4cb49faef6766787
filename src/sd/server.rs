//! SOME/IP-SD server: offer services, answer finds, acknowledge
//! subscriptions.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, SomeIpError};
use crate::header::ServiceId;
use crate::message::SomeIpMessage;
use crate::transport::{TransportListener, UdpTransport};

use super::client::SdConfig;
use super::entry::{EventgroupEntry, SdEntry, ServiceEntry};
use super::message::SdMessage;
use super::option::{Ipv4EndpointOption, Ipv4MulticastOption, SdOption};
use super::types::{
    EntryType, InstanceId, ServiceInstance, PROTOCOL_UDP, SD_METHOD_ID, SD_MULTICAST_ADDR,
    SD_SERVICE_ID,
};

struct OfferedService {
    instance: ServiceInstance,
    unicast_endpoint: SocketAddrV4,
    last_offer: Instant,
}

struct SdServerInner {
    config: SdConfig,
    transport: Arc<UdpTransport>,
    running: AtomicBool,
    offered_services: Mutex<Vec<OfferedService>>,
    // Paces the offer timer; notified on shutdown so it exits promptly
    timer_gate: (Mutex<()>, Condvar),
}

/// SOME/IP-SD server.
///
/// Offers are multicast immediately, then repeated by a timer worker whose
/// delay grows from `initial_delay` by `repetition_multiplier` up to
/// `repetition_max`; each service is re-offered once `cyclic_offer` has
/// passed since its previous offer.
pub struct SdServer {
    inner: Arc<SdServerInner>,
    offer_timer: Mutex<Option<JoinHandle<()>>>,
}

impl SdServer {
    /// Create a server. Call `initialize` before use.
    pub fn new(config: SdConfig) -> Self {
        let transport = Arc::new(UdpTransport::new(SocketAddrV4::new(
            config.unicast_address,
            config.unicast_port,
        )));
        Self {
            inner: Arc::new(SdServerInner {
                config,
                transport,
                running: AtomicBool::new(false),
                offered_services: Mutex::new(Vec::new()),
                timer_gate: (Mutex::new(()), Condvar::new()),
            }),
            offer_timer: Mutex::new(None),
        }
    }

    /// Start the transport, join the SD multicast group and spawn the
    /// offer timer. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        if self.inner.running.load(Ordering::Acquire) {
            return Ok(());
        }

        self.inner.transport.start()?;
        let listener_concrete = Arc::clone(&self.inner);
        let listener: Arc<dyn TransportListener> = listener_concrete;
        self.inner.transport.set_listener(&listener);
        // Best-effort: constrained environments may lack multicast
        self.inner.transport.join_multicast_group(SD_MULTICAST_ADDR)?;

        self.inner.running.store(true, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("someip-sd-offer".to_string())
            .spawn(move || inner.offer_timer_loop())?;
        *self.offer_timer.lock().unwrap() = Some(handle);

        Ok(())
    }

    /// Stop offering: send one stop-offer per service, join the timer,
    /// leave the group, stop the transport.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.inner.timer_gate.1.notify_all();
        if let Some(handle) = self.offer_timer.lock().unwrap().take() {
            let _ = handle.join();
        }

        {
            let mut offered = self.inner.offered_services.lock().unwrap();
            for service in offered.iter() {
                if let Err(error) = self.inner.send_stop_offer(service) {
                    warn!(%error, "stop-offer send failed");
                }
            }
            offered.clear();
        }

        let _ = self.inner.transport.leave_multicast_group(SD_MULTICAST_ADDR);
        let _ = self.inner.transport.stop();
    }

    /// Whether the server is initialized.
    pub fn is_ready(&self) -> bool {
        self.inner.running.load(Ordering::Acquire) && self.inner.transport.is_running()
    }

    /// Offer a service instance reachable at `unicast_endpoint`
    /// ("ip:port"), multicasting the offer immediately.
    ///
    /// Returns false if the (service, instance) pair is already offered.
    /// When the `max_services` cap is reached the oldest entry is evicted.
    pub fn offer_service(&self, instance: ServiceInstance, unicast_endpoint: &str) -> Result<bool> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(SomeIpError::NotConnected);
        }

        let endpoint: SocketAddrV4 = unicast_endpoint.parse().map_err(|_| {
            SomeIpError::InvalidEndpoint(format!("expected ip:port, got {unicast_endpoint}"))
        })?;

        let mut offered = self.inner.offered_services.lock().unwrap();
        if offered
            .iter()
            .any(|s| s.instance.service_id == instance.service_id
                && s.instance.instance_id == instance.instance_id)
        {
            return Ok(false);
        }

        if offered.len() >= self.inner.config.max_services && !offered.is_empty() {
            offered.remove(0);
        }

        offered.push(OfferedService {
            instance,
            unicast_endpoint: endpoint,
            last_offer: Instant::now(),
        });

        let service = offered.last().unwrap();
        if let Err(error) = self.inner.send_offer(service, None) {
            warn!(%error, "initial offer send failed");
        }

        Ok(true)
    }

    /// Stop offering a service: multicast a stop-offer (TTL = 0) and drop
    /// the entry. Returns false if it was not offered.
    pub fn stop_offer_service(&self, service_id: u16, instance_id: u16) -> Result<bool> {
        let mut offered = self.inner.offered_services.lock().unwrap();
        let position = offered.iter().position(|s| {
            s.instance.service_id == service_id && s.instance.instance_id == instance_id
        });

        match position {
            Some(index) => {
                let service = offered.remove(index);
                if let Err(error) = self.inner.send_stop_offer(&service) {
                    warn!(%error, "stop-offer send failed");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Update the advertised TTL of an offered service.
    pub fn update_service_ttl(&self, service_id: u16, instance_id: u16, ttl_seconds: u32) -> bool {
        let mut offered = self.inner.offered_services.lock().unwrap();
        match offered.iter_mut().find(|s| {
            s.instance.service_id == service_id && s.instance.instance_id == instance_id
        }) {
            Some(service) => {
                service.instance.ttl_seconds = ttl_seconds;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the currently offered services.
    pub fn get_offered_services(&self) -> Vec<ServiceInstance> {
        self.inner
            .offered_services
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.instance.clone())
            .collect()
    }
}

impl Drop for SdServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SdServerInner {
    fn offer_timer_loop(&self) {
        let mut delay = self.config.initial_delay;

        while self.running.load(Ordering::Acquire) {
            let guard = self.timer_gate.0.lock().unwrap();
            let (_guard, _timeout) = self.timer_gate.1.wait_timeout(guard, delay).unwrap();

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            self.send_periodic_offers();

            if delay < self.config.repetition_max {
                delay = (delay * self.config.repetition_multiplier).min(self.config.repetition_max);
            }
        }
    }

    fn send_periodic_offers(&self) {
        let mut offered = self.offered_services.lock().unwrap();
        let now = Instant::now();
        for service in offered.iter_mut() {
            if now.duration_since(service.last_offer) >= self.config.cyclic_offer {
                if let Err(error) = self.send_offer(service, None) {
                    warn!(%error, "periodic offer send failed");
                }
                service.last_offer = now;
            }
        }
    }

    fn offer_sd_message(&self, service: &OfferedService, ttl: u32, unicast: bool) -> SdMessage {
        let mut entry = ServiceEntry::offer_service(
            ServiceId(service.instance.service_id),
            InstanceId(service.instance.instance_id),
            service.instance.major_version,
            ttl,
        );
        entry.index1 = 0;
        entry.index2 = 0;

        let mut sd_message = SdMessage::new();
        sd_message.flags.unicast = unicast;
        sd_message.add_entry(SdEntry::Service(entry));
        sd_message.add_option(SdOption::Ipv4Endpoint(Ipv4EndpointOption::new(
            *service.unicast_endpoint.ip(),
            PROTOCOL_UDP,
            service.unicast_endpoint.port(),
        )));
        sd_message
    }

    /// Multicast (or, given a target, unicast) an offer for `service`.
    fn send_offer(&self, service: &OfferedService, target: Option<SocketAddr>) -> Result<()> {
        let sd_message =
            self.offer_sd_message(service, service.instance.ttl_seconds, target.is_some());
        let message = sd_message.to_someip_message(SD_METHOD_ID);
        self.transport
            .send_message(&message, target.unwrap_or_else(|| self.multicast_target()))
    }

    fn send_stop_offer(&self, service: &OfferedService) -> Result<()> {
        let mut sd_message = self.offer_sd_message(service, 0, false);
        sd_message.options.clear();
        let message = sd_message.to_someip_message(SD_METHOD_ID);
        self.transport.send_message(&message, self.multicast_target())
    }

    fn multicast_target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            self.config.multicast_address,
            self.config.multicast_port,
        ))
    }

    fn handle_find(&self, find: &ServiceEntry, sender: SocketAddr) {
        let offered = self.offered_services.lock().unwrap();
        let matched = offered.iter().find(|s| {
            s.instance.service_id == find.service_id.0
                && (find.instance_id.is_any() || s.instance.instance_id == find.instance_id.0)
        });

        if let Some(service) = matched {
            if let Err(error) = self.send_offer(service, Some(sender)) {
                warn!(%error, "unicast offer send failed");
            }
        }
    }

    fn handle_subscribe(
        &self,
        subscribe: &EventgroupEntry,
        sd_message: &SdMessage,
        sender: SocketAddr,
    ) {
        // Reply to the endpoint the entry references, falling back to the
        // datagram's sender
        let target = sd_message
            .endpoint_for_entry(&SdEntry::Eventgroup(subscribe.clone()))
            .map(|ep| SocketAddr::V4(SocketAddrV4::new(ep.address, ep.port)))
            .unwrap_or(sender);

        let mut ack = EventgroupEntry::subscribe_ack(
            subscribe.service_id,
            subscribe.instance_id,
            subscribe.major_version,
            subscribe.eventgroup_id,
            3600,
        );
        ack.index1 = 0;

        let mut response = SdMessage::new();
        response.flags.unicast = true;
        response.add_entry(SdEntry::Eventgroup(ack));
        response.add_option(SdOption::Ipv4Multicast(Ipv4MulticastOption::new(
            self.config.multicast_address,
            self.config.multicast_port,
        )));

        let message = response.to_someip_message(SD_METHOD_ID);
        if let Err(error) = self.transport.send_message(&message, target) {
            warn!(%error, "subscribe ack send failed");
        }
    }
}

impl TransportListener for SdServerInner {
    fn on_message_received(&self, message: SomeIpMessage, sender: SocketAddr) {
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

        for entry in &sd_message.entries {
            match entry {
                SdEntry::Service(service_entry)
                    if service_entry.entry_type == EntryType::FindService =>
                {
                    self.handle_find(service_entry, sender);
                }
                SdEntry::Eventgroup(eventgroup_entry)
                    if eventgroup_entry.entry_type == EntryType::SubscribeEventgroup =>
                {
                    self.handle_subscribe(eventgroup_entry, &sd_message, sender);
                }
                _ => {}
            }
        }
    }
}
