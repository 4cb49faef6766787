//! UDP transport for SOME/IP.
//!
//! A bound datagram endpoint with a dedicated receive thread. Inbound
//! datagrams that deserialize into a valid message are queued and handed
//! to the installed listener; everything else is silently discarded.

use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use std::{io, thread};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, warn};

use crate::error::{Result, SomeIpError};
use crate::message::SomeIpMessage;

/// Maximum UDP payload size (65535 - IP header - UDP header).
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Delay between polls when the socket is non-blocking or erroring.
const POLL_DELAY: Duration = Duration::from_millis(10);

/// Callbacks invoked from the receive thread.
pub trait TransportListener: Send + Sync {
    /// A message arrived from `sender`.
    fn on_message_received(&self, message: SomeIpMessage, sender: SocketAddr);

    /// The receive loop hit a non-fatal error.
    fn on_error(&self, _error: &SomeIpError) {}
}

/// UDP transport configuration.
///
/// Defaults follow the SOME/IP recommendations: blocking I/O, 64 KiB
/// socket buffers and a 1400-byte advisory datagram limit that avoids IP
/// fragmentation.
#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// Use blocking I/O on the receive socket.
    pub blocking: bool,
    /// Receive buffer size, also the size of the receive thread's buffer.
    pub receive_buffer_size: usize,
    /// Send buffer size.
    pub send_buffer_size: usize,
    /// Set SO_REUSEADDR before binding.
    pub reuse_address: bool,
    /// Set SO_REUSEPORT before binding (multicast port sharing).
    pub reuse_port: bool,
    /// Allow broadcast sends.
    pub enable_broadcast: bool,
    /// Outbound interface for multicast, if pinned.
    pub multicast_interface: Option<Ipv4Addr>,
    /// Multicast TTL (1 = local network only).
    pub multicast_ttl: u32,
    /// Advisory maximum datagram size; 0 disables the check.
    pub max_message_size: usize,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            receive_buffer_size: 65536,
            send_buffer_size: 65536,
            reuse_address: true,
            reuse_port: false,
            enable_broadcast: false,
            multicast_interface: None,
            multicast_ttl: 1,
            max_message_size: 1400,
        }
    }
}

/// A UDP transport bound to a local endpoint.
///
/// All methods take `&self`; the transport is designed to be shared as
/// `Arc<UdpTransport>` between senders, the SD layer and the receive
/// thread it owns.
pub struct UdpTransport {
    config: UdpTransportConfig,
    local_addr: Mutex<SocketAddr>,
    socket: Mutex<Option<UdpSocket>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Arc<Mutex<Option<Weak<dyn TransportListener>>>>,
    receive_queue: Arc<Mutex<VecDeque<SomeIpMessage>>>,
}

impl UdpTransport {
    /// Create a transport for `local_addr` with the default configuration.
    pub fn new(local_addr: SocketAddrV4) -> Self {
        Self::with_config(local_addr, UdpTransportConfig::default())
    }

    /// Create a transport for `local_addr` with a custom configuration.
    pub fn with_config(local_addr: SocketAddrV4, config: UdpTransportConfig) -> Self {
        Self {
            config,
            local_addr: Mutex::new(SocketAddr::V4(local_addr)),
            socket: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            listener: Arc::new(Mutex::new(None)),
            receive_queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Install the listener invoked from the receive thread.
    ///
    /// Held weakly so an SD client or server that owns this transport can
    /// be its listener without a reference cycle.
    pub fn set_listener(&self, listener: &Arc<dyn TransportListener>) {
        *self.listener.lock().unwrap() = Some(Arc::downgrade(listener));
    }

    /// The bound local address. After `start` this reflects the port the
    /// OS assigned when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        *self.local_addr.lock().unwrap()
    }

    /// Whether the transport is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Bind the socket and spawn the receive worker. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let socket = self.create_socket()?;
        let bind_addr = self.local_addr();
        socket.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket.into();
        *self.local_addr.lock().unwrap() = socket.local_addr()?;

        let worker_socket = socket.try_clone()?;
        *self.socket.lock().unwrap() = Some(socket);

        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let listener = Arc::clone(&self.listener);
        let queue = Arc::clone(&self.receive_queue);
        let buffer_size = self.config.receive_buffer_size;
        let blocking = self.config.blocking;

        let handle = thread::Builder::new()
            .name("someip-udp-rx".to_string())
            .spawn(move || {
                receive_loop(worker_socket, running, listener, queue, buffer_size, blocking)
            })?;
        *self.worker.lock().unwrap() = Some(handle);

        Ok(())
    }

    fn create_socket(&self) -> Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        if self.config.reuse_address {
            socket.set_reuse_address(true)?;
        }
        #[cfg(unix)]
        if self.config.reuse_port {
            if let Err(error) = socket.set_reuse_port(true) {
                debug!(%error, "SO_REUSEPORT not available");
            }
        }
        if self.config.enable_broadcast {
            socket.set_broadcast(true)?;
        }

        // Buffer sizes are best-effort; restricted environments may cap them
        if let Err(error) = socket.set_recv_buffer_size(self.config.receive_buffer_size) {
            debug!(%error, "could not set receive buffer size");
        }
        if let Err(error) = socket.set_send_buffer_size(self.config.send_buffer_size) {
            debug!(%error, "could not set send buffer size");
        }

        if !self.config.blocking {
            socket.set_nonblocking(true)?;
        }

        Ok(socket)
    }

    /// Serialize and send a message to `target`.
    ///
    /// Oversized datagrams beyond the UDP limit fail; datagrams beyond the
    /// advisory `max_message_size` are logged and sent anyway (large
    /// payloads belong in TP segments).
    pub fn send_message(&self, message: &SomeIpMessage, target: SocketAddr) -> Result<()> {
        let data = message.to_bytes();

        if data.len() > MAX_UDP_PAYLOAD {
            return Err(SomeIpError::BufferOverflow {
                size: data.len(),
                max: MAX_UDP_PAYLOAD,
            });
        }
        if self.config.max_message_size > 0 && data.len() > self.config.max_message_size {
            warn!(
                size = data.len(),
                max = self.config.max_message_size,
                "datagram exceeds recommended size, consider TP segmentation"
            );
        }

        let socket = self.socket.lock().unwrap();
        let socket = socket.as_ref().ok_or(SomeIpError::NotConnected)?;
        let sent = socket.send_to(&data, target)?;
        if sent != data.len() {
            return Err(SomeIpError::BufferOverflow {
                size: data.len(),
                max: sent,
            });
        }

        Ok(())
    }

    /// Pop the oldest queued message, if any.
    pub fn receive_message(&self) -> Option<SomeIpMessage> {
        self.receive_queue.lock().unwrap().pop_front()
    }

    /// Join a multicast group in 224.0.0.0–239.255.255.255.
    ///
    /// Membership failures are tolerated (containerized environments often
    /// lack multicast); loopback, TTL and interface are set best-effort.
    pub fn join_multicast_group(&self, group: Ipv4Addr) -> Result<()> {
        if !group.is_multicast() {
            return Err(SomeIpError::InvalidEndpoint(format!(
                "{group} is not a multicast address"
            )));
        }

        let socket = self.socket.lock().unwrap();
        let socket = socket.as_ref().ok_or(SomeIpError::NotConnected)?;

        let interface = self.config.multicast_interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if let Err(error) = socket.join_multicast_v4(&group, &interface) {
            warn!(%group, %error, "multicast join failed, continuing unicast-only");
            return Ok(());
        }

        if let Err(error) = socket.set_multicast_loop_v4(true) {
            debug!(%error, "could not enable multicast loopback");
        }
        if let Err(error) = socket.set_multicast_ttl_v4(self.config.multicast_ttl) {
            debug!(%error, "could not set multicast TTL");
        }
        if let Some(interface) = self.config.multicast_interface {
            if let Err(error) = SockRef::from(socket).set_multicast_if_v4(&interface) {
                debug!(%error, "could not pin multicast interface");
            }
        }

        Ok(())
    }

    /// Leave a multicast group.
    pub fn leave_multicast_group(&self, group: Ipv4Addr) -> Result<()> {
        if !group.is_multicast() {
            return Err(SomeIpError::InvalidEndpoint(format!(
                "{group} is not a multicast address"
            )));
        }

        let socket = self.socket.lock().unwrap();
        let socket = socket.as_ref().ok_or(SomeIpError::NotConnected)?;

        let interface = self.config.multicast_interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket
            .leave_multicast_v4(&group, &interface)
            .map_err(|e| SomeIpError::NetworkError(format!("multicast leave failed: {e}")))
    }

    /// Stop the receive worker and close the socket. Idempotent.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        // A blocked recv_from has nothing to wake it once the flag drops;
        // poke the socket with an empty datagram to itself.
        self.wake_worker();

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.socket.lock().unwrap() = None;

        Ok(())
    }

    fn wake_worker(&self) {
        let local = self.local_addr();
        let target = match local {
            SocketAddr::V4(addr) if addr.ip().is_unspecified() => {
                SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, addr.port()))
            }
            other => other,
        };
        if let Ok(waker) = UdpSocket::bind("127.0.0.1:0") {
            let _ = waker.send_to(&[], target);
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    listener: Arc<Mutex<Option<Weak<dyn TransportListener>>>>,
    queue: Arc<Mutex<VecDeque<SomeIpMessage>>>,
    buffer_size: usize,
    blocking: bool,
) {
    let notify = |f: &dyn Fn(&dyn TransportListener)| {
        let listener = listener.lock().unwrap().clone();
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            f(listener.as_ref());
        }
    };

    let mut buffer = vec![0u8; buffer_size];
    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buffer) {
            Ok((len, sender)) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                // Malformed datagrams are dropped without ceremony
                if let Ok(message) = SomeIpMessage::from_bytes(&buffer[..len]) {
                    queue.lock().unwrap().push_back(message.clone());
                    notify(&|l| l.on_message_received(message.clone(), sender));
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                thread::sleep(POLL_DELAY);
            }
            Err(e) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                debug!(error = %e, "receive error");
                notify(&|l| l.on_error(&SomeIpError::NetworkError(e.to_string())));
                if !blocking {
                    thread::sleep(POLL_DELAY);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ClientId, MethodId, ServiceId, SessionId};
    use crate::message::SomeIpMessage;
    use std::time::Instant;

    fn loopback() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    struct Collector {
        received: Mutex<Vec<(SomeIpMessage, SocketAddr)>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransportListener for Collector {
        fn on_message_received(&self, message: SomeIpMessage, sender: SocketAddr) {
            self.received.lock().unwrap().push((message, sender));
        }
    }

    fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_start_assigns_port() {
        let transport = UdpTransport::new(loopback());
        transport.start().unwrap();
        assert!(transport.is_running());
        assert_ne!(transport.local_addr().port(), 0);
        transport.stop().unwrap();
        assert!(!transport.is_running());
    }

    #[test]
    fn test_receive_loopback() {
        let receiver = UdpTransport::new(loopback());
        receiver.start().unwrap();
        let collector = Collector::new();
        let listener: Arc<dyn TransportListener> = collector.clone();
        receiver.set_listener(&listener);

        let sender = UdpTransport::new(loopback());
        sender.start().unwrap();
        let sender_addr = sender.local_addr();

        let message = SomeIpMessage::request(ServiceId(0x1234), MethodId(0x5678))
            .client_id(ClientId(0x9ABC))
            .session_id(SessionId(0xDEF0))
            .payload_vec(vec![0x01, 0x02, 0x03, 0x04])
            .build();

        sender.send_message(&message, receiver.local_addr()).unwrap();

        assert!(wait_for(
            || !collector.received.lock().unwrap().is_empty(),
            Duration::from_secs(1)
        ));

        let received = collector.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, message);
        assert_eq!(received[0].1, sender_addr);

        // The message is also queued for polling receivers
        assert_eq!(receiver.receive_message(), Some(message));
        assert_eq!(receiver.receive_message(), None);

        sender.stop().unwrap();
        receiver.stop().unwrap();
    }

    #[test]
    fn test_malformed_datagram_discarded() {
        let receiver = UdpTransport::new(loopback());
        receiver.start().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(&[0xFF; 7], receiver.local_addr()).unwrap();

        // Give the worker a moment, then confirm nothing was queued
        thread::sleep(Duration::from_millis(50));
        assert_eq!(receiver.receive_message(), None);
        receiver.stop().unwrap();
    }

    #[test]
    fn test_send_requires_start() {
        let transport = UdpTransport::new(loopback());
        let message = SomeIpMessage::request(ServiceId(1), MethodId(1)).build();
        let target: SocketAddr = "127.0.0.1:30490".parse().unwrap();
        assert!(matches!(
            transport.send_message(&message, target),
            Err(SomeIpError::NotConnected)
        ));
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let transport = UdpTransport::new(loopback());
        transport.start().unwrap();

        let message = SomeIpMessage::request(ServiceId(1), MethodId(1))
            .payload_vec(vec![0u8; MAX_UDP_PAYLOAD])
            .build();
        let target = transport.local_addr();
        assert!(matches!(
            transport.send_message(&message, target),
            Err(SomeIpError::BufferOverflow { .. })
        ));
        transport.stop().unwrap();
    }

    #[test]
    fn test_multicast_range_validation() {
        let transport = UdpTransport::new(loopback());
        transport.start().unwrap();

        assert!(matches!(
            transport.join_multicast_group(Ipv4Addr::new(192, 168, 1, 1)),
            Err(SomeIpError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            transport.leave_multicast_group(Ipv4Addr::new(8, 8, 8, 8)),
            Err(SomeIpError::InvalidEndpoint(_))
        ));

        // In-range joins are tolerated even where multicast is unavailable
        transport
            .join_multicast_group(Ipv4Addr::new(239, 255, 255, 250))
            .unwrap();
        transport.stop().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let transport = UdpTransport::new(loopback());
        transport.start().unwrap();
        transport.stop().unwrap();
        transport.stop().unwrap();
    }

    #[test]
    fn test_nonblocking_mode_receives() {
        let config = UdpTransportConfig {
            blocking: false,
            ..UdpTransportConfig::default()
        };
        let receiver = UdpTransport::with_config(loopback(), config);
        receiver.start().unwrap();

        let sender = UdpTransport::new(loopback());
        sender.start().unwrap();

        let message = SomeIpMessage::notification(ServiceId(0x2222), MethodId(0x8001))
            .payload_vec(vec![9, 9, 9])
            .build();
        sender.send_message(&message, receiver.local_addr()).unwrap();

        assert!(wait_for(
            || receiver.receive_queue.lock().unwrap().len() == 1,
            Duration::from_secs(1)
        ));
        assert_eq!(receiver.receive_message(), Some(message));

        sender.stop().unwrap();
        receiver.stop().unwrap();
    }
}
