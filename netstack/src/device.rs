//! The device (`netdev`): registration, RX backlog, statistics, and the poll loop.
//!
//! One [`std::sync::Mutex`] per device guards its backlog, protocol list, destination cache,
//! statistics, and network-interface record, exactly as the design prescribes a single mutex per
//! device (s5). [`std::sync::Condvar`] paired with that mutex is the "poll event": the driver's
//! RX producer signals it after enqueueing, and the consumer thread running [`Device::poll`]
//! waits on it. The mutex is released before [`Device::poll`] calls into the datalink receive
//! handler -- handler work must never serialize other producers contending for the same device --
//! and [`demux::demux_handle`] applies the same discipline one layer down by taking a protocol
//! handler out of its slot before invoking it.

use std::sync::{Condvar, Mutex};
use std::time::Duration;
use std::fmt;

use crate::address::{EthernetAddress, Ipv4Address};
use crate::buffer::{DeviceId, Layer, Owner, PacketBuffer};
use crate::demux::{ProtocolHandler, Recv};
use crate::destination_cache::DestinationCache;
use crate::socket::{Socket, SocketTable};

/// `rx_max`/`processing_weight` timeout convention: zero means "forever". Wraps a `Duration` so
/// the convention is type-checked at call sites instead of a magic `0` scattered through them.
#[derive(Clone, Copy, Debug)]
pub struct Timeout(Duration);

impl Timeout {
    pub const FOREVER: Timeout = Timeout(Duration::from_millis(0));

    pub fn from_millis(ms: u64) -> Self {
        Timeout(Duration::from_millis(ms))
    }

    /// `None` means "wait with no timeout".
    fn as_option(self) -> Option<Duration> {
        if self.0 == Duration::from_millis(0) {
            None
        } else {
            Some(self.0)
        }
    }
}

/// Errors a driver may report from `write`/`read`. Counted and logged, never fatal to the
/// pipeline (s7): only mutex/event creation failures are fatal, and those happen at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverError {
    Io(String),
    NoSpace,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Io(msg) => write!(f, "driver I/O error: {}", msg),
            DriverError::NoSpace => write!(f, "driver has no space to enqueue"),
        }
    }
}

impl std::error::Error for DriverError {}

/// The external collaborator contract a capture device (or any other backing NIC) must satisfy.
///
/// `read` must enqueue buffers onto `dev`'s backlog itself (via [`Device::add_backlog`]) rather
/// than returning them, matching the source driver contract; it returns how many it enqueued.
pub trait Driver: Send {
    fn write(&mut self, dev: &Device, nb: PacketBuffer) -> Result<(), DriverError>;
    fn read(&mut self, dev: &Device, max: usize) -> Result<usize, DriverError>;
    fn available(&mut self, dev: &Device) -> usize;
}

/// RX/TX byte and packet counters plus the drop counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub dropped: u64,
}

/// The device's network-interface record: local address, mask, gateway.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkInterface {
    pub local_ip: Option<Ipv4Address>,
    pub mask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
}

/// Static device configuration, supplied once at construction.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub name: String,
    pub mtu: u16,
    pub hwaddr: EthernetAddress,
    /// Max buffers drained from the backlog per `poll` call.
    pub rx_max: usize,
    /// Byte budget per `poll` call.
    pub processing_weight: usize,
    pub destination_cache_capacity: usize,
    pub nif: NetworkInterface,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, hwaddr: EthernetAddress) -> Self {
        DeviceConfig {
            name: name.into(),
            mtu: 1500,
            hwaddr,
            rx_max: 32,
            processing_weight: 64 * 1024,
            destination_cache_capacity: crate::destination_cache::DEFAULT_CAPACITY,
            nif: NetworkInterface::default(),
        }
    }
}

struct Inner {
    backlog: std::collections::VecDeque<PacketBuffer>,
    protocols: Vec<ProtocolHandler>,
    destinations: DestinationCache,
    stats: Stats,
    nif: NetworkInterface,
    draining: bool,
}

/// An interface: identity, configuration, backlog, and the locked state the design's single
/// per-device mutex protects.
pub struct Device {
    id: DeviceId,
    name: String,
    mtu: u16,
    hwaddr: EthernetAddress,
    rx_max: usize,
    processing_weight: usize,
    inner: Mutex<Inner>,
    event: Condvar,
    rx: Box<dyn Fn(&Device, &mut PacketBuffer) + Send + Sync>,
    reassembly: crate::layer::ipv4::reassembly::ReassemblyEngine,
    sockets: Mutex<SocketTable>,
}

impl Device {
    /// `init`: zero stats and lists, create the mutex. `rx` is the datalink receive entry point
    /// (typically [`crate::layer::eth::ethernet_input`] closed over whatever network-layer state
    /// it needs to dispatch into).
    pub fn new(
        id: DeviceId,
        config: DeviceConfig,
        rx: impl Fn(&Device, &mut PacketBuffer) + Send + Sync + 'static,
    ) -> Self {
        Device {
            id,
            name: config.name,
            mtu: config.mtu,
            hwaddr: config.hwaddr,
            rx_max: config.rx_max,
            processing_weight: config.processing_weight,
            inner: Mutex::new(Inner {
                backlog: std::collections::VecDeque::new(),
                protocols: Vec::new(),
                destinations: DestinationCache::new(config.destination_cache_capacity),
                stats: Stats::default(),
                nif: config.nif,
                draining: false,
            }),
            event: Condvar::new(),
            rx: Box::new(rx),
            reassembly: crate::layer::ipv4::reassembly::ReassemblyEngine::new(),
            sockets: Mutex::new(SocketTable::new()),
        }
    }

    pub(crate) fn reassembly(&self) -> &crate::layer::ipv4::reassembly::ReassemblyEngine {
        &self.reassembly
    }

    pub fn bind(&self, socket: Socket) {
        self.sockets.lock().unwrap().bind(socket);
    }

    pub fn unbind(&self, addr: Ipv4Address, port: u16) -> bool {
        self.sockets.lock().unwrap().unbind(addr, port)
    }

    pub(crate) fn deliver_socket(&self, addr: Ipv4Address, port: u16, nb: &PacketBuffer) -> bool {
        self.sockets.lock().unwrap().deliver(addr, port, nb)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn hwaddr(&self) -> EthernetAddress {
        self.hwaddr
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().unwrap().stats
    }

    pub fn backlog_len(&self) -> usize {
        self.inner.lock().unwrap().backlog.len()
    }

    pub fn nif(&self) -> NetworkInterface {
        self.inner.lock().unwrap().nif
    }

    pub fn set_nif(&self, nif: NetworkInterface) {
        self.inner.lock().unwrap().nif = nif;
    }

    /// `add_backlog`: atomically append `nb` to the backlog and signal the poll event. Called by
    /// a driver's `read` implementation, and directly by tests exercising backpressure.
    pub fn add_backlog(&self, mut nb: PacketBuffer) {
        nb.transfer_to(Owner::Backlog);
        let mut inner = self.inner.lock().unwrap();
        inner.backlog.push_back(nb);
        self.event.notify_one();
    }

    pub(crate) fn record_drop(&self) {
        self.inner.lock().unwrap().stats.dropped += 1;
    }

    /// Mark `nb` dropped and count it in the same step, so every disposal site counts exactly
    /// once regardless of whether the buffer it touches is the one the poll loop owns (the
    /// common case) or a detached buffer produced along the way (a reassembled datagram).
    pub(crate) fn drop_buffer(&self, nb: &mut PacketBuffer) {
        nb.mark_dropped();
        self.record_drop();
    }

    pub fn find_destination(&self, src: Ipv4Address) -> Option<crate::destination_cache::Entry> {
        self.inner.lock().unwrap().destinations.find(src)
    }

    pub fn add_destination(&self, src: Ipv4Address, hw: EthernetAddress) {
        self.inner.lock().unwrap().destinations.add(src, hw);
    }

    pub fn remove_destination(&self, src: Ipv4Address) -> bool {
        self.inner.lock().unwrap().destinations.remove(src)
    }

    pub fn add_protocol(&self, tag: u16, handler: impl Recv + 'static) {
        let mut inner = self.inner.lock().unwrap();
        inner.protocols.retain(|h| h.tag != tag);
        inner.protocols.push(ProtocolHandler::new(tag, Box::new(handler)));
    }

    pub fn remove_protocol(&self, tag: u16) {
        self.inner.lock().unwrap().protocols.retain(|h| h.tag != tag);
    }

    pub(crate) fn take_protocol_handler(&self, tag: u16) -> Option<Box<dyn Recv>> {
        let mut inner = self.inner.lock().unwrap();
        inner.protocols.iter_mut().find(|h| h.tag == tag).and_then(ProtocolHandler::take)
    }

    pub(crate) fn restore_protocol_handler(&self, tag: u16, recv: Box<dyn Recv>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handler) = inner.protocols.iter_mut().find(|h| h.tag == tag) {
            handler.restore(recv);
        }
    }

    /// Hand `nb` to the driver for transmission, counting its bytes on success.
    pub fn write(&self, driver: &mut dyn Driver, nb: PacketBuffer) -> Result<(), DriverError> {
        let len = nb.window_len(Layer::Datalink);
        driver.write(self, nb)?;
        let mut inner = self.inner.lock().unwrap();
        inner.stats.tx_bytes += len as u64;
        inner.stats.tx_packets += 1;
        Ok(())
    }

    /// The core draining step:
    ///
    /// 1. Ask the driver how many bytes are pending and let it enqueue up to `rx_max` buffers.
    /// 2. While the backlog is non-empty and neither the count nor byte budget is exhausted, pop
    ///    the head, update stats, and invoke the datalink receive handler with the device mutex
    ///    released.
    ///
    /// Returns the number of buffers processed, bounded by `rx_max` and `processing_weight`
    /// (backpressure: excess buffers stay queued for the next call).
    pub fn poll(&self, driver: &mut dyn Driver) -> usize {
        let available = driver.available(self);
        log::trace!("{}: {} bytes available before read", self.name, available);

        if let Err(err) = driver.read(self, self.rx_max) {
            log::warn!("{}: driver read failed: {}", self.name, err);
            self.record_drop();
        }

        let mut processed = 0usize;
        let mut bytes = 0usize;
        while processed < self.rx_max && bytes < self.processing_weight {
            let mut nb = {
                let mut inner = self.inner.lock().unwrap();
                match inner.backlog.pop_front() {
                    Some(nb) => nb,
                    None => break,
                }
            };
            nb.transfer_to(Owner::Handler);
            let frame_len = nb.window_len(Layer::Datalink);

            {
                let mut inner = self.inner.lock().unwrap();
                inner.stats.rx_packets += 1;
                inner.stats.rx_bytes += frame_len as u64;
            }

            // Mutex released across the handler call, per the locking discipline in s5. Every
            // disposal path counts its own drop via `drop_buffer`, so nothing further to do with
            // `nb`'s flags here.
            (self.rx)(self, &mut nb);

            processed += 1;
            bytes += frame_len;
            // `nb` drops here; a handler that needed the bytes past this point already moved a
            // clone into longer-lived storage (a reassembly bucket, a socket delivery) rather
            // than keeping this buffer itself alive.
        }
        processed
    }

    /// Mark the device draining and wake the poll loop so it can observe the flag.
    pub fn destroy(&self) {
        self.inner.lock().unwrap().draining = true;
        self.event.notify_all();
    }

    fn is_draining_and_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.draining && inner.backlog.is_empty()
    }

    /// Run `poll` in a loop, waiting on the poll event between drains, until `destroy` has been
    /// called and the backlog has drained. `timeout` bounds each wait per the "zero means
    /// forever" convention (s5, s6).
    pub fn run(&self, driver: &mut dyn Driver, timeout: Timeout) {
        loop {
            if self.is_draining_and_empty() {
                return;
            }
            self.poll(driver);
            let inner = self.inner.lock().unwrap();
            if inner.draining && inner.backlog.is_empty() {
                return;
            }
            if inner.backlog.is_empty() {
                match timeout.as_option() {
                    Some(d) => { let _ = self.event.wait_timeout(inner, d); }
                    None => { let _ = self.event.wait(inner); }
                }
            }
        }
    }
}
