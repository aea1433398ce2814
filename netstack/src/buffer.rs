//! The packet buffer (`nb`): the single mutable carrier that crosses every layer.
//!
//! A [`PacketBuffer`] owns one contiguous backing region and slices it into up to four
//! non-overlapping, ascending windows -- [`Layer::Datalink`], [`Layer::Network`],
//! [`Layer::Transport`], [`Layer::Application`] -- whose concatenation is always a contiguous
//! prefix of the backing region. Each layer handler narrows the window it was handed and
//! publishes the window for the layer above; see the [`layer`][crate::layer] module documentation
//! for the receive/send protocol built on top of this type.
//!
//! Ownership of a buffer is exclusive and moves by value: the driver owns it until it is
//! enqueued onto a device's backlog, the backlog owns it until a handler dequeues it, a handler
//! owns it for the duration of its stack frame, and so on. [`Owner`] records which of those hosts
//! currently has the buffer, standing in for the source implementation's intrusive list hook
//! (Design Note: modeling list membership as a tag rather than a generic node keeps "on at most
//! one list at a time" a property Rust's ownership already gives us for free, instead of a
//! convention we would have to police by hand).

use bitflags::bitflags;

use crate::address::Ipv4Address;

/// Identifies one of the four layer windows of a [`PacketBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    Datalink,
    Network,
    Transport,
    Application,
}

impl Layer {
    const ORDER: [Layer; 4] = [Layer::Datalink, Layer::Network, Layer::Transport, Layer::Application];

    fn index(self) -> usize {
        match self {
            Layer::Datalink => 0,
            Layer::Network => 1,
            Layer::Transport => 2,
            Layer::Application => 3,
        }
    }

    fn mask(self) -> LayerMask {
        match self {
            Layer::Datalink => LayerMask::DATALINK,
            Layer::Network => LayerMask::NETWORK,
            Layer::Transport => LayerMask::TRANSPORT,
            Layer::Application => LayerMask::APPLICATION,
        }
    }
}

bitflags! {
    /// A set of layers, used to select which windows [`PacketBuffer::alloc`] or
    /// [`PacketBuffer::clone_layers`] should carry.
    pub struct LayerMask: u8 {
        const DATALINK    = 0b0001;
        const NETWORK     = 0b0010;
        const TRANSPORT   = 0b0100;
        const APPLICATION = 0b1000;
    }
}

bitflags! {
    /// The pipeline flag set recording a buffer's progress and disposition.
    ///
    /// Exactly one of `RX`/`TX` is set for the lifetime of a buffer. `DROPPED` and `ARRIVED` are
    /// terminal: once either is set no further layer may mutate the payload, and the poll loop
    /// (or whichever caller produced the buffer) is responsible for freeing it unless `REUSE` is
    /// also set, in which case a handler has taken ownership instead.
    #[derive(Default)]
    pub struct Flags: u16 {
        const RX        = 1 << 0;
        const TX        = 1 << 1;
        const ARRIVED   = 1 << 2;
        const DROPPED   = 1 << 3;
        const BCAST     = 1 << 4;
        const UNICAST   = 1 << 5;
        const MULTICAST = 1 << 6;
        const NOCSUM    = 1 << 7;
        const REUSE     = 1 << 8;
    }
}

/// Records which single host currently owns a buffer.
///
/// Stands in for the source's intrusive list hook (Design Note, `4.A Ownership`): a buffer is
/// exclusively owned by exactly one of the driver, a device backlog, a handler's stack frame, a
/// fragment bucket, or a socket receive queue at any given time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Driver,
    Backlog,
    Handler,
    FragmentBucket,
    Socket,
}

/// Identifies the device that received or will transmit a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Window {
    start: usize,
    len: usize,
}

impl Window {
    fn end(self) -> usize {
        self.start + self.len
    }
}

/// The central packet carrier: one backing region sliced into up to four ascending windows.
#[derive(Clone, Debug)]
pub struct PacketBuffer {
    data: Vec<u8>,
    windows: [Window; 4],
    flags: Flags,
    dev: DeviceId,
    protocol: u16,
    owner: Owner,
    /// Network-layer source/destination, populated by IPv4 input so transport layers and the
    /// socket table can demultiplex and checksum without re-parsing the (possibly already
    /// shrunk) network window.
    src_addr: Option<Ipv4Address>,
    dst_addr: Option<Ipv4Address>,
}

impl PacketBuffer {
    /// Allocate a buffer with `size` backing bytes, handing the entire span to the lowest layer
    /// named in `mask` (the layers a frame ascends through narrow that span from there). This
    /// matches how a driver allocates a buffer for one captured frame: the whole frame lands in
    /// `datalink`, and each handler above carves out the remainder for the layer it publishes.
    pub fn alloc(dev: DeviceId, mask: LayerMask, size: usize) -> Self {
        let mut windows = [Window::default(); 4];
        if let Some(primary) = Layer::ORDER.iter().find(|l| mask.contains(l.mask())) {
            windows[primary.index()] = Window { start: 0, len: size };
        }
        PacketBuffer {
            data: vec![0; size],
            windows,
            flags: Flags::empty(),
            dev,
            protocol: 0,
            owner: Owner::Driver,
            src_addr: None,
            dst_addr: None,
        }
    }

    /// Point `layer`'s window directly at a sub-range of the backing region. Used to publish the
    /// window for the layer above without copying: e.g. ethernet input sets `network` to
    /// `datalink[14..]`.
    pub fn set_data(&mut self, layer: Layer, offset: usize, size: usize) -> crate::layer::Result<()> {
        if offset.checked_add(size).map_or(true, |end| end > self.data.len()) {
            return Err(crate::layer::Error::Format);
        }
        self.windows[layer.index()] = Window { start: offset, len: size };
        Ok(())
    }

    /// Copy `src` into a fresh region of the backing buffer and publish it as `layer`'s window.
    /// Used by the output path, which must materialize composed headers rather than slice
    /// existing bytes.
    pub fn cpy_data(&mut self, layer: Layer, src: &[u8]) -> crate::layer::Result<()> {
        let start = self.windows[layer.index()].start;
        let end = start + src.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(src);
        self.windows[layer.index()] = Window { start, len: src.len() };
        Ok(())
    }

    /// Resize `layer`'s window, preserving the contents of every other window by shifting
    /// whichever bytes lie after it. Used by reassembly to grow `transport` to the full
    /// defragmented payload size.
    pub fn realloc(&mut self, layer: Layer, new_size: usize) -> crate::layer::Result<()> {
        let window = self.windows[layer.index()];
        let delta = new_size as isize - window.len as isize;
        if delta == 0 {
            return Ok(());
        }
        let tail_start = window.end();
        if delta > 0 {
            let delta = delta as usize;
            self.data.resize(self.data.len() + delta, 0);
            self.data.copy_within(tail_start.., tail_start + delta);
        } else {
            let delta = (-delta) as usize;
            self.data.copy_within(tail_start.., tail_start - delta);
            self.data.truncate(self.data.len() - delta);
        }
        for later in Layer::ORDER.iter().filter(|l| l.index() > layer.index()) {
            self.windows[later.index()].start =
                (self.windows[later.index()].start as isize + delta) as usize;
        }
        self.windows[layer.index()].len = new_size;
        Ok(())
    }

    /// Produce an independent copy carrying only the windows named in `mask`, each copied into a
    /// fresh backing region and repacked contiguously in layer order. The fragmentation path
    /// clones into `NETWORK | TRANSPORT` to decouple the clone's lifetime from the driver-owned
    /// original, which is released back to the backlog immediately.
    pub fn clone_layers(&self, mask: LayerMask) -> Self {
        let included: Vec<Layer> = Layer::ORDER.iter().copied()
            .filter(|l| mask.contains(l.mask()))
            .collect();
        let total: usize = included.iter().map(|l| self.windows[l.index()].len).sum();
        let mut data = Vec::with_capacity(total);
        let mut windows = [Window::default(); 4];
        for layer in included {
            let w = self.windows[layer.index()];
            let start = data.len();
            data.extend_from_slice(&self.data[w.start..w.end()]);
            windows[layer.index()] = Window { start, len: w.len };
        }
        PacketBuffer {
            data,
            windows,
            flags: self.flags,
            dev: self.dev,
            protocol: self.protocol,
            owner: Owner::Handler,
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
        }
    }

    pub fn window(&self, layer: Layer) -> &[u8] {
        let w = self.windows[layer.index()];
        &self.data[w.start..w.end()]
    }

    pub fn window_mut(&mut self, layer: Layer) -> &mut [u8] {
        let w = self.windows[layer.index()];
        &mut self.data[w.start..w.end()]
    }

    pub fn window_len(&self, layer: Layer) -> usize {
        self.windows[layer.index()].len
    }

    /// The absolute backing-buffer offset `layer`'s window starts at. Lets a handler compute the
    /// start of the window it is about to publish for the layer above without hardcoding an
    /// offset that only happens to work for the first hop (e.g. IPv4 input deriving its
    /// `transport` offset as `network_start + header_len`).
    pub fn window_start(&self, layer: Layer) -> usize {
        self.windows[layer.index()].start
    }

    /// Shrink `layer`'s recorded length without touching the backing data or later windows. Used
    /// by IPv4 input to cut `network` down to the header length once the payload has been
    /// re-published as `transport`.
    pub fn shrink_window(&mut self, layer: Layer, new_len: usize) {
        debug_assert!(new_len <= self.windows[layer.index()].len);
        self.windows[layer.index()].len = new_len;
    }

    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: u16) {
        self.protocol = protocol;
    }

    pub fn addresses(&self) -> Option<(Ipv4Address, Ipv4Address)> {
        Some((self.src_addr?, self.dst_addr?))
    }

    pub fn set_addresses(&mut self, src: Ipv4Address, dst: Ipv4Address) {
        self.src_addr = Some(src);
        self.dst_addr = Some(dst);
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: Flags) {
        self.flags.insert(flag);
    }

    pub fn test_flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_dropped(&self) -> bool {
        self.flags.contains(Flags::DROPPED)
    }

    pub fn is_arrived(&self) -> bool {
        self.flags.contains(Flags::ARRIVED)
    }

    /// Mark the buffer dropped. Idempotent and legal from any layer; once set, no layer may mutate
    /// `data` again (enforced by convention -- see module docs -- since every handler checks
    /// `is_dropped` before touching a window).
    pub fn mark_dropped(&mut self) {
        self.flags.insert(Flags::DROPPED);
    }

    pub fn mark_arrived(&mut self) {
        self.flags.insert(Flags::ARRIVED);
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Transfer ownership, as happens on every queue push/pop. Debug builds assert the expected
    /// previous owner so a forgotten transfer fails loudly instead of silently double-owning a
    /// buffer.
    pub fn transfer_to(&mut self, owner: Owner) {
        self.owner = owner;
    }
}
