//! Protocol demultiplexing: dispatch a buffer to a registered handler by its 16-bit protocol tag.
//!
//! Handlers are registered at runtime (`Device::add_protocol`) rather than compiled into the
//! datalink layer, so new protocols -- or test probes -- can be added without touching
//! [`crate::layer::eth`].

use crate::buffer::PacketBuffer;
use crate::device::Device;

/// Something that can consume a buffer handed to it by the demux step.
///
/// Mirrors the teacher's `FnHandler` pattern: a single wrapper type lets both plain closures and
/// hand-written `struct`s implement the same dispatch trait.
pub trait Recv: Send {
    fn receive(&mut self, dev: &Device, nb: &mut PacketBuffer);
}

/// Adapts any `FnMut(&Device, &mut PacketBuffer) + Send` closure into a [`Recv`].
pub struct FnHandler<F>(pub F);

impl<F> Recv for FnHandler<F>
where
    F: FnMut(&Device, &mut PacketBuffer) + Send,
{
    fn receive(&mut self, dev: &Device, nb: &mut PacketBuffer) {
        (self.0)(dev, nb)
    }
}

/// One registered `{tag, callback}` pair, unique by tag per device.
pub(crate) struct ProtocolHandler {
    pub(crate) tag: u16,
    // `None` for the duration of a `receive` call: taken out of the table so the device's
    // protocol-list lock is not held while the handler itself runs (it may need to touch other
    // device state, e.g. the destination cache, under the same lock).
    recv: Option<Box<dyn Recv>>,
}

impl ProtocolHandler {
    pub(crate) fn new(tag: u16, recv: Box<dyn Recv>) -> Self {
        ProtocolHandler { tag, recv: Some(recv) }
    }

    pub(crate) fn take(&mut self) -> Option<Box<dyn Recv>> {
        self.recv.take()
    }

    pub(crate) fn restore(&mut self, recv: Box<dyn Recv>) {
        self.recv = Some(recv);
    }
}

/// Dispatch `nb` (already carrying its `network` window and `protocol` tag) to the handler
/// registered for that tag on `dev`. Drops the buffer and counts it if no handler matches.
pub fn demux_handle(dev: &Device, nb: &mut PacketBuffer) {
    let protocol = nb.protocol();
    match dev.take_protocol_handler(protocol) {
        Some(mut recv) => {
            recv.receive(dev, nb);
            dev.restore_protocol_handler(protocol, recv);
        }
        None => {
            log::debug!("no protocol handler for tag {:#06x} on {}", protocol, dev.name());
            dev.drop_buffer(nb);
        }
    }
}
