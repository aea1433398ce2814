//! The socket table: `(address, port) -> delivery callback`.

use crate::address::Ipv4Address;
use crate::buffer::PacketBuffer;

/// Receives application payloads delivered by the transport layer.
///
/// Boxed so the table can hold a heterogeneous set of sockets (a bound UDP echo responder, a
/// forwarding socket, a test probe, ...) without a generic parameter threading through the whole
/// transport stack.
pub trait Receiver: Send {
    fn receive(&mut self, nb: &PacketBuffer);
}

impl<F: FnMut(&PacketBuffer) + Send> Receiver for F {
    fn receive(&mut self, nb: &PacketBuffer) {
        (self)(nb)
    }
}

/// One bound socket: a local `(address, port)` plus the handler invoked on delivery.
///
/// A zero local address (`Ipv4Address::UNSPECIFIED`) matches any destination address, the
/// conventional "bind to all interfaces" wildcard.
pub struct Socket {
    pub local_addr: Ipv4Address,
    pub local_port: u16,
    pub protocol: u8,
    receiver: Box<dyn Receiver>,
}

impl Socket {
    pub fn new(local_addr: Ipv4Address, local_port: u16, protocol: u8, receiver: impl Receiver + 'static) -> Self {
        Socket { local_addr, local_port, protocol, receiver: Box::new(receiver) }
    }

    fn matches(&self, addr: Ipv4Address, port: u16) -> bool {
        self.local_port == port && (self.local_addr.is_unspecified() || self.local_addr == addr)
    }
}

/// The registry of bound sockets a transport layer demultiplexes into.
#[derive(Default)]
pub struct SocketTable {
    sockets: Vec<Socket>,
}

impl SocketTable {
    pub fn new() -> Self {
        SocketTable { sockets: Vec::new() }
    }

    pub fn bind(&mut self, socket: Socket) {
        self.sockets.push(socket);
    }

    pub fn unbind(&mut self, addr: Ipv4Address, port: u16) -> bool {
        let before = self.sockets.len();
        self.sockets.retain(|s| !s.matches(addr, port));
        self.sockets.len() != before
    }

    /// Find the socket whose local `(address, port)` matches, preferring an exact address match
    /// over a wildcard bind if both are registered.
    pub fn find_mut(&mut self, addr: Ipv4Address, port: u16) -> Option<&mut Socket> {
        let exact = self.sockets.iter().position(|s| s.local_port == port && s.local_addr == addr);
        let wildcard = self.sockets.iter().position(|s| s.matches(addr, port));
        exact.or(wildcard).map(move |idx| &mut self.sockets[idx])
    }

    pub fn deliver(&mut self, addr: Ipv4Address, port: u16, nb: &PacketBuffer) -> bool {
        match self.find_mut(addr, port) {
            Some(socket) => {
                socket.receiver.receive(nb);
                true
            }
            None => false,
        }
    }
}
