//! UDP: header parse/compose and the `transport -> application` handoff into the socket table.

use crate::address::Ipv4Address;
use crate::buffer::{Flags, Layer, PacketBuffer};
use crate::device::Device;
use crate::layer::{Error, Result};

pub const HEADER_LEN: usize = 8;

/// IANA protocol number for UDP, used both as the IPv4 `protocol` field and the demux tag
/// [`crate::layer::ipv4::dispatch`] hands off with.
pub const PROTOCOL: u8 = 17;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Format);
        }
        Ok(UdpHeader {
            src_port: u16::from_be_bytes([raw[0], raw[1]]),
            dst_port: u16::from_be_bytes([raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            checksum: u16::from_be_bytes([raw[6], raw[7]]),
        })
    }

    pub fn compose(&self, raw: &mut [u8]) {
        raw[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw[4..6].copy_from_slice(&self.length.to_be_bytes());
        raw[6..8].copy_from_slice(&self.checksum.to_be_bytes());
    }
}

/// Registered on a device as the protocol-17 handler (see [`crate::demux`]): parse the UDP
/// header, verify its checksum, publish the `application` window, and deliver into `sockets`.
///
/// A missing bind is a per-packet `PortUnreachable`, not a stack error: the buffer is dropped and
/// counted, matching the design's "resolves as a buffer disposition" rule for every per-packet
/// error kind.
pub fn udp_input(dev: &Device, nb: &mut PacketBuffer) {
    let (saddr, daddr) = match nb.addresses() {
        Some(addrs) => addrs,
        None => {
            dev.drop_buffer(nb);
            return;
        }
    };

    let header = match UdpHeader::parse(nb.window(Layer::Transport)) {
        Ok(header) => header,
        Err(_) => {
            log::debug!("{}: malformed udp header", dev.name());
            dev.drop_buffer(nb);
            return;
        }
    };

    let segment_len = header.length as usize;
    if segment_len < HEADER_LEN || segment_len > nb.window_len(Layer::Transport) {
        dev.drop_buffer(nb);
        return;
    }

    if header.checksum != 0 && !nb.test_flag(Flags::NOCSUM) {
        let segment = &nb.window(Layer::Transport)[..segment_len];
        let csum = crate::checksum::pseudo_header_checksum(saddr.octets(), daddr.octets(), PROTOCOL, segment);
        if csum != 0 {
            log::debug!("{}: bad udp checksum", dev.name());
            dev.drop_buffer(nb);
            return;
        }
    }

    let transport_start = nb.window_start(Layer::Transport);
    nb.shrink_window(Layer::Transport, HEADER_LEN);
    if nb.set_data(Layer::Application, transport_start + HEADER_LEN, segment_len - HEADER_LEN).is_err() {
        dev.drop_buffer(nb);
        return;
    }

    if !dev.deliver_socket(daddr, header.dst_port, nb) {
        log::trace!("{}: port {} unreachable", dev.name(), header.dst_port);
        dev.drop_buffer(nb);
        return;
    }
    nb.mark_arrived();
}

/// Compose a UDP datagram around `payload` (already published as `nb`'s `transport` window by
/// the caller is not required here: `udp_output` itself takes ownership of laying out the
/// segment) and hand it down to [`crate::layer::ipv4::ipv4_output`].
///
/// The reference implementation this stack is modeled on left `udp_output` unimplemented; this
/// is a from-scratch completion rather than a port.
pub fn udp_output(
    dev: &Device,
    driver: &mut dyn crate::device::Driver,
    src_port: u16,
    dst: Ipv4Address,
    dst_port: u16,
    ip_id: u16,
    payload: &[u8],
) -> Result<()> {
    let segment_len = HEADER_LEN + payload.len();
    let mut nb = PacketBuffer::alloc(dev.id(), crate::buffer::LayerMask::TRANSPORT, segment_len);
    nb.set_flag(Flags::TX);

    let src = dev.nif().local_ip.unwrap_or(Ipv4Address::UNSPECIFIED);
    let mut header = UdpHeader { src_port, dst_port, length: segment_len as u16, checksum: 0 };
    let mut raw = vec![0u8; segment_len];
    header.compose(&mut raw[..HEADER_LEN]);
    raw[HEADER_LEN..].copy_from_slice(payload);
    let csum = crate::checksum::pseudo_header_checksum(src.octets(), dst.octets(), PROTOCOL, &raw);
    // RFC 768: a computed checksum of exactly zero is transmitted as all-ones.
    header.checksum = if csum == 0 { 0xFFFF } else { csum };
    header.compose(&mut raw[..HEADER_LEN]);

    nb.cpy_data(Layer::Transport, &raw)?;
    crate::layer::ipv4::ipv4_output(dev, driver, dst, PROTOCOL, ip_id, nb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DeviceId, LayerMask};
    use crate::device::DeviceConfig;
    use std::sync::{Arc, Mutex};

    fn mac(b: u8) -> crate::address::EthernetAddress {
        crate::address::EthernetAddress([0, 0, 0, 0, 0, b])
    }

    fn dev() -> Device {
        Device::new(DeviceId(0), DeviceConfig::new("udp0", mac(1)), |_, _| {})
    }

    fn segment(src_addr: Ipv4Address, dst_addr: Ipv4Address, src_port: u16, dst_port: u16, payload: &[u8]) -> PacketBuffer {
        let mut nb = PacketBuffer::alloc(DeviceId(0), LayerMask::TRANSPORT, HEADER_LEN + payload.len());
        nb.set_addresses(src_addr, dst_addr);
        let mut header = UdpHeader { src_port, dst_port, length: (HEADER_LEN + payload.len()) as u16, checksum: 0 };
        let mut raw = vec![0u8; HEADER_LEN + payload.len()];
        header.compose(&mut raw[..HEADER_LEN]);
        raw[HEADER_LEN..].copy_from_slice(payload);
        let csum = crate::checksum::pseudo_header_checksum(src_addr.octets(), dst_addr.octets(), PROTOCOL, &raw);
        header.checksum = if csum == 0 { 0xFFFF } else { csum };
        header.compose(&mut raw[..HEADER_LEN]);
        nb.cpy_data(Layer::Transport, &raw).unwrap();
        nb
    }

    #[test]
    fn bound_port_receives_payload() {
        let device = dev();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received2 = received.clone();
        device.bind(crate::socket::Socket::new(Ipv4Address::UNSPECIFIED, 9000, PROTOCOL, move |nb: &PacketBuffer| {
            received2.lock().unwrap().extend_from_slice(nb.window(Layer::Application));
        }));

        let mut nb = segment(Ipv4Address::new(10, 0, 0, 1), Ipv4Address::new(10, 0, 0, 2), 4000, 9000, b"hello");
        udp_input(&device, &mut nb);
        assert!(nb.is_arrived());
        assert_eq!(&*received.lock().unwrap(), b"hello");
    }

    #[test]
    fn unbound_port_is_dropped() {
        let device = dev();
        let mut nb = segment(Ipv4Address::new(10, 0, 0, 1), Ipv4Address::new(10, 0, 0, 2), 4000, 9001, b"hi");
        udp_input(&device, &mut nb);
        assert!(nb.is_dropped());
    }
}
