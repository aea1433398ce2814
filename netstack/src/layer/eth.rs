//! Ethernet (datalink) framing: header parse/compose and the `datalink -> network` handoff.

use crate::address::EthernetAddress;
use crate::buffer::{Layer, PacketBuffer};
use crate::device::Device;
use crate::layer::{Error, Result};

pub const HEADER_LEN: usize = 14;

/// EtherType assigned to IPv4, the only network-layer protocol this stack demultiplexes on.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// A parsed (but not owned) Ethernet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: EthernetAddress,
    pub src: EthernetAddress,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Format);
        }
        Ok(EthernetHeader {
            dst: EthernetAddress::from_bytes(&raw[0..6]),
            src: EthernetAddress::from_bytes(&raw[6..12]),
            ethertype: u16::from_be_bytes([raw[12], raw[13]]),
        })
    }

    pub fn compose(&self, raw: &mut [u8]) {
        raw[0..6].copy_from_slice(&self.dst.0);
        raw[6..12].copy_from_slice(&self.src.0);
        raw[12..14].copy_from_slice(&self.ethertype.to_be_bytes());
    }
}

/// The datalink receive entry point, installed as a device's `rx` handler: parse the frame
/// header, publish the remainder as the `network` window, set the buffer's destination-class
/// flags, tag the protocol, and hand off to demux.
///
/// Frames not addressed to `dev`'s hardware address (unicast mismatch and not broadcast) are
/// dropped without reaching demux, per the "addressed elsewhere" per-packet error. Which
/// network-layer protocol the ethertype maps to is not this layer's business: unmatched tags are
/// resolved by [`crate::demux::demux_handle`] the same way an unmatched UDP port is resolved by
/// the socket table, not by a hardcoded check here.
pub fn ethernet_input(dev: &Device, nb: &mut PacketBuffer) {
    let header = match EthernetHeader::parse(nb.window(Layer::Datalink)) {
        Ok(header) => header,
        Err(_) => {
            log::debug!("{}: malformed ethernet header", dev.name());
            dev.drop_buffer(nb);
            return;
        }
    };

    if header.dst.is_broadcast() {
        nb.set_flag(crate::buffer::Flags::BCAST);
    } else if header.dst == dev.hwaddr() {
        nb.set_flag(crate::buffer::Flags::UNICAST);
    } else {
        log::trace!("{}: frame addressed elsewhere, dropping", dev.name());
        dev.drop_buffer(nb);
        return;
    }

    let payload_len = nb.window_len(Layer::Datalink) - HEADER_LEN;
    if let Err(_) = nb.set_data(Layer::Network, HEADER_LEN, payload_len) {
        dev.drop_buffer(nb);
        return;
    }
    nb.set_protocol(header.ethertype);

    crate::demux::demux_handle(dev, nb);
}

/// The datalink send path: compose the header in front of `nb`'s `network` window (already
/// published by the layer above) and write it out through `driver`.
pub fn ethernet_output(
    dev: &Device,
    driver: &mut dyn crate::device::Driver,
    dst: EthernetAddress,
    ethertype: u16,
    mut nb: PacketBuffer,
) -> Result<()> {
    let network_len = nb.window_len(Layer::Network);
    nb.set_data(Layer::Datalink, 0, HEADER_LEN + network_len)?;

    let header = EthernetHeader { dst, src: dev.hwaddr(), ethertype };
    let mut raw = vec![0u8; HEADER_LEN];
    header.compose(&mut raw);
    nb.window_mut(Layer::Datalink)[0..HEADER_LEN].copy_from_slice(&raw);
    nb.set_flag(crate::buffer::Flags::TX);

    dev.write(driver, nb).map_err(|_| Error::ResourceExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DeviceId, LayerMask};

    fn mac(b: u8) -> EthernetAddress {
        EthernetAddress([0, 0, 0, 0, 0, b])
    }

    fn frame(dst: EthernetAddress, src: EthernetAddress, ethertype: u16, payload: &[u8]) -> PacketBuffer {
        let mut nb = PacketBuffer::alloc(DeviceId(0), LayerMask::DATALINK, HEADER_LEN + payload.len());
        let header = EthernetHeader { dst, src, ethertype };
        let mut raw = vec![0u8; HEADER_LEN];
        header.compose(&mut raw);
        nb.window_mut(Layer::Datalink)[0..HEADER_LEN].copy_from_slice(&raw);
        nb.window_mut(Layer::Datalink)[HEADER_LEN..].copy_from_slice(payload);
        nb
    }

    #[test]
    fn parse_round_trips_through_compose() {
        let header = EthernetHeader { dst: mac(1), src: mac(2), ethertype: ETHERTYPE_IPV4 };
        let mut raw = [0u8; HEADER_LEN];
        header.compose(&mut raw);
        assert_eq!(EthernetHeader::parse(&raw).unwrap(), header);
    }

    #[test]
    fn unicast_to_other_host_is_dropped() {
        use crate::device::{Device, DeviceConfig};
        let dev = Device::new(DeviceId(0), DeviceConfig::new("eth0", mac(1)), |_, _| {});
        let mut nb = frame(mac(9), mac(2), ETHERTYPE_IPV4, &[0u8; 4]);
        ethernet_input(&dev, &mut nb);
        assert!(nb.is_dropped());
    }

    #[test]
    fn broadcast_frame_sets_bcast_flag() {
        use crate::device::{Device, DeviceConfig};
        let dev = Device::new(DeviceId(0), DeviceConfig::new("eth0", mac(1)), |_, _| {});
        let mut nb = frame(EthernetAddress::BROADCAST, mac(2), 0x9999, &[0u8; 4]);
        ethernet_input(&dev, &mut nb);
        assert!(nb.test_flag(crate::buffer::Flags::BCAST));
    }
}
