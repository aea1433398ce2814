//! IPv4: header parse/compose, addressing, fragmentation/reassembly, and the
//! `network -> transport` handoff.

pub mod reassembly;

use crate::address::{Ipv4Address, Ipv4Cidr};
use crate::buffer::{Flags, Layer, LayerMask, PacketBuffer};
use crate::device::{Device, NetworkInterface};
use crate::layer::{Error, Result};

pub const MIN_HEADER_LEN: usize = 20;

const FLAG_DONT_FRAGMENT: u16 = 0x4000;
const FLAG_MORE_FRAGMENTS: u16 = 0x2000;
const FRAG_OFFSET_MASK: u16 = 0x1FFF;

/// A parsed IPv4 header. Options (`ihl > 5`) are skipped, never interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub dscp_ecn: u8,
    pub total_len: u16,
    pub id: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units, as carried on the wire.
    pub frag_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
}

impl Ipv4Header {
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    pub fn fragment_byte_offset(&self) -> usize {
        self.frag_offset as usize * 8
    }

    pub fn is_fragment(&self) -> bool {
        self.more_fragments || self.frag_offset != 0
    }

    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_HEADER_LEN {
            return Err(Error::Format);
        }
        let version = raw[0] >> 4;
        let ihl = raw[0] & 0x0F;
        if version != 4 || ihl < 5 {
            return Err(Error::Format);
        }
        let total_len = u16::from_be_bytes([raw[2], raw[3]]);
        if (ihl as usize * 4) > raw.len() || (total_len as usize) > raw.len() || (total_len as usize) < ihl as usize * 4 {
            return Err(Error::Format);
        }
        let flags_frag = u16::from_be_bytes([raw[6], raw[7]]);
        Ok(Ipv4Header {
            ihl,
            dscp_ecn: raw[1],
            total_len,
            id: u16::from_be_bytes([raw[4], raw[5]]),
            dont_fragment: flags_frag & FLAG_DONT_FRAGMENT != 0,
            more_fragments: flags_frag & FLAG_MORE_FRAGMENTS != 0,
            frag_offset: flags_frag & FRAG_OFFSET_MASK,
            ttl: raw[8],
            protocol: raw[9],
            checksum: u16::from_be_bytes([raw[10], raw[11]]),
            src: Ipv4Address::from_bytes(&raw[12..16]),
            dst: Ipv4Address::from_bytes(&raw[16..20]),
        })
    }

    /// Compose a 20-byte header (no options) into `raw`, computing and filling in the checksum.
    pub fn compose(&self, raw: &mut [u8]) {
        raw[0] = (4 << 4) | self.ihl;
        raw[1] = self.dscp_ecn;
        raw[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw[4..6].copy_from_slice(&self.id.to_be_bytes());
        let mut flags_frag = self.frag_offset & FRAG_OFFSET_MASK;
        if self.dont_fragment {
            flags_frag |= FLAG_DONT_FRAGMENT;
        }
        if self.more_fragments {
            flags_frag |= FLAG_MORE_FRAGMENTS;
        }
        raw[6..8].copy_from_slice(&flags_frag.to_be_bytes());
        raw[8] = self.ttl;
        raw[9] = self.protocol;
        raw[10] = 0;
        raw[11] = 0;
        raw[12..16].copy_from_slice(&self.src.octets());
        raw[16..20].copy_from_slice(&self.dst.octets());
        let csum = crate::checksum::internet_checksum(&raw[0..MIN_HEADER_LEN]);
        raw[10..12].copy_from_slice(&csum.to_be_bytes());
    }
}

/// Whether `dst` is an address this interface should accept: its own address, the unspecified
/// address, the all-ones broadcast, or the subnet's directed broadcast. No local address
/// configured accepts everything (useful for a bare capture/forwarding device).
fn accepts(nif: &NetworkInterface, dst: Ipv4Address) -> bool {
    match nif.local_ip {
        None => true,
        Some(local) => {
            dst == local
                || dst == Ipv4Address::UNSPECIFIED
                || dst == Ipv4Address::BROADCAST
                || dst == Ipv4Cidr::new(local, nif.mask).broadcast()
        }
    }
}

/// 4.L Route table lookup: the next-hop link-layer destination is resolved for `dst` if it is
/// on-link, otherwise for the configured default gateway. Returns `None` if neither applies (no
/// gateway configured and `dst` is off-link) -- the caller has nothing to resolve a destination
/// cache entry against.
pub fn next_hop(nif: &NetworkInterface, dst: Ipv4Address) -> Option<Ipv4Address> {
    if let Some(local) = nif.local_ip {
        if Ipv4Cidr::new(local, nif.mask).contains(dst) {
            return Some(dst);
        }
    }
    nif.gateway
}

fn dispatch(dev: &Device, nb: &mut PacketBuffer, protocol: u8) {
    nb.set_protocol(u16::from(protocol));
    crate::demux::demux_handle(dev, nb);
}

/// The network-layer receive entry point, called from [`crate::layer::eth::ethernet_input`] once
/// a frame's `network` window has been published.
///
/// Non-fragmented datagrams are dispatched immediately; fragments are handed to the device's
/// [`reassembly::ReassemblyEngine`] and only dispatched once a complete datagram has been
/// assembled.
pub fn ipv4_input(dev: &Device, nb: &mut PacketBuffer) {
    let header = match Ipv4Header::parse(nb.window(Layer::Network)) {
        Ok(header) => header,
        Err(_) => {
            log::debug!("{}: malformed ipv4 header", dev.name());
            dev.drop_buffer(nb);
            return;
        }
    };

    if !nb.test_flag(Flags::NOCSUM) {
        let csum = crate::checksum::internet_checksum(&nb.window(Layer::Network)[..header.header_len()]);
        if csum != 0 {
            log::debug!("{}: bad ipv4 checksum", dev.name());
            dev.drop_buffer(nb);
            return;
        }
    }

    if header.dst.is_multicast() {
        log::trace!("{}: multicast datagram ({}), dropping", dev.name(), header.dst);
        nb.set_flag(Flags::MULTICAST);
        dev.drop_buffer(nb);
        return;
    }

    if !accepts(&dev.nif(), header.dst) {
        log::trace!("{}: datagram addressed elsewhere ({})", dev.name(), header.dst);
        dev.drop_buffer(nb);
        return;
    }

    nb.set_addresses(header.src, header.dst);

    let network_start = nb.window_start(Layer::Network);
    let header_len = header.header_len();
    let total_len = header.total_len as usize;
    nb.shrink_window(Layer::Network, total_len);
    if nb.set_data(Layer::Transport, network_start + header_len, total_len - header_len).is_err() {
        dev.drop_buffer(nb);
        return;
    }

    if !header.is_fragment() {
        dispatch(dev, nb, header.protocol);
        return;
    }

    let fragment = nb.clone_layers(LayerMask::TRANSPORT);
    let result = dev.reassembly().handle_fragment(
        header.src,
        header.dst,
        header.id,
        header.protocol,
        header.fragment_byte_offset(),
        !header.more_fragments,
        fragment,
    );
    match result {
        Ok(Some(mut datagram)) => {
            dispatch(dev, &mut datagram, header.protocol);
            nb.mark_arrived();
        }
        Ok(None) => {
            nb.mark_arrived();
        }
        Err(Error::Overlap) => {
            log::debug!("{}: overlapping ipv4 fragment, dropping", dev.name());
            dev.record_drop();
            nb.mark_arrived();
        }
        Err(_) => {
            dev.drop_buffer(nb);
        }
    }
}

/// The network-layer send path: compose the IPv4 header in front of `nb`'s `transport` window
/// and continue to [`crate::layer::eth::ethernet_output`].
///
/// Fragmentation of outbound datagrams exceeding the device MTU is a documented Non-goal; larger
/// payloads are rejected with [`Error::ResourceExhausted`] rather than silently truncated.
pub fn ipv4_output(
    dev: &Device,
    driver: &mut dyn crate::device::Driver,
    dst: Ipv4Address,
    protocol: u8,
    id: u16,
    mut nb: PacketBuffer,
) -> Result<()> {
    let payload_len = nb.window_len(Layer::Transport);
    if MIN_HEADER_LEN + payload_len > dev.mtu() as usize {
        return Err(Error::ResourceExhausted);
    }

    let nif = dev.nif();
    let src = nif.local_ip.unwrap_or(Ipv4Address::UNSPECIFIED);
    let next = next_hop(&nif, dst).ok_or(Error::AddressedElsewhere)?;
    let dst_hw = dev
        .find_destination(next)
        .ok_or(Error::ResourceExhausted)?
        .hw;

    nb.set_data(Layer::Network, 0, MIN_HEADER_LEN + payload_len)?;
    let header = Ipv4Header {
        ihl: 5,
        dscp_ecn: 0,
        total_len: (MIN_HEADER_LEN + payload_len) as u16,
        id,
        dont_fragment: true,
        more_fragments: false,
        frag_offset: 0,
        ttl: 64,
        protocol,
        checksum: 0,
        src,
        dst,
    };
    let payload = nb.window(Layer::Transport).to_vec();
    let mut raw = vec![0u8; MIN_HEADER_LEN];
    header.compose(&mut raw);
    nb.window_mut(Layer::Network)[..MIN_HEADER_LEN].copy_from_slice(&raw);
    nb.window_mut(Layer::Network)[MIN_HEADER_LEN..].copy_from_slice(&payload);

    crate::layer::eth::ethernet_output(dev, driver, dst_hw, crate::layer::eth::ETHERTYPE_IPV4, nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_compose() {
        let header = Ipv4Header {
            ihl: 5,
            dscp_ecn: 0,
            total_len: MIN_HEADER_LEN as u16,
            id: 0x1234,
            dont_fragment: false,
            more_fragments: true,
            frag_offset: 5,
            ttl: 64,
            protocol: 17,
            checksum: 0,
            src: Ipv4Address::new(10, 0, 0, 1),
            dst: Ipv4Address::new(10, 0, 0, 2),
        };
        let mut raw = [0u8; MIN_HEADER_LEN];
        header.compose(&mut raw);
        let parsed = Ipv4Header::parse(&raw).unwrap();
        assert_eq!(parsed.id, header.id);
        assert_eq!(parsed.more_fragments, header.more_fragments);
        assert_eq!(parsed.frag_offset, header.frag_offset);
        assert_eq!(internet_checksum_is_valid(&raw), true);
    }

    fn internet_checksum_is_valid(raw: &[u8]) -> bool {
        crate::checksum::internet_checksum(raw) == 0
    }

    #[test]
    fn accepts_own_address_and_broadcast_not_others() {
        let nif = NetworkInterface {
            local_ip: Some(Ipv4Address::new(192, 168, 1, 10)),
            mask: Ipv4Address::new(255, 255, 255, 0),
            gateway: None,
        };
        assert!(accepts(&nif, Ipv4Address::new(192, 168, 1, 10)));
        assert!(accepts(&nif, Ipv4Address::BROADCAST));
        assert!(accepts(&nif, Ipv4Address::new(192, 168, 1, 255)));
        assert!(accepts(&nif, Ipv4Address::UNSPECIFIED));
        assert!(!accepts(&nif, Ipv4Address::new(192, 168, 1, 11)));
    }

    #[test]
    fn multicast_destination_is_dropped_and_flagged() {
        use crate::buffer::DeviceId;
        use crate::device::DeviceConfig;

        let mut config = DeviceConfig::new("eth0", crate::address::EthernetAddress([0, 0, 0, 0, 0, 1]));
        config.nif = NetworkInterface {
            local_ip: Some(Ipv4Address::new(10, 0, 0, 2)),
            mask: Ipv4Address::new(255, 255, 255, 0),
            gateway: None,
        };
        let dev = Device::new(DeviceId(0), config, |_, _| {});

        let header = Ipv4Header {
            ihl: 5,
            dscp_ecn: 0,
            total_len: MIN_HEADER_LEN as u16,
            id: 1,
            dont_fragment: false,
            more_fragments: false,
            frag_offset: 0,
            ttl: 64,
            protocol: 17,
            checksum: 0,
            src: Ipv4Address::new(10, 0, 0, 1),
            dst: Ipv4Address::new(224, 0, 0, 1),
        };
        let mut nb = PacketBuffer::alloc(DeviceId(0), LayerMask::NETWORK, MIN_HEADER_LEN);
        header.compose(nb.window_mut(Layer::Network));

        ipv4_input(&dev, &mut nb);
        assert!(nb.is_dropped());
        assert!(nb.test_flag(Flags::MULTICAST));
        assert_eq!(dev.stats().dropped, 1);
    }

    #[test]
    fn next_hop_prefers_on_link_destination_over_gateway() {
        let nif = NetworkInterface {
            local_ip: Some(Ipv4Address::new(192, 168, 1, 10)),
            mask: Ipv4Address::new(255, 255, 255, 0),
            gateway: Some(Ipv4Address::new(192, 168, 1, 1)),
        };
        assert_eq!(next_hop(&nif, Ipv4Address::new(192, 168, 1, 50)), Some(Ipv4Address::new(192, 168, 1, 50)));
        assert_eq!(next_hop(&nif, Ipv4Address::new(8, 8, 8, 8)), Some(Ipv4Address::new(192, 168, 1, 1)));
    }
}
