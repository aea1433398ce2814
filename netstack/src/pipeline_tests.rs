//! End-to-end pipeline tests: a full [`Device`] driven by a synthetic in-memory driver, exercising
//! datalink -> network -> transport -> socket delivery the same way [`crate::device::Device::poll`]
//! drives a real one. Mirrors the teacher's own whole-stack test (`layer::ip::tests::simple`),
//! scaled up from a single send/receive check to the six scenarios the reassembly and demux
//! design calls out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::address::{EthernetAddress, Ipv4Address};
use crate::buffer::{DeviceId, Flags, Layer, LayerMask, PacketBuffer};
use crate::demux::FnHandler;
use crate::device::{Device, DeviceConfig, Driver, DriverError, NetworkInterface};
use crate::layer::eth::{self, ethernet_input, EthernetHeader, ETHERTYPE_IPV4};
use crate::layer::ipv4::{Ipv4Header, MIN_HEADER_LEN};
use crate::layer::udp::{self, UdpHeader, HEADER_LEN as UDP_HEADER_LEN, PROTOCOL as UDP_PROTOCOL};
use crate::socket::Socket;

fn mac(b: u8) -> EthernetAddress {
    EthernetAddress([0, 0, 0, 0, 0, b])
}

/// A driver backed by an in-memory frame queue, standing in for a live NIC or the PCAP harness's
/// capture file: `read` hands queued frames to the backlog, `write` records what was sent.
struct QueueDriver {
    pending: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl QueueDriver {
    fn new() -> Self {
        QueueDriver { pending: VecDeque::new(), sent: Vec::new() }
    }

    fn push(&mut self, frame: Vec<u8>) {
        self.pending.push_back(frame);
    }
}

impl Driver for QueueDriver {
    fn write(&mut self, _dev: &Device, nb: PacketBuffer) -> Result<(), DriverError> {
        self.sent.push(nb.window(Layer::Datalink).to_vec());
        Ok(())
    }

    /// Ignores `max` and hands over everything pending, the way an over-eager driver would: it is
    /// `Device::poll`'s own processing loop, not the driver, that is responsible for bounding how
    /// much of an already-queued backlog gets worked off per call.
    fn read(&mut self, dev: &Device, _max: usize) -> Result<usize, DriverError> {
        let mut enqueued = 0;
        while let Some(frame) = self.pending.pop_front() {
            let mut nb = PacketBuffer::alloc(dev.id(), LayerMask::DATALINK, frame.len());
            nb.window_mut(Layer::Datalink).copy_from_slice(&frame);
            nb.set_flag(Flags::RX);
            dev.add_backlog(nb);
            enqueued += 1;
        }
        Ok(enqueued)
    }

    fn available(&mut self, _dev: &Device) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }
}

fn udp_segment(src: Ipv4Address, dst: Ipv4Address, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let segment_len = UDP_HEADER_LEN + payload.len();
    let mut header = UdpHeader { src_port, dst_port, length: segment_len as u16, checksum: 0 };
    let mut raw = vec![0u8; segment_len];
    header.compose(&mut raw[..UDP_HEADER_LEN]);
    raw[UDP_HEADER_LEN..].copy_from_slice(payload);
    let csum = crate::checksum::pseudo_header_checksum(src.octets(), dst.octets(), UDP_PROTOCOL, &raw);
    header.checksum = if csum == 0 { 0xFFFF } else { csum };
    header.compose(&mut raw[..UDP_HEADER_LEN]);
    raw
}

fn eth_frame(dst: EthernetAddress, src: EthernetAddress, ip_raw: &[u8]) -> Vec<u8> {
    let header = EthernetHeader { dst, src, ethertype: ETHERTYPE_IPV4 };
    let mut raw = vec![0u8; eth::HEADER_LEN];
    header.compose(&mut raw);
    raw.extend_from_slice(ip_raw);
    raw
}

/// A whole, unfragmented UDP datagram framed inside Ethernet.
fn whole_frame(dst_mac: EthernetAddress, src_mac: EthernetAddress, src_ip: Ipv4Address, dst_ip: Ipv4Address, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_raw = udp_segment(src_ip, dst_ip, src_port, dst_port, payload);
    let header = Ipv4Header {
        ihl: 5,
        dscp_ecn: 0,
        total_len: (MIN_HEADER_LEN + udp_raw.len()) as u16,
        id: 1,
        dont_fragment: false,
        more_fragments: false,
        frag_offset: 0,
        ttl: 64,
        protocol: UDP_PROTOCOL,
        checksum: 0,
        src: src_ip,
        dst: dst_ip,
    };
    let mut ip_raw = vec![0u8; MIN_HEADER_LEN];
    header.compose(&mut ip_raw);
    ip_raw.extend_from_slice(&udp_raw);
    eth_frame(dst_mac, src_mac, &ip_raw)
}

/// One IPv4 fragment: `chunk` is a slice of some already-composed UDP segment, `byte_offset` its
/// offset into that segment (must be a multiple of 8 unless this is the last fragment).
fn fragment_frame(
    dst_mac: EthernetAddress,
    src_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    id: u16,
    byte_offset: usize,
    more_fragments: bool,
    chunk: &[u8],
) -> Vec<u8> {
    let header = Ipv4Header {
        ihl: 5,
        dscp_ecn: 0,
        total_len: (MIN_HEADER_LEN + chunk.len()) as u16,
        id,
        dont_fragment: false,
        more_fragments,
        frag_offset: (byte_offset / 8) as u16,
        ttl: 64,
        protocol: UDP_PROTOCOL,
        checksum: 0,
        src: src_ip,
        dst: dst_ip,
    };
    let mut ip_raw = vec![0u8; MIN_HEADER_LEN];
    header.compose(&mut ip_raw);
    ip_raw.extend_from_slice(chunk);
    eth_frame(dst_mac, src_mac, &ip_raw)
}

const HOST_MAC: u8 = 1;
const PEER_MAC: u8 = 2;
const HOST_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

/// A device wired up exactly as `netstack-pcap`'s `main` wires one: Ethernet input as `rx`, IPv4
/// registered on the datalink demux, UDP registered on the network-layer demux.
fn host_device() -> Device {
    let mut config = DeviceConfig::new("host0", mac(HOST_MAC));
    config.nif = NetworkInterface {
        local_ip: Some(HOST_IP),
        mask: Ipv4Address::new(255, 255, 255, 0),
        gateway: None,
    };
    let device = Device::new(DeviceId(0), config, |dev, nb| ethernet_input(dev, nb));
    device.add_protocol(ETHERTYPE_IPV4, FnHandler(|dev, nb| crate::layer::ipv4::ipv4_input(dev, nb)));
    device.add_protocol(u16::from(UDP_PROTOCOL), FnHandler(|dev, nb| udp::udp_input(dev, nb)));
    device
}

#[test]
fn simple_udp_receive_delivers_to_bound_socket() {
    let device = host_device();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, 9000, UDP_PROTOCOL, move |nb: &PacketBuffer| {
        received2.lock().unwrap().extend_from_slice(nb.window(Layer::Application));
    }));

    let mut driver = QueueDriver::new();
    driver.push(whole_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 4000, 9000, b"hello world"));

    assert_eq!(device.poll(&mut driver), 1);
    assert_eq!(&*received.lock().unwrap(), b"hello world");
    assert_eq!(device.stats().dropped, 0);
}

#[test]
fn udp_to_unbound_port_is_dropped() {
    let device = host_device();
    let mut driver = QueueDriver::new();
    driver.push(whole_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 4000, 9001, b"hi"));

    assert_eq!(device.poll(&mut driver), 1);
    assert_eq!(device.stats().dropped, 1);
}

#[test]
fn in_order_fragments_reassemble_and_deliver() {
    let device = host_device();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, 9000, UDP_PROTOCOL, move |nb: &PacketBuffer| {
        received2.lock().unwrap().extend_from_slice(nb.window(Layer::Application));
    }));

    let payload = b"0123456789abcdefghij";
    let udp_raw = udp_segment(PEER_IP, HOST_IP, 4000, 9000, payload);
    let (first, second) = udp_raw.split_at(16);

    let mut driver = QueueDriver::new();
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 7, 0, true, first));
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 7, 16, false, second));

    assert_eq!(device.poll(&mut driver), 2);
    assert_eq!(&*received.lock().unwrap(), payload);
    assert_eq!(device.stats().dropped, 0);
}

#[test]
fn out_of_order_fragments_reassemble_and_deliver() {
    let device = host_device();
    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, 9000, UDP_PROTOCOL, move |nb: &PacketBuffer| {
        received2.lock().unwrap().extend_from_slice(nb.window(Layer::Application));
    }));

    let payload = b"0123456789abcdefghij";
    let udp_raw = udp_segment(PEER_IP, HOST_IP, 4000, 9000, payload);
    let (first, second) = udp_raw.split_at(16);

    let mut driver = QueueDriver::new();
    // Second fragment arrives before the first.
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 8, 16, false, second));
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 8, 0, true, first));

    assert_eq!(device.poll(&mut driver), 2);
    assert_eq!(&*received.lock().unwrap(), payload);
}

#[test]
fn overlapping_fragment_is_dropped_without_delivery() {
    let device = host_device();
    let delivered = Arc::new(Mutex::new(false));
    let delivered2 = delivered.clone();
    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, 9000, UDP_PROTOCOL, move |_: &PacketBuffer| {
        *delivered2.lock().unwrap() = true;
    }));

    let payload = b"0123456789abcdefghij";
    let udp_raw = udp_segment(PEER_IP, HOST_IP, 4000, 9000, payload);
    let (first, _) = udp_raw.split_at(16);
    // Overlaps [8, 16) of the first fragment's [0, 16) span.
    let overlapping = &udp_raw[8..];

    let mut driver = QueueDriver::new();
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 9, 0, true, first));
    driver.push(fragment_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 9, 8, false, overlapping));

    assert_eq!(device.poll(&mut driver), 2);
    assert!(!*delivered.lock().unwrap());
    assert_eq!(device.stats().dropped, 1);
}

#[test]
fn rx_max_backpressure_leaves_excess_frames_queued() {
    let device = host_device();
    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, 9000, UDP_PROTOCOL, |_: &PacketBuffer| {}));

    let mut driver = QueueDriver::new();
    for i in 0..40 {
        driver.push(whole_frame(mac(HOST_MAC), mac(PEER_MAC), PEER_IP, HOST_IP, 4000, 9000, &[i as u8; 4]));
    }

    // `host_device` uses `DeviceConfig::new`'s default `rx_max` of 32.
    assert_eq!(device.poll(&mut driver), 32);
    assert_eq!(device.backlog_len(), 8);
    assert_eq!(device.poll(&mut driver), 8);
    assert_eq!(device.backlog_len(), 0);
}
