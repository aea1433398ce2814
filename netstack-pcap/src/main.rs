mod config;
mod pcap;

use std::path::PathBuf;

use netstack::address::Ipv4Address;
use netstack::buffer::DeviceId;
use netstack::device::{Device, DeviceConfig, NetworkInterface};
use netstack::layer::eth::{ethernet_input, ETHERTYPE_IPV4};
use netstack::layer::ipv4;
use netstack::layer::udp::{self, PROTOCOL as UDP_PROTOCOL};
use netstack::socket::Socket;

use config::Config;

fn main() {
    env_logger::init();

    let config = Config::from_args();
    let output = config.output.clone().unwrap_or_else(|| default_output_path(&config.input));

    let dev_id = DeviceId(0);
    let mut driver = match pcap::PcapDriver::open(dev_id, &config.input, &output) {
        Ok(driver) => driver,
        Err(err) => {
            log::error!("failed to open capture {}: {}", config.input.display(), err);
            std::process::exit(1);
        }
    };

    let mut dev_config = DeviceConfig::new("pcap0", config.hostmac);
    dev_config.nif = NetworkInterface {
        local_ip: Some(config.host.address),
        mask: config.host.mask,
        gateway: config.gateway.map(|ip| {
            let octets = ip.octets();
            Ipv4Address::new(octets[0], octets[1], octets[2], octets[3])
        }),
    };

    let device = Device::new(dev_id, dev_config, |dev, nb| ethernet_input(dev, nb));

    device.add_protocol(ETHERTYPE_IPV4, netstack::demux::FnHandler(
        |dev: &Device, nb: &mut netstack::buffer::PacketBuffer| ipv4::ipv4_input(dev, nb),
    ));
    device.add_protocol(u16::from(UDP_PROTOCOL), netstack::demux::FnHandler(
        |dev: &Device, nb: &mut netstack::buffer::PacketBuffer| udp::udp_input(dev, nb),
    ));

    device.bind(Socket::new(Ipv4Address::UNSPECIFIED, config.echo_port, UDP_PROTOCOL, |nb: &netstack::buffer::PacketBuffer| {
        log::info!(
            "received {} bytes on the echo port",
            nb.window(netstack::buffer::Layer::Application).len()
        );
    }));

    log::info!("replaying {} into device {}", config.input.display(), device.name());
    while device.poll(&mut driver) > 0 {}
    device.destroy();
    log::info!("done, {:?}", device.stats());
}

fn default_output_path(input: &std::path::Path) -> PathBuf {
    let mut name = input.file_stem().map(|s| s.to_owned()).unwrap_or_default();
    name.push(".out.pcap");
    input.with_file_name(name)
}
