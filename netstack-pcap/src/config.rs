use std::net::Ipv4Addr;
use std::path::PathBuf;

use structopt::StructOpt;

use netstack::address::{EthernetAddress, Ipv4Address, Ipv4Cidr};

/// Command-line configuration for the PCAP-driven capture harness: which capture file to read
/// frames from, where to write any transmitted frames, and the interface identity to bind to.
#[derive(Clone, StructOpt)]
#[structopt(name = "netstack-pcap")]
pub struct Config {
    /// PCAP capture file to replay as inbound traffic.
    #[structopt(parse(from_os_str))]
    pub input: PathBuf,

    /// PCAP capture file transmitted frames are appended to. Defaults to `input` with an
    /// `.out.pcap` suffix if omitted.
    #[structopt(long)]
    pub output: Option<PathBuf>,

    /// The interface's own address and subnet mask, e.g. `10.0.0.2/24`.
    #[structopt(long, parse(try_from_str = parse_cidr))]
    pub host: Ipv4Cidr,

    /// The interface's hardware address, e.g. `02:00:00:00:00:01`.
    #[structopt(long, parse(try_from_str = parse_mac))]
    pub hostmac: EthernetAddress,

    /// Default gateway for off-link destinations.
    #[structopt(long)]
    pub gateway: Option<Ipv4Addr>,

    /// UDP port to bind an echo responder on.
    #[structopt(long, default_value = "7")]
    pub echo_port: u16,
}

impl Config {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}

fn parse_cidr(s: &str) -> Result<Ipv4Cidr, String> {
    let (addr, prefix) = s.split_once('/').ok_or_else(|| format!("expected address/prefix, got {}", s))?;
    let addr: Ipv4Addr = addr.parse().map_err(|e| format!("{}", e))?;
    let prefix: u32 = prefix.parse().map_err(|e| format!("{}", e))?;
    if prefix > 32 {
        return Err(format!("prefix length {} out of range", prefix));
    }
    let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
    let octets = addr.octets();
    Ok(Ipv4Cidr::new(
        Ipv4Address::new(octets[0], octets[1], octets[2], octets[3]),
        Ipv4Address(mask),
    ))
}

fn parse_mac(s: &str) -> Result<EthernetAddress, String> {
    let mut bytes = [0u8; 6];
    let mut parts = s.split(':');
    for byte in bytes.iter_mut() {
        let part = parts.next().ok_or_else(|| format!("malformed mac address {}", s))?;
        *byte = u8::from_str_radix(part, 16).map_err(|e| format!("{}", e))?;
    }
    if parts.next().is_some() {
        return Err(format!("malformed mac address {}", s));
    }
    Ok(EthernetAddress(bytes))
}
