//! A userspace networking stack: one packet buffer crossing Ethernet, IPv4 (with reassembly),
//! and UDP on its way from a driver's backlog to a bound socket.
//!
//! The crate is organized bottom-up, mirroring the order a frame actually travels:
//!
//! - [`buffer`] -- the packet buffer (`nb`) and its four layer windows.
//! - [`checksum`] -- the internet checksum primitive every layer above needs.
//! - [`address`] -- link- and network-layer address types.
//! - [`destination_cache`] -- per-device next-hop resolution.
//! - [`socket`] -- the bound-socket table the transport layer demultiplexes into.
//! - [`demux`] -- runtime protocol-tag dispatch, used above both Ethernet and IPv4.
//! - [`device`] -- device registration, backlog, statistics, and the poll loop.
//! - [`layer`] -- the per-protocol receive/send handlers (`eth`, `ipv4`, `udp`).
//!
//! Concurrency: each [`device::Device`] is guarded by one [`std::sync::Mutex`] for its backlog,
//! protocol table, destination cache, and statistics, plus a [`std::sync::Condvar`] for the poll
//! event, plus a second, independent mutex inside its [`layer::ipv4::reassembly::ReassemblyEngine`].
//! No lock is ever held across a call into a receive handler or a registered protocol/socket
//! callback.

pub mod address;
pub mod buffer;
pub mod checksum;
pub mod demux;
pub mod destination_cache;
pub mod device;
pub mod layer;
pub mod socket;

#[cfg(test)]
mod pipeline_tests;
