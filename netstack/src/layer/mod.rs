//! The process logic of protocol layers.
//!
//! This is not a strict OSI stack but rather a group of logical modules, each owning one of the
//! buffer's four windows (see [`crate::buffer`]). The general shape of every layer is the same:
//!
//! ```text
//! datalink --ethernet_input--> network --ipv4_input--> transport --udp_input--> application
//! ```
//!
//! A receive handler consumes the window published by the layer below, validates it, and either
//! publishes its own window for the layer above or resolves the buffer by flagging it `DROPPED`
//! (see [`crate::buffer::Flags`]). A send handler does the mirror image: it composes a header in
//! front of the window handed to it by the layer above and hands the result down. No handler
//! invoked from [`crate::device::Device::poll`] may block on an unbounded wait; per-packet
//! failures are buffer dispositions, never a `panic!` or an `Err` that aborts the poll loop.
//!
//! `ip` also owns reassembly (`ip::reassembly`), since defragmented datagrams re-enter exactly
//! the same dispatch point as a non-fragmented one.

pub mod eth;
pub mod ipv4;
pub mod udp;

use std::fmt;

/// A shortened result type for a generic layer operation.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds a layer can signal internally before resolving a buffer disposition.
///
/// These mirror the per-packet error kinds of the design: `Format`, `Addressed-elsewhere`,
/// `Unsupported`, `Overlap`, `Resource-exhausted`, `Port-unreachable`. None of them are fatal --
/// every caller that receives one marks the buffer `DROPPED` (or, for `Overlap`, drops just the
/// offending fragment) and returns control to the poll loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// Bogus version, header length, or total length field.
    Format,
    /// The datagram is addressed to somebody else (unicast mismatch).
    AddressedElsewhere,
    /// The operation, protocol, or feature is not implemented (e.g. multicast, non-UDP/ICMP).
    Unsupported,
    /// An IPv4 fragment overlapped a previously received fragment of the same datagram.
    Overlap,
    /// Allocation or table capacity was exhausted (e.g. a reassembly bucket could not be created).
    ResourceExhausted,
    /// No socket is bound to the destination (address, port).
    PortUnreachable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::Format => "bogus header field",
            Error::AddressedElsewhere => "datagram addressed elsewhere",
            Error::Unsupported => "unsupported protocol or feature",
            Error::Overlap => "overlapping fragment",
            Error::ResourceExhausted => "resource exhausted",
            Error::PortUnreachable => "port unreachable",
        };
        f.write_str(text)
    }
}

impl std::error::Error for Error {}
