//! IPv4 fragment reassembly.
//!
//! Design Note open question (fragment list structure): resolved as a `Mutex`-guarded hash map
//! from the four-tuple `{saddr, daddr, id, protocol}` to a per-datagram bucket, rather than the
//! source's single global linked list walked on every fragment. A hash map keyed by the exact
//! match criteria turns "find the bucket this fragment belongs to" from an O(n) walk into an O(1)
//! lookup, and a bucket is just a `Vec` of fragments ordered by offset -- small, since real
//! datagrams rarely fragment into more than a handful of pieces.
//!
//! The engine lives behind its own mutex, separate from the device's main lock (s5): reassembly
//! work never needs to hold the backlog/protocol-list lock, and vice versa.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::address::Ipv4Address;
use crate::buffer::{Layer, Owner, PacketBuffer};
use crate::layer::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Key {
    saddr: u32,
    daddr: u32,
    id: u16,
    protocol: u8,
}

/// One fragment's contribution to a datagram: a byte offset into the reassembled payload and the
/// transport-window bytes it carries, cloned out of the original driver-owned buffer so the
/// bucket's lifetime is independent of the backlog (see [`PacketBuffer::clone_layers`]).
struct Bucket {
    fragments: Vec<(usize, PacketBuffer)>,
    total_len: Option<usize>,
}

impl Bucket {
    fn new() -> Self {
        Bucket { fragments: Vec::new(), total_len: None }
    }

    fn insert(&mut self, offset: usize, last: bool, mut nb: PacketBuffer) -> Result<()> {
        let len = nb.window_len(Layer::Transport);
        let end = offset + len;
        for (existing_offset, existing) in &self.fragments {
            let existing_end = existing_offset + existing.window_len(Layer::Transport);
            if offset < existing_end && *existing_offset < end {
                return Err(Error::Overlap);
            }
        }
        if last {
            self.total_len = Some(end);
        }
        nb.transfer_to(Owner::FragmentBucket);
        let pos = self.fragments.iter().position(|(o, _)| *o > offset).unwrap_or(self.fragments.len());
        self.fragments.insert(pos, (offset, nb));
        Ok(())
    }

    /// All bytes from `0` to `total_len` are covered with no gaps, and the final fragment (the
    /// one without `more_fragments`) has been seen.
    fn is_complete(&self) -> bool {
        let total = match self.total_len {
            Some(total) => total,
            None => return false,
        };
        let mut expected = 0;
        for (offset, nb) in &self.fragments {
            if *offset != expected {
                return false;
            }
            expected += nb.window_len(Layer::Transport);
        }
        expected == total
    }

    /// Consume the bucket, producing one buffer whose `transport` window holds every fragment's
    /// payload concatenated in offset order. The first fragment (offset 0) becomes the target
    /// buffer and is grown in place via [`PacketBuffer::realloc`]; later fragments' bytes are
    /// copied into the grown window and then dropped.
    ///
    /// The reassembled buffer is marked `NOCSUM`: each fragment's checksum (if any) only ever
    /// covered that fragment's own share of the datagram, never the whole, so there is nothing
    /// left for a transport-layer checksum check to verify against.
    fn defragment(mut self) -> PacketBuffer {
        let total = self.total_len.expect("defragment called on an incomplete bucket");
        let (first_offset, mut target) = self.fragments.remove(0);
        debug_assert_eq!(first_offset, 0);
        target.realloc(Layer::Transport, total).expect("realloc to reassembled length");
        for (offset, fragment) in self.fragments {
            let bytes = fragment.window(Layer::Transport).to_vec();
            target.window_mut(Layer::Transport)[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        target.transfer_to(Owner::Handler);
        target.set_flag(crate::buffer::Flags::NOCSUM);
        target
    }
}

/// The per-device reassembly state: one bucket per in-flight datagram.
#[derive(Default)]
pub struct ReassemblyEngine {
    buckets: Mutex<HashMap<Key, Bucket>>,
}

impl ReassemblyEngine {
    pub fn new() -> Self {
        ReassemblyEngine { buckets: Mutex::new(HashMap::new()) }
    }

    /// Fold one fragment into its datagram's bucket. `nb` must already carry only the fragment's
    /// `transport`-layer payload (see [`PacketBuffer::clone_layers`]); `offset` and `last` come
    /// from the fragment's own IPv4 header. Returns the defragmented datagram once every fragment
    /// has arrived, or `None` while reassembly is still pending.
    pub(crate) fn handle_fragment(
        &self,
        saddr: Ipv4Address,
        daddr: Ipv4Address,
        id: u16,
        protocol: u8,
        offset: usize,
        last: bool,
        nb: PacketBuffer,
    ) -> Result<Option<PacketBuffer>> {
        let key = Key { saddr: saddr.0, daddr: daddr.0, id, protocol };
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(key).or_insert_with(Bucket::new);
        bucket.insert(offset, last, nb)?;
        if bucket.is_complete() {
            let bucket = buckets.remove(&key).unwrap();
            Ok(Some(bucket.defragment()))
        } else {
            Ok(None)
        }
    }

    pub fn pending_datagrams(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}
