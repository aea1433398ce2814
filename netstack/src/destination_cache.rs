//! The per-device destination cache: next-hop network address to link address.
//!
//! Plays the role of an ARP table without implementing ARP itself (Non-goal: no dynamic neighbor
//! discovery protocol). Entries arrive administratively (`add`), by inbound learning, or from an
//! address-resolution protocol layered on top; this module only keeps the mapping and its
//! eviction policy.
//!
//! Design Note open question (destination cache population/eviction): resolved here as an
//! explicit bounded LRU. The cache is expected to be small (single digits to low dozens of
//! entries per interface, per the design), so a linear scan for both lookup and eviction is the
//! right trade-off -- no hash table, no extra bookkeeping for a handful of entries.

use crate::address::{EthernetAddress, Ipv4Address};

/// One `(network address, link address)` binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub src: Ipv4Address,
    pub hw: EthernetAddress,
}

/// The default capacity of a newly constructed [`DestinationCache`], absent an explicit override.
pub const DEFAULT_CAPACITY: usize = 32;

/// A bounded, least-recently-used destination cache.
///
/// Invariant: at most one entry exists per `src` address. `add`-ing an existing key replaces its
/// hardware address in place and refreshes its recency instead of creating a duplicate.
#[derive(Debug)]
pub struct DestinationCache {
    capacity: usize,
    // Ordered oldest-to-newest; the tail is most recently used.
    entries: Vec<Entry>,
}

impl DestinationCache {
    pub fn new(capacity: usize) -> Self {
        DestinationCache {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    /// Insert or update the mapping for `src`. Evicts the least-recently-used entry if the cache
    /// is at capacity and `src` is not already present.
    pub fn add(&mut self, src: Ipv4Address, hw: EthernetAddress) {
        if let Some(pos) = self.entries.iter().position(|e| e.src == src) {
            self.entries.remove(pos);
        } else if self.entries.len() >= self.capacity {
            log::debug!("destination cache full, evicting least-recently-used entry");
            self.entries.remove(0);
        }
        self.entries.push(Entry { src, hw });
    }

    /// Look up `src`, marking it as most-recently-used on a hit.
    pub fn find(&mut self, src: Ipv4Address) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.src == src)?;
        let entry = self.entries.remove(pos);
        self.entries.push(entry);
        Some(entry)
    }

    pub fn remove(&mut self, src: Ipv4Address) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.src == src) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Update an existing entry's hardware address if present; equivalent to `add` but makes
    /// intent explicit at call sites that are specifically reacting to a changed binding.
    pub fn update(&mut self, src: Ipv4Address, hw: EthernetAddress) {
        self.add(src, hw);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(b: u8) -> EthernetAddress {
        EthernetAddress([0, 0, 0, 0, 0, b])
    }

    #[test]
    fn add_then_find_round_trips() {
        let mut cache = DestinationCache::new(DEFAULT_CAPACITY);
        cache.add(Ipv4Address::new(10, 0, 0, 1), mac(1));
        assert_eq!(cache.find(Ipv4Address::new(10, 0, 0, 1)), Some(Entry {
            src: Ipv4Address::new(10, 0, 0, 1),
            hw: mac(1),
        }));
    }

    #[test]
    fn add_replaces_existing_key_instead_of_duplicating() {
        let mut cache = DestinationCache::new(DEFAULT_CAPACITY);
        let addr = Ipv4Address::new(10, 0, 0, 1);
        cache.add(addr, mac(1));
        cache.add(addr, mac(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.find(addr).unwrap().hw, mac(2));
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let mut cache = DestinationCache::new(2);
        cache.add(Ipv4Address::new(10, 0, 0, 1), mac(1));
        cache.add(Ipv4Address::new(10, 0, 0, 2), mac(2));
        // Touch the first entry so the second becomes least-recently-used.
        cache.find(Ipv4Address::new(10, 0, 0, 1));
        cache.add(Ipv4Address::new(10, 0, 0, 3), mac(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.find(Ipv4Address::new(10, 0, 0, 2)).is_none());
        assert!(cache.find(Ipv4Address::new(10, 0, 0, 1)).is_some());
        assert!(cache.find(Ipv4Address::new(10, 0, 0, 3)).is_some());
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut cache = DestinationCache::new(DEFAULT_CAPACITY);
        let addr = Ipv4Address::new(10, 0, 0, 1);
        cache.add(addr, mac(1));
        assert!(cache.remove(addr));
        assert!(cache.find(addr).is_none());
    }
}
