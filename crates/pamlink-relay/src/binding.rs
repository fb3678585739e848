use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};

use crate::error::{RelayError, Result};

/// Number of logical channel slots a relay hands out.
pub const DEFAULT_SLOT_CAPACITY: usize = 3;

/// Slot shared by every source that arrives after the pool is exhausted.
pub const DEFAULT_FALLBACK_SLOT: usize = 1;

/// Outcome of binding a source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Logical channel id, 1-based.
    pub slot: usize,
    /// True the first time this address is seen.
    pub newly_assigned: bool,
    /// True when the address shares the fallback slot because the pool was full.
    pub aliased: bool,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    slot: usize,
    aliased: bool,
}

/// Source address → logical channel slot table.
///
/// The first `capacity` distinct addresses get slots `1..=capacity` in arrival
/// order. Later addresses alias to the fallback slot. Either way the mapping
/// is recorded, so an address keeps its slot for the lifetime of the table.
#[derive(Debug)]
pub struct SourceBinding {
    capacity: usize,
    fallback_slot: usize,
    table: Mutex<Table>,
}

#[derive(Debug, Default)]
struct Table {
    entries: HashMap<IpAddr, Entry>,
    allocated: usize,
}

impl SourceBinding {
    /// Create a table with `capacity` slots aliasing overflow to `fallback_slot`.
    pub fn new(capacity: usize, fallback_slot: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "slot capacity must be at least 1".to_string(),
            ));
        }
        if !(1..=capacity).contains(&fallback_slot) {
            return Err(RelayError::InvalidConfig(format!(
                "fallback slot {fallback_slot} outside 1..={capacity}"
            )));
        }
        Ok(Self {
            capacity,
            fallback_slot,
            table: Mutex::new(Table::default()),
        })
    }

    /// Look up `addr`, allocating a slot on first sight.
    pub fn bind(&self, addr: IpAddr) -> Binding {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = table.entries.get(&addr) {
            return Binding {
                slot: entry.slot,
                newly_assigned: false,
                aliased: entry.aliased,
            };
        }

        let entry = if table.allocated < self.capacity {
            table.allocated += 1;
            Entry {
                slot: table.allocated,
                aliased: false,
            }
        } else {
            Entry {
                slot: self.fallback_slot,
                aliased: true,
            }
        };
        table.entries.insert(addr, entry);

        Binding {
            slot: entry.slot,
            newly_assigned: true,
            aliased: entry.aliased,
        }
    }

    /// Slot already bound to `addr`, without allocating.
    pub fn lookup(&self, addr: IpAddr) -> Option<usize> {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(&addr)
            .map(|entry| entry.slot)
    }

    /// Every recorded address with its slot, ordered by slot then address.
    pub fn snapshot(&self) -> Vec<(IpAddr, usize)> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<_> = table
            .entries
            .iter()
            .map(|(addr, entry)| (*addr, entry.slot))
            .collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        rows
    }

    /// Number of slots handed out to distinct (non-aliased) sources.
    pub fn allocated(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocated
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fallback_slot(&self) -> usize {
        self.fallback_slot
    }
}

impl Default for SourceBinding {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SLOT_CAPACITY,
            fallback_slot: DEFAULT_FALLBACK_SLOT,
            table: Mutex::new(Table::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn first_sources_get_distinct_slots() {
        let table = SourceBinding::default();
        let slots: Vec<_> = (1..=3).map(|n| table.bind(ip(n)).slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);
        assert_eq!(table.allocated(), 3);
    }

    #[test]
    fn repeat_source_keeps_its_slot() {
        let table = SourceBinding::default();
        let first = table.bind(ip(7));
        let again = table.bind(ip(7));
        assert!(first.newly_assigned);
        assert!(!again.newly_assigned);
        assert_eq!(first.slot, again.slot);
        assert_eq!(table.allocated(), 1);
    }

    #[test]
    fn overflow_aliases_to_fallback_permanently() {
        let table = SourceBinding::default();
        for n in 1..=3 {
            table.bind(ip(n));
        }

        let fourth = table.bind(ip(4));
        assert_eq!(
            fourth,
            Binding {
                slot: DEFAULT_FALLBACK_SLOT,
                newly_assigned: true,
                aliased: true,
            }
        );
        let again = table.bind(ip(4));
        assert_eq!(again.slot, DEFAULT_FALLBACK_SLOT);
        assert!(again.aliased);
        assert!(!again.newly_assigned);
        assert_eq!(table.lookup(ip(4)), Some(DEFAULT_FALLBACK_SLOT));
        assert_eq!(table.allocated(), 3);
    }

    #[test]
    fn configurable_fallback() {
        let table = SourceBinding::new(2, 2).expect("valid table");
        table.bind(ip(1));
        table.bind(ip(2));
        assert_eq!(table.bind(ip(3)).slot, 2);
    }

    #[test]
    fn rejects_inconsistent_geometry() {
        assert!(SourceBinding::new(0, 1).is_err());
        assert!(SourceBinding::new(3, 0).is_err());
        assert!(SourceBinding::new(3, 4).is_err());
    }

    #[test]
    fn snapshot_is_ordered_by_slot() {
        let table = SourceBinding::default();
        for n in [9, 8, 7, 6] {
            table.bind(ip(n));
        }
        let rows = table.snapshot();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], (ip(6), 1));
        assert_eq!(rows[1], (ip(9), 1));
        assert_eq!(rows[3], (ip(7), 3));
    }

    #[test]
    fn concurrent_binds_allocate_each_slot_once() {
        let table = Arc::new(SourceBinding::new(3, 1).expect("valid table"));
        let workers: Vec<_> = (1..=8)
            .map(|n| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.bind(ip(n)))
            })
            .collect();
        let bindings: Vec<Binding> = workers
            .into_iter()
            .map(|w| w.join().expect("worker should finish"))
            .collect();

        let mut primary: Vec<usize> = bindings
            .iter()
            .filter(|b| !b.aliased)
            .map(|b| b.slot)
            .collect();
        primary.sort_unstable();
        assert_eq!(primary, vec![1, 2, 3]);
        assert_eq!(bindings.iter().filter(|b| b.aliased).count(), 5);
    }
}
