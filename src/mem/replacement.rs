use serde::Deserialize;

use crate::mem::demand::{Address, NO_REQUEST};

/// RRIP counter value marking an eviction candidate.
const RRIP_MAX: u8 = 3;
/// RRIP counter assigned to a freshly installed line: recently inserted but
/// not yet proven useful.
const RRIP_INSERT: u8 = 2;

/// One way of a cache-set partition: the stored tag plus replacement state.
/// The tag doubles as the valid marker; a never-filled way keeps the
/// NO_REQUEST sentinel, which no real address ever decomposes to.
#[derive(Debug, Clone, Copy)]
pub struct CacheLineEntry {
    pub tag: Address,
    pub rrip: u8,
}

impl CacheLineEntry {
    pub fn empty() -> Self {
        Self {
            tag: NO_REQUEST,
            rrip: RRIP_MAX,
        }
    }
}

/// Replacement strategy, chosen once per cache set at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replacement {
    Lru,
    #[default]
    Rrip,
}

impl Replacement {
    /// Update replacement state after a hit on `index`.
    pub fn touch(&self, entries: &mut [CacheLineEntry], index: usize) {
        // The RRIP counter is reset on a hit regardless of policy; it is
        // simply never consulted under LRU.
        entries[index].rrip = 0;
        if let Replacement::Lru = self {
            entries[..=index].rotate_right(1);
        }
    }

    /// Install `tag` after a miss, evicting whichever entry the policy picks.
    /// Operates on the full pre-filled entry array: a partition below its
    /// live capacity still evicts positionally, mirroring pre-warmed
    /// at-capacity semantics.
    pub fn install(&self, entries: &mut [CacheLineEntry], tag: Address) {
        match self {
            Replacement::Lru => {
                entries.rotate_right(1);
                entries[0] = CacheLineEntry { tag, rrip: RRIP_MAX };
            }
            Replacement::Rrip => loop {
                if let Some(victim) = entries.iter_mut().find(|e| e.rrip == RRIP_MAX) {
                    victim.tag = tag;
                    victim.rrip = RRIP_INSERT;
                    return;
                }
                for entry in entries.iter_mut() {
                    entry.rrip += 1;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheLineEntry, Replacement};

    fn tags(entries: &[CacheLineEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.tag).collect()
    }

    #[test]
    fn lru_install_shifts_and_drops_tail() {
        let mut entries = vec![CacheLineEntry::empty(); 3];
        Replacement::Lru.install(&mut entries, 10);
        Replacement::Lru.install(&mut entries, 20);
        Replacement::Lru.install(&mut entries, 30);
        assert_eq!(vec![30, 20, 10], tags(&entries));
        Replacement::Lru.install(&mut entries, 40);
        assert_eq!(vec![40, 30, 20], tags(&entries));
    }

    #[test]
    fn lru_touch_moves_entry_to_front() {
        let mut entries = vec![CacheLineEntry::empty(); 3];
        for tag in [10, 20, 30] {
            Replacement::Lru.install(&mut entries, tag);
        }
        // order: 30, 20, 10
        Replacement::Lru.touch(&mut entries, 2);
        assert_eq!(vec![10, 30, 20], tags(&entries));
    }

    #[test]
    fn rrip_install_fills_empty_ways_left_to_right() {
        let mut entries = vec![CacheLineEntry::empty(); 3];
        Replacement::Rrip.install(&mut entries, 10);
        Replacement::Rrip.install(&mut entries, 20);
        assert_eq!(vec![10, 20, -1], tags(&entries));
        assert_eq!(2, entries[0].rrip);
    }

    #[test]
    fn rrip_ages_until_a_victim_appears() {
        let mut entries = vec![CacheLineEntry::empty(); 2];
        Replacement::Rrip.install(&mut entries, 10);
        Replacement::Rrip.install(&mut entries, 20);
        // both at rrip 2; next install must age everyone to 3 first
        Replacement::Rrip.install(&mut entries, 30);
        assert_eq!(vec![30, 20], tags(&entries));
        assert_eq!(3, entries[1].rrip);
    }

    #[test]
    fn rrip_touch_protects_a_hot_entry() {
        let mut entries = vec![CacheLineEntry::empty(); 2];
        Replacement::Rrip.install(&mut entries, 10);
        Replacement::Rrip.install(&mut entries, 20);
        Replacement::Rrip.touch(&mut entries, 0);
        // entry 0 is at rrip 0; aging reaches entry 1 first
        Replacement::Rrip.install(&mut entries, 30);
        assert_eq!(vec![10, 30], tags(&entries));
    }
}
