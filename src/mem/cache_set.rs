use crate::mem::demand::Address;
use crate::mem::replacement::{CacheLineEntry, Replacement};

/// Result of a tag lookup in one partition of a set.
///
/// Cold misses land in a way that has never held a real tag; conflict misses
/// hit a partition whose live capacity is exhausted. The LLC charges and
/// counts the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    ColdMiss,
    ConflictMiss,
}

impl Outcome {
    pub fn is_hit(self) -> bool {
        matches!(self, Outcome::Hit)
    }
}

#[derive(Debug, Clone)]
struct Partition {
    entries: Vec<CacheLineEntry>,
    live: usize,
}

impl Partition {
    fn new(capacity: usize) -> Self {
        Self {
            entries: vec![CacheLineEntry::empty(); capacity],
            live: 0,
        }
    }
}

/// One associative set: independently-capacitated partitions of ways, each a
/// positionally-ordered entry list operated on by the replacement policy.
/// Partition capacities are fixed at construction and never change.
#[derive(Debug, Clone)]
pub struct CacheSet {
    replacement: Replacement,
    partitions: Vec<Partition>,
}

impl CacheSet {
    pub fn new(replacement: Replacement, capacities: &[usize]) -> Self {
        Self {
            replacement,
            partitions: capacities.iter().map(|&c| Partition::new(c)).collect(),
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Look up `tag` in `partition`, updating replacement state on a hit and
    /// performing eviction+installation on a miss. Reads and writes behave
    /// identically here; the caller keeps separate counters.
    pub fn lookup(&mut self, tag: Address, partition: usize) -> Outcome {
        let part = &mut self.partitions[partition];
        if part.entries.is_empty() {
            return Outcome::ConflictMiss;
        }

        if let Some(index) = part.entries.iter().position(|e| e.tag == tag) {
            self.replacement.touch(&mut part.entries, index);
            return Outcome::Hit;
        }

        let outcome = if part.live == part.entries.len() {
            Outcome::ConflictMiss
        } else {
            part.live += 1;
            Outcome::ColdMiss
        };
        self.replacement.install(&mut part.entries, tag);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheSet, Outcome};
    use crate::mem::replacement::Replacement;

    #[test]
    fn misses_are_cold_until_live_capacity_is_reached() {
        let mut set = CacheSet::new(Replacement::Rrip, &[2]);
        assert_eq!(Outcome::ColdMiss, set.lookup(1, 0));
        assert_eq!(Outcome::ColdMiss, set.lookup(2, 0));
        assert_eq!(Outcome::ConflictMiss, set.lookup(3, 0));
    }

    #[test]
    fn hit_after_install() {
        let mut set = CacheSet::new(Replacement::Lru, &[4]);
        set.lookup(7, 0);
        assert_eq!(Outcome::Hit, set.lookup(7, 0));
    }

    #[test]
    fn partitions_are_isolated() {
        let mut set = CacheSet::new(Replacement::Lru, &[1, 1]);
        set.lookup(7, 0);
        assert_eq!(Outcome::ColdMiss, set.lookup(7, 1));
        assert_eq!(Outcome::Hit, set.lookup(7, 0));
    }

    #[test]
    fn lru_working_set_at_capacity_never_conflicts_after_warmup() {
        let mut set = CacheSet::new(Replacement::Lru, &[4]);
        for tag in 0..4 {
            assert_eq!(Outcome::ColdMiss, set.lookup(tag, 0));
        }
        for _ in 0..3 {
            for tag in 0..4 {
                assert_eq!(Outcome::Hit, set.lookup(tag, 0));
            }
        }
    }
}
