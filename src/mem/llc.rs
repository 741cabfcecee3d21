use std::ops::AddAssign;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::mem::cache_set::{CacheSet, Outcome};
use crate::mem::demand::{Address, Cycle, NO_REQUEST};
use crate::mem::dram::Dram;
use crate::mem::error::MemError;
use crate::mem::replacement::Replacement;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LlcStats {
    pub read_hit: u64,
    pub read_miss_all: u64,
    pub read_miss_conflict: u64,
    pub write_hit: u64,
    pub write_miss_all: u64,
    pub write_miss_conflict: u64,
}

impl AddAssign<&LlcStats> for LlcStats {
    fn add_assign(&mut self, other: &LlcStats) {
        self.read_hit = self.read_hit.saturating_add(other.read_hit);
        self.read_miss_all = self.read_miss_all.saturating_add(other.read_miss_all);
        self.read_miss_conflict = self
            .read_miss_conflict
            .saturating_add(other.read_miss_conflict);
        self.write_hit = self.write_hit.saturating_add(other.write_hit);
        self.write_miss_all = self.write_miss_all.saturating_add(other.write_miss_all);
        self.write_miss_conflict = self
            .write_miss_conflict
            .saturating_add(other.write_miss_conflict);
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlcConfig {
    pub size_kb: i64,
    pub cache_line_size: i64,
    pub hit_latency: Cycle,
    pub set_associativity: u32,
    /// Comma-separated way capacities, one per partition.
    pub partition: String,
    pub replacement: Replacement,
    pub always_hit: bool,
    pub bypassing: bool,
}

impl Default for LlcConfig {
    fn default() -> Self {
        Self {
            size_kb: 1024,
            cache_line_size: 64,
            hit_latency: 1,
            set_associativity: 4,
            partition: "16".to_string(),
            replacement: Replacement::Rrip,
            always_hit: false,
            bypassing: false,
        }
    }
}

impl LlcConfig {
    pub fn total_size_bytes(&self) -> i64 {
        self.size_kb * 1024
    }

    /// Parse and sanity-check the partition capacity list.
    pub fn partition_capacities(&self) -> Result<Vec<usize>, MemError> {
        let mut capacities = Vec::new();
        for field in self.partition.split(',') {
            let cap: usize = field
                .trim()
                .parse()
                .map_err(|_| MemError::config(format!("bad partition entry '{}'", field)))?;
            if cap == 0 {
                return Err(MemError::config("partition capacity must be > 0"));
            }
            capacities.push(cap);
        }
        let ways = 1usize << self.set_associativity.min(63);
        let total: usize = capacities.iter().sum();
        if total > ways {
            return Err(MemError::config(format!(
                "partition capacities sum to {} but associativity {} provides {} ways",
                total, self.set_associativity, ways
            )));
        }
        Ok(capacities)
    }
}

#[derive(Debug, Clone, Copy)]
enum Access {
    Read,
    Write,
}

/// Shared last-level cache in front of DRAM.
///
/// No data is stored; each set tracks tags and replacement state only. A
/// single remembered line address coalesces back-to-back same-line accesses
/// within a burst, in the style of one outstanding MSHR.
#[derive(Debug)]
pub struct Llc {
    sets: Vec<CacheSet>,
    hit_latency: Cycle,
    miss_latency: Cycle,
    set_bits: u32,
    offset_bits: u32,
    num_partitions: usize,
    always_hit: bool,
    bypassing: bool,
    stats: LlcStats,
    last_addr_no_offset: Option<Address>,
}

impl Llc {
    pub fn new(config: &LlcConfig, dram: Dram) -> Result<Self, MemError> {
        if config.cache_line_size <= 0 || !(config.cache_line_size as u64).is_power_of_two() {
            return Err(MemError::config(format!(
                "cache line size {} must be a positive power of two",
                config.cache_line_size
            )));
        }
        if config.total_size_bytes() <= 0 {
            return Err(MemError::config("llc size must be > 0"));
        }
        let capacities = config.partition_capacities()?;

        // The original treats the associativity as a power-of-two exponent
        // when sizing the set array, then as a per-partition way budget.
        // Preserved as-is for config compatibility.
        let ways = 1i64 << config.set_associativity.min(62);
        let number_of_sets =
            (config.total_size_bytes() / (config.cache_line_size * ways)).max(1) as usize;
        let set_bits = number_of_sets.ilog2();
        let offset_bits = config.cache_line_size.ilog2();

        debug!(
            "llc: {} sets, {} set bits, {} offset bits, partitions {:?}",
            number_of_sets, set_bits, offset_bits, capacities
        );

        let sets = (0..number_of_sets)
            .map(|_| CacheSet::new(config.replacement, &capacities))
            .collect();

        Ok(Self {
            sets,
            hit_latency: config.hit_latency,
            miss_latency: dram.latency(),
            set_bits,
            offset_bits,
            num_partitions: capacities.len(),
            always_hit: config.always_hit,
            bypassing: config.bypassing,
            stats: LlcStats::default(),
            last_addr_no_offset: None,
        })
    }

    pub fn hit_latency(&self) -> Cycle {
        self.hit_latency
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn stats(&self) -> LlcStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = LlcStats::default();
    }

    pub fn service_read<I>(
        &mut self,
        addrs: I,
        incoming_cycle: Cycle,
        partition: usize,
        reset: bool,
    ) -> Cycle
    where
        I: IntoIterator<Item = Address>,
    {
        self.service(Access::Read, addrs, incoming_cycle, partition, reset)
    }

    pub fn service_write<I>(
        &mut self,
        addrs: I,
        incoming_cycle: Cycle,
        partition: usize,
        reset: bool,
    ) -> Cycle
    where
        I: IntoIterator<Item = Address>,
    {
        self.service(Access::Write, addrs, incoming_cycle, partition, reset)
    }

    fn service<I>(
        &mut self,
        access: Access,
        addrs: I,
        incoming_cycle: Cycle,
        partition: usize,
        reset: bool,
    ) -> Cycle
    where
        I: IntoIterator<Item = Address>,
    {
        if reset {
            self.last_addr_no_offset = None;
        }

        // Bypass charges the hit latency once per burst (on the resetting
        // access) and nothing afterwards, modeling one wide open transaction.
        if self.bypassing {
            return if reset {
                incoming_cycle + self.hit_latency
            } else {
                incoming_cycle
            };
        }

        let mut offset: Cycle = 0;
        for addr in addrs {
            if addr == NO_REQUEST {
                continue;
            }

            let addr_no_offset = addr >> self.offset_bits;
            if Some(addr_no_offset) == self.last_addr_no_offset {
                continue;
            }

            let outcome = if self.always_hit {
                Outcome::Hit
            } else {
                let set_index = self.set_index(addr);
                let tag = self.tag(addr);
                self.sets[set_index].lookup(tag, partition)
            };

            match outcome {
                Outcome::Hit => {
                    offset += self.hit_latency;
                    match access {
                        Access::Read => self.stats.read_hit += 1,
                        Access::Write => self.stats.write_hit += 1,
                    }
                }
                // Cold fills are covered by prefetch and only cost the hit
                // latency; conflict evictions pay the full DRAM round trip.
                Outcome::ColdMiss => {
                    offset += self.hit_latency;
                    match access {
                        Access::Read => self.stats.read_miss_all += 1,
                        Access::Write => self.stats.write_miss_all += 1,
                    }
                }
                Outcome::ConflictMiss => {
                    offset += self.miss_latency;
                    match access {
                        Access::Read => {
                            self.stats.read_miss_all += 1;
                            self.stats.read_miss_conflict += 1;
                        }
                        Access::Write => {
                            self.stats.write_miss_all += 1;
                            self.stats.write_miss_conflict += 1;
                        }
                    }
                }
            }
            self.last_addr_no_offset = Some(addr_no_offset);
        }
        incoming_cycle + offset
    }

    fn set_index(&self, addr: Address) -> usize {
        let index_bits = (1i64 << self.set_bits) - 1;
        ((addr >> self.offset_bits) & index_bits) as usize
    }

    fn tag(&self, addr: Address) -> Address {
        addr >> (self.set_bits + self.offset_bits)
    }

    pub fn log_stats(&self) {
        info!(
            "llc: read hit {} / miss {} (conflict {}), write hit {} / miss {} (conflict {})",
            self.stats.read_hit,
            self.stats.read_miss_all,
            self.stats.read_miss_conflict,
            self.stats.write_hit,
            self.stats.write_miss_all,
            self.stats.write_miss_conflict,
        );
    }
}
