use serde::Deserialize;

use crate::mem::demand::Cycle;

/// Fixed-latency backing store. Every LLC miss that has to go out to memory
/// is charged this latency; no banking or row-buffer state is modeled.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Dram {
    pub latency: Cycle,
}

impl Default for Dram {
    fn default() -> Self {
        Self { latency: 40 }
    }
}

impl Dram {
    pub fn new(latency: Cycle) -> Self {
        Self { latency }
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }
}
