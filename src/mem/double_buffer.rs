use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::mem::demand::{AddrMatrix, Cycle};
use crate::mem::dram::Dram;
use crate::mem::error::MemError;
use crate::mem::llc::{Llc, LlcConfig, LlcStats};
use crate::mem::scratchpad::{BufferConfig, ScratchpadBuffer};

/// Systolic dataflow variant, decided once per layer. It only matters to the
/// memory model through the burst orientation of the three operand streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataflow {
    Os,
    Is,
    #[default]
    Ws,
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orientation {
    pub trans_ifmap: bool,
    pub trans_filter: bool,
    pub trans_ofmap: bool,
}

impl Dataflow {
    pub fn orientation(self) -> Orientation {
        match self {
            Dataflow::Os | Dataflow::Pool => Orientation {
                trans_ifmap: true,
                trans_filter: true,
                trans_ofmap: false,
            },
            Dataflow::Is => Orientation {
                trans_ifmap: true,
                trans_filter: false,
                trans_ofmap: true,
            },
            Dataflow::Ws => Orientation {
                trans_ifmap: false,
                trans_filter: false,
                trans_ofmap: false,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DoubleBufferConfig {
    pub word_size: i64,
    pub ifmap_size_bytes: i64,
    pub filter_size_bytes: i64,
    pub ofmap_size_bytes: i64,
    pub rd_active_frac: f32,
    pub wr_active_frac: f32,
    pub ifmap_bandwidth: i64,
    pub filter_bandwidth: i64,
    pub ofmap_bandwidth: i64,
    pub hit_latency: Cycle,
    pub use_llc_partition: bool,
}

impl Default for DoubleBufferConfig {
    fn default() -> Self {
        Self {
            word_size: 4,
            ifmap_size_bytes: 256 * 1024,
            filter_size_bytes: 256 * 1024,
            ofmap_size_bytes: 128 * 1024,
            rd_active_frac: 0.5,
            wr_active_frac: 0.5,
            ifmap_bandwidth: 32,
            filter_bandwidth: 32,
            ofmap_bandwidth: 32,
            hit_latency: 1,
            use_llc_partition: false,
        }
    }
}

impl DoubleBufferConfig {
    fn buffer_config(&self, size_bytes: i64, active_frac: f32, bandwidth: i64) -> BufferConfig {
        BufferConfig {
            size_bytes,
            word_size: self.word_size,
            active_frac,
            req_gen_bandwidth: bandwidth,
            hit_latency: self.hit_latency,
        }
    }
}

/// Accumulated cycle counts of one orchestrator, across all layer passes
/// serviced in its lifetime.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CycleTotals {
    pub total_cycles: Cycle,
    pub stall_cycles: Cycle,
}

/// Per-PE orchestrator of the three operand scratchpads.
///
/// Drives the ifmap, filter and ofmap buffers in lock-step per demand row and
/// propagates the worst per-row stall forward into the next row's arrival
/// cycle. The LLC is either owned or shared with sibling PEs.
pub struct DoubleBuffer {
    ifmap: ScratchpadBuffer,
    filter: ScratchpadBuffer,
    ofmap: ScratchpadBuffer,
    llc: Rc<RefCell<Llc>>,
    use_llc_partition: bool,
    total_cycles: Cycle,
    stall_cycles: Cycle,
}

impl DoubleBuffer {
    /// Build an orchestrator owning a fresh LLC.
    pub fn new(
        config: &DoubleBufferConfig,
        llc_config: &LlcConfig,
        dram: Dram,
    ) -> Result<Self, MemError> {
        let llc = Rc::new(RefCell::new(Llc::new(llc_config, dram)?));
        Self::with_shared_llc(config, llc)
    }

    /// Build an orchestrator sharing an existing LLC with sibling PEs.
    /// Accesses serialize through the shared cache; callers must not
    /// interleave two PEs' runs.
    pub fn with_shared_llc(
        config: &DoubleBufferConfig,
        llc: Rc<RefCell<Llc>>,
    ) -> Result<Self, MemError> {
        if config.use_llc_partition && llc.borrow().num_partitions() < 2 {
            return Err(MemError::config(
                "llc partitioning enabled but fewer than two partitions configured",
            ));
        }
        let ifmap = ScratchpadBuffer::read(
            Rc::clone(&llc),
            &config.buffer_config(
                config.ifmap_size_bytes,
                config.rd_active_frac,
                config.ifmap_bandwidth,
            ),
        )?;
        let filter = ScratchpadBuffer::read(
            Rc::clone(&llc),
            &config.buffer_config(
                config.filter_size_bytes,
                config.rd_active_frac,
                config.filter_bandwidth,
            ),
        )?;
        let ofmap = ScratchpadBuffer::write(
            Rc::clone(&llc),
            &config.buffer_config(
                config.ofmap_size_bytes,
                config.wr_active_frac,
                config.ofmap_bandwidth,
            ),
        )?;
        Ok(Self {
            ifmap,
            filter,
            ofmap,
            llc,
            use_llc_partition: config.use_llc_partition,
            total_cycles: 0,
            stall_cycles: 0,
        })
    }

    pub fn llc(&self) -> Rc<RefCell<Llc>> {
        Rc::clone(&self.llc)
    }

    pub fn llc_stats(&self) -> LlcStats {
        self.llc.borrow().stats()
    }

    pub fn totals(&self) -> CycleTotals {
        CycleTotals {
            total_cycles: self.total_cycles,
            stall_cycles: self.stall_cycles,
        }
    }

    pub fn total_cycles(&self) -> Cycle {
        self.total_cycles
    }

    pub fn stall_cycles(&self) -> Cycle {
        self.stall_cycles
    }

    pub fn ifmap_buffer(&self) -> &ScratchpadBuffer {
        &self.ifmap
    }

    pub fn filter_buffer(&self) -> &ScratchpadBuffer {
        &self.filter
    }

    pub fn ofmap_buffer(&self) -> &ScratchpadBuffer {
        &self.ofmap
    }

    /// Install the per-operand fetch schedules for the next layer pass.
    pub fn install_fetch_schedules(
        &mut self,
        ifmap: &AddrMatrix,
        filter: &AddrMatrix,
        ofmap: &AddrMatrix,
    ) {
        self.ifmap.install_fetch_schedule(ifmap);
        self.filter.install_fetch_schedule(filter);
        self.ofmap.install_fetch_schedule(ofmap);
    }

    /// Walk every ofmap demand row through the three buffers, propagating
    /// the worst per-row stall into the next row's arrival cycle. Totals
    /// accumulate across calls.
    pub fn service_all(
        &mut self,
        ifmap_demand: &AddrMatrix,
        filter_demand: &AddrMatrix,
        ofmap_demand: &AddrMatrix,
        orientation: Orientation,
    ) -> Result<CycleTotals, MemError> {
        let rows = ofmap_demand.rows();
        for (name, demand) in [("ifmap", ifmap_demand), ("filter", filter_demand)] {
            if demand.rows() < rows {
                debug!("{} demand matrix shorter than ofmap: {}", name, demand.rows());
                return Err(MemError::RowOutOfRange {
                    row: rows.saturating_sub(1),
                    rows: demand.rows(),
                });
            }
        }

        let ifmap_hit = self.ifmap.hit_latency();
        // The original reads the filter latency off the ifmap buffer; both
        // buffers are constructed with the same latency.
        let filter_hit = self.ifmap.hit_latency();
        let filter_partition = if self.use_llc_partition { 1 } else { 0 };

        let mut current_stall: Cycle = 0;
        let mut last_ofmap_out: Cycle = 0;

        for i in 0..rows {
            let arrival = 1 + i as Cycle + current_stall;

            let ifmap_out = self
                .ifmap
                .service_row(i, arrival, 0, orientation.trans_ifmap)?;
            let ifmap_stall = ifmap_out - arrival - ifmap_hit;

            let filter_out =
                self.filter
                    .service_row(i, arrival, filter_partition, orientation.trans_filter)?;
            let filter_stall = filter_out - arrival - filter_hit;

            let ofmap_out = self
                .ofmap
                .service_row(i, arrival, 0, orientation.trans_ofmap)?;
            let ofmap_stall = ofmap_out - arrival - 1;

            current_stall += ifmap_stall.max(filter_stall).max(ofmap_stall);
            last_ofmap_out = ofmap_out;
        }

        self.stall_cycles += current_stall;
        self.total_cycles += last_ofmap_out;

        info!(
            "serviced {} rows: {} stall cycles this pass, totals {:?}",
            rows,
            current_stall,
            self.totals()
        );
        Ok(self.totals())
    }
}
