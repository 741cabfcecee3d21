use log::info;
use serde::Serialize;

use crate::mem::demand::{AddrMatrix, Cycle};
use crate::mem::double_buffer::{CycleTotals, DoubleBuffer, DoubleBufferConfig};
use crate::mem::dram::Dram;
use crate::mem::error::MemError;
use crate::mem::llc::{LlcConfig, LlcStats};
use crate::sim::config::SimConfig;
use crate::sim::workload::{split_rows, LayerTraffic, WorkloadConfig};

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub name: String,
    /// Layer latency: the slowest PE's cycle count for this layer.
    pub cycles: Cycle,
    pub pe_totals: Vec<CycleTotals>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub layers: Vec<LayerReport>,
    pub pe_totals: Vec<CycleTotals>,
    pub llc: LlcStats,
}

/// Whole-run driver: one shared LLC behind `num_pe` scratchpad orchestrators,
/// fed layer by layer from the workload description.
pub struct Sim {
    sim_config: SimConfig,
    workload: WorkloadConfig,
    buffer_config: DoubleBufferConfig,
    memory_system: Vec<DoubleBuffer>,
}

impl Sim {
    pub fn new(
        sim_config: SimConfig,
        llc_config: LlcConfig,
        buffer_config: DoubleBufferConfig,
        dram: Dram,
        workload: WorkloadConfig,
    ) -> Result<Self, MemError> {
        let num_pe = sim_config.num_pe.max(1);
        let mut memory_system = Vec::with_capacity(num_pe);
        memory_system.push(DoubleBuffer::new(&buffer_config, &llc_config, dram)?);
        for _ in 1..num_pe {
            let llc = memory_system[0].llc();
            memory_system.push(DoubleBuffer::with_shared_llc(&buffer_config, llc)?);
        }
        Ok(Self {
            sim_config,
            workload,
            buffer_config,
            memory_system,
        })
    }

    pub fn num_pe(&self) -> usize {
        self.memory_system.len()
    }

    pub fn run(&mut self) -> Result<SimReport, MemError> {
        let mut layers = Vec::with_capacity(self.workload.layers.len());
        for spec in self.workload.layers.clone() {
            let traffic = spec.lower(
                self.buffer_config.word_size,
                self.workload.offsets,
                self.sim_config.dataflow,
            )?;
            layers.push(self.run_layer(&traffic)?);
        }

        let report = SimReport {
            layers,
            pe_totals: self.memory_system.iter().map(|pe| pe.totals()).collect(),
            llc: self.memory_system[0].llc_stats(),
        };
        self.memory_system[0].llc().borrow().log_stats();
        Ok(report)
    }

    /// Service one layer, its compute rows split contiguously across the PEs.
    /// Each operand chunk is repacked into bandwidth-wide demand rows so the
    /// demand walk and the buffer's fetch lines stay index-aligned, and the
    /// three streams are padded to a common row count.
    fn run_layer(&mut self, traffic: &LayerTraffic) -> Result<LayerReport, MemError> {
        let num_pe = self.memory_system.len();
        let ifmap_chunks = split_rows(&traffic.ifmap, num_pe);
        let filter_chunks = split_rows(&traffic.filter, num_pe);
        let ofmap_chunks = split_rows(&traffic.ofmap, num_pe);
        let orientation = traffic.dataflow.orientation();

        let mut pe_totals = Vec::with_capacity(num_pe);
        let mut cycles: Cycle = 0;
        for (pe_id, pe) in self.memory_system.iter_mut().enumerate() {
            if ofmap_chunks[pe_id].rows() == 0 {
                pe_totals.push(CycleTotals::default());
                continue;
            }
            let ifmap = ifmap_chunks[pe_id].reshaped_lines(self.buffer_config.ifmap_bandwidth as usize);
            let filter =
                filter_chunks[pe_id].reshaped_lines(self.buffer_config.filter_bandwidth as usize);
            let ofmap = ofmap_chunks[pe_id].reshaped_lines(self.buffer_config.ofmap_bandwidth as usize);
            let rows = ifmap.rows().max(filter.rows()).max(ofmap.rows());
            let ifmap = pad_rows(ifmap, rows);
            let filter = pad_rows(filter, rows);
            let ofmap = pad_rows(ofmap, rows);

            let before = pe.totals();
            pe.install_fetch_schedules(&ifmap, &filter, &ofmap);
            let after = pe.service_all(&ifmap, &filter, &ofmap, orientation)?;
            let delta = CycleTotals {
                total_cycles: after.total_cycles - before.total_cycles,
                stall_cycles: after.stall_cycles - before.stall_cycles,
            };
            cycles = cycles.max(delta.total_cycles);
            pe_totals.push(delta);
        }

        info!("layer '{}': {} cycles across {} PEs", traffic.name, cycles, num_pe);
        Ok(LayerReport {
            name: traffic.name.clone(),
            cycles,
            pe_totals,
        })
    }
}

fn pad_rows(matrix: AddrMatrix, rows: usize) -> AddrMatrix {
    if matrix.rows() >= rows {
        return matrix;
    }
    let mut out = AddrMatrix::new(rows, matrix.cols());
    for i in 0..matrix.rows() {
        out.row_mut(i).copy_from_slice(matrix.row(i));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::workload::LayerSpec;

    fn small_sim(num_pe: usize) -> Sim {
        let sim_config = SimConfig {
            num_pe,
            ..SimConfig::default()
        };
        let llc_config = LlcConfig::default();
        let buffer_config = DoubleBufferConfig {
            word_size: 4,
            ifmap_size_bytes: 256,
            filter_size_bytes: 256,
            ofmap_size_bytes: 256,
            ifmap_bandwidth: 8,
            filter_bandwidth: 8,
            ofmap_bandwidth: 8,
            ..DoubleBufferConfig::default()
        };
        let workload = WorkloadConfig {
            layers: vec![
                LayerSpec {
                    name: "conv1".to_string(),
                    ..LayerSpec::default()
                },
                LayerSpec {
                    name: "conv2".to_string(),
                    ifmap_rows: 6,
                    ifmap_cols: 6,
                    ..LayerSpec::default()
                },
            ],
            ..WorkloadConfig::default()
        };
        Sim::new(sim_config, llc_config, buffer_config, Dram::default(), workload).unwrap()
    }

    #[test]
    fn reports_one_entry_per_layer() {
        let mut sim = small_sim(1);
        let report = sim.run().unwrap();
        assert_eq!(2, report.layers.len());
        assert_eq!("conv1", report.layers[0].name);
        assert!(report.layers.iter().all(|l| l.cycles > 0));
        // single PE: the run totals are the sum of the layer deltas
        let summed: Cycle = report.layers.iter().map(|l| l.cycles).sum();
        assert_eq!(summed, report.pe_totals[0].total_cycles);
    }

    #[test]
    fn pes_split_the_work_and_share_the_llc() {
        let mut one = small_sim(1);
        let mut four = small_sim(4);
        let single = one.run().unwrap();
        let split = four.run().unwrap();
        assert_eq!(4, split.pe_totals.len());
        // every PE serviced a share of each layer
        for layer in &split.layers {
            assert!(layer.pe_totals.iter().all(|t| t.total_cycles > 0));
        }
        // all four PEs drain through the one shared cache
        let total = |s: &LlcStats| s.read_hit + s.read_miss_all + s.write_hit + s.write_miss_all;
        assert!(total(&single.llc) > 0);
        assert!(total(&split.llc) > 0);
    }

    #[test]
    fn more_pes_than_rows_leaves_idle_pes() {
        let sim_config = SimConfig {
            num_pe: 8,
            ..SimConfig::default()
        };
        let workload = WorkloadConfig {
            layers: vec![LayerSpec {
                ifmap_rows: 4,
                ifmap_cols: 4,
                ..LayerSpec::default()
            }],
            ..WorkloadConfig::default()
        };
        let mut sim = Sim::new(
            sim_config,
            LlcConfig::default(),
            DoubleBufferConfig {
                word_size: 4,
                ifmap_size_bytes: 256,
                filter_size_bytes: 256,
                ofmap_size_bytes: 256,
                ifmap_bandwidth: 8,
                filter_bandwidth: 8,
                ofmap_bandwidth: 8,
                ..DoubleBufferConfig::default()
            },
            Dram::default(),
            workload,
        )
        .unwrap();
        let report = sim.run().unwrap();
        // 2x2 ofmap walk over 8 PEs: the trailing four sit idle
        let layer = &report.layers[0];
        assert_eq!(8, layer.pe_totals.len());
        assert!(layer.pe_totals[..4].iter().all(|t| t.total_cycles > 0));
        assert!(layer.pe_totals[4..].iter().all(|t| t.total_cycles == 0));
    }
}
