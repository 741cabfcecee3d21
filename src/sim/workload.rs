//! Synthetic per-layer operand traffic for the demo driver.
//!
//! Stands in for the dataflow scheduler: each convolution layer is lowered to
//! three demand/fetch address matrices (ifmap, filter, ofmap) over disjoint
//! address regions, one row per compute step. The filter walk is shorter than
//! the ofmap walk and gets padded with no-request rows so the three streams
//! stay in lock-step.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use crate::mem::demand::{AddrMatrix, Address, NO_REQUEST};
use crate::mem::double_buffer::Dataflow;
use crate::mem::error::MemError;

/// Base address of each operand region.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RegionOffsets {
    pub ifmap: Address,
    pub filter: Address,
    pub ofmap: Address,
}

impl Default for RegionOffsets {
    fn default() -> Self {
        Self {
            ifmap: 0,
            filter: 10_000_000,
            ofmap: 20_000_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayerSpec {
    pub name: String,
    pub ifmap_rows: i64,
    pub ifmap_cols: i64,
    pub filter_rows: i64,
    pub filter_cols: i64,
    pub num_channels: i64,
    pub num_filters: i64,
    pub row_stride: i64,
    pub col_stride: i64,
    /// Topology-listed ofmap dims. When they exceed the valid-convolution
    /// fit, the overhanging window taps lower to no-request slots.
    pub ofmap_rows: Option<i64>,
    pub ofmap_cols: Option<i64>,
    pub dataflow: Option<Dataflow>,
    /// When set, the compute-step order of all three streams is permuted with
    /// this seed, modeling a non-streaming schedule.
    pub shuffle_seed: Option<u64>,
}

impl Default for LayerSpec {
    fn default() -> Self {
        Self {
            name: "conv".to_string(),
            ifmap_rows: 8,
            ifmap_cols: 8,
            filter_rows: 3,
            filter_cols: 3,
            num_channels: 1,
            num_filters: 4,
            row_stride: 1,
            col_stride: 1,
            ofmap_rows: None,
            ofmap_cols: None,
            dataflow: None,
            shuffle_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub offsets: RegionOffsets,
    pub layers: Vec<LayerSpec>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            offsets: RegionOffsets::default(),
            layers: vec![LayerSpec::default()],
        }
    }
}

/// One layer lowered to lock-step operand matrices.
#[derive(Debug, Clone)]
pub struct LayerTraffic {
    pub name: String,
    pub dataflow: Dataflow,
    pub ifmap: AddrMatrix,
    pub filter: AddrMatrix,
    pub ofmap: AddrMatrix,
}

impl LayerSpec {
    fn ofmap_dims(&self) -> Result<(i64, i64), MemError> {
        if self.filter_rows <= 0
            || self.filter_cols <= 0
            || self.num_channels <= 0
            || self.num_filters <= 0
            || self.row_stride <= 0
            || self.col_stride <= 0
        {
            return Err(MemError::config(format!(
                "layer '{}' has a non-positive dimension",
                self.name
            )));
        }
        let rows = self
            .ofmap_rows
            .unwrap_or((self.ifmap_rows - self.filter_rows) / self.row_stride + 1);
        let cols = self
            .ofmap_cols
            .unwrap_or((self.ifmap_cols - self.filter_cols) / self.col_stride + 1);
        if rows <= 0 || cols <= 0 {
            return Err(MemError::config(format!(
                "layer '{}': filter does not fit the ifmap",
                self.name
            )));
        }
        Ok((rows, cols))
    }

    /// Lower the layer to its three operand matrices. Element addresses walk
    /// each operand region in channel-major layout; out-of-window ifmap taps
    /// become no-request slots.
    pub fn lower(
        &self,
        word_size: i64,
        offsets: RegionOffsets,
        default_dataflow: Dataflow,
    ) -> Result<LayerTraffic, MemError> {
        if word_size <= 0 {
            return Err(MemError::config("word size must be > 0"));
        }
        let (ofmap_rows, ofmap_cols) = self.ofmap_dims()?;
        let window = self.filter_rows * self.filter_cols * self.num_channels;
        let ofmap_px = ofmap_rows * ofmap_cols;

        let mut ifmap = AddrMatrix::new(ofmap_px as usize, window as usize);
        for i in 0..ofmap_px {
            for j in 0..window {
                ifmap.set(
                    i as usize,
                    j as usize,
                    self.ifmap_elem_addr(i, j, ofmap_cols, word_size, offsets.ifmap),
                );
            }
        }

        // One filter row per window tap, then no-request padding out to the
        // ofmap walk so the streams stay row-aligned.
        let filter_walk_rows = window.min(ofmap_px);
        let mut filter = AddrMatrix::new(ofmap_px as usize, self.num_filters as usize);
        for i in 0..filter_walk_rows {
            for j in 0..self.num_filters {
                let internal = j * self.filter_rows * self.filter_cols * self.num_channels + i;
                filter.set(
                    i as usize,
                    j as usize,
                    internal * word_size + offsets.filter,
                );
            }
        }

        let mut ofmap = AddrMatrix::new(ofmap_px as usize, self.num_filters as usize);
        for i in 0..ofmap_px {
            for j in 0..self.num_filters {
                let internal = self.num_filters * i + j;
                ofmap.set(
                    i as usize,
                    j as usize,
                    internal * word_size + offsets.ofmap,
                );
            }
        }

        let (ifmap, filter, ofmap) = match self.shuffle_seed {
            Some(seed) => {
                let mut order: Vec<usize> = (0..ofmap_px as usize).collect();
                order.shuffle(&mut StdRng::seed_from_u64(seed));
                (
                    permute_rows(&ifmap, &order),
                    permute_rows(&filter, &order),
                    permute_rows(&ofmap, &order),
                )
            }
            None => (ifmap, filter, ofmap),
        };

        debug!(
            "layer '{}': {} compute rows, window {}, {} filters",
            self.name, ofmap_px, window, self.num_filters
        );

        Ok(LayerTraffic {
            name: self.name.clone(),
            dataflow: self.dataflow.unwrap_or(default_dataflow),
            ifmap,
            filter,
            ofmap,
        })
    }

    fn ifmap_elem_addr(
        &self,
        i: i64,
        j: i64,
        ofmap_cols: i64,
        word_size: i64,
        offset: Address,
    ) -> Address {
        let channel = self.num_channels;
        let i_row = (i / ofmap_cols) * self.row_stride;
        let i_col = (i % ofmap_cols) * self.col_stride;
        let window_addr = i_row * self.ifmap_cols * channel + i_col * channel;

        let c_row = j / (self.filter_cols * channel);
        let k = j % (self.filter_cols * channel);
        let c_col = k / channel;
        let c_ch = k % channel;

        if c_row + i_row >= self.ifmap_rows || c_col + i_col >= self.ifmap_cols {
            return NO_REQUEST;
        }
        let internal = c_row * self.ifmap_cols * channel + c_col * channel + c_ch;
        (internal + window_addr) * word_size + offset
    }
}

fn permute_rows(matrix: &AddrMatrix, order: &[usize]) -> AddrMatrix {
    let mut out = AddrMatrix::new(matrix.rows(), matrix.cols());
    for (dst, &src) in order.iter().enumerate() {
        out.row_mut(dst).copy_from_slice(matrix.row(src));
    }
    out
}

/// Split a demand matrix into `parts` contiguous row chunks, one per PE.
/// Surplus rows go to the leading chunks; a part can come out empty when
/// there are more PEs than rows.
pub fn split_rows(matrix: &AddrMatrix, parts: usize) -> Vec<AddrMatrix> {
    let parts = parts.max(1);
    let rows = matrix.rows();
    let base = rows / parts;
    let extra = rows % parts;

    let mut chunks = Vec::with_capacity(parts);
    let mut start = 0;
    for p in 0..parts {
        let len = base + usize::from(p < extra);
        let mut chunk = AddrMatrix::new(len, matrix.cols());
        for i in 0..len {
            chunk.row_mut(i).copy_from_slice(matrix.row(start + i));
        }
        chunks.push(chunk);
        start += len;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layer_lowers_to_lockstep_matrices() {
        let spec = LayerSpec::default();
        let traffic = spec
            .lower(4, RegionOffsets::default(), Dataflow::Ws)
            .unwrap();
        // 8x8 ifmap, 3x3 filter, stride 1 -> 6x6 ofmap walk
        assert_eq!(36, traffic.ifmap.rows());
        assert_eq!(36, traffic.filter.rows());
        assert_eq!(36, traffic.ofmap.rows());
        assert_eq!(9, traffic.ifmap.cols());
        assert_eq!(4, traffic.ofmap.cols());
    }

    #[test]
    fn operand_regions_do_not_overlap() {
        let traffic = LayerSpec::default()
            .lower(4, RegionOffsets::default(), Dataflow::Ws)
            .unwrap();
        let offsets = RegionOffsets::default();
        for i in 0..traffic.ifmap.rows() {
            for &a in traffic.ifmap.row(i) {
                assert!(a == NO_REQUEST || (a >= offsets.ifmap && a < offsets.filter));
            }
        }
        for i in 0..traffic.filter.rows() {
            for &a in traffic.filter.row(i) {
                assert!(a == NO_REQUEST || (a >= offsets.filter && a < offsets.ofmap));
            }
        }
        for i in 0..traffic.ofmap.rows() {
            for &a in traffic.ofmap.row(i) {
                assert!(a >= offsets.ofmap);
            }
        }
    }

    #[test]
    fn corner_tap_reads_the_last_ifmap_element() {
        // Last ofmap pixel, last window tap lands on ifmap (7, 7).
        let spec = LayerSpec::default();
        let traffic = spec.lower(1, RegionOffsets::default(), Dataflow::Ws).unwrap();
        let last_row = traffic.ifmap.rows() - 1;
        let row = traffic.ifmap.row(last_row);
        assert_eq!(63, *row.last().unwrap());
    }

    #[test]
    fn taps_outside_the_ifmap_are_padding() {
        // Topology lists a 2x2 ofmap over a 4x4 ifmap with stride 2; the
        // second ofmap column's 3x3 window sticks out past column 3.
        let spec = LayerSpec {
            ifmap_rows: 4,
            ifmap_cols: 4,
            row_stride: 2,
            col_stride: 2,
            ofmap_rows: Some(2),
            ofmap_cols: Some(2),
            ..LayerSpec::default()
        };
        let traffic = spec.lower(1, RegionOffsets::default(), Dataflow::Ws).unwrap();
        assert_eq!(4, traffic.ifmap.rows());
        assert!(traffic.ifmap.row(0).iter().all(|&a| a != NO_REQUEST));
        assert!(traffic.ifmap.row(1).iter().any(|&a| a == NO_REQUEST));
    }

    #[test]
    fn filter_walk_is_padded_to_the_ofmap_walk() {
        let traffic = LayerSpec::default()
            .lower(4, RegionOffsets::default(), Dataflow::Ws)
            .unwrap();
        // 9 window taps, 36 compute rows: rows 9.. are all padding
        assert!(traffic.filter.row(8).iter().all(|&a| a != NO_REQUEST));
        for i in 9..traffic.filter.rows() {
            assert!(traffic.filter.row(i).iter().all(|&a| a == NO_REQUEST));
        }
    }

    #[test]
    fn shuffle_is_deterministic_and_row_consistent() {
        let spec = LayerSpec {
            shuffle_seed: Some(7),
            ..LayerSpec::default()
        };
        let a = spec.lower(4, RegionOffsets::default(), Dataflow::Ws).unwrap();
        let b = spec.lower(4, RegionOffsets::default(), Dataflow::Ws).unwrap();
        assert_eq!(a.ifmap, b.ifmap);
        assert_eq!(a.ofmap, b.ofmap);

        // Same permutation on every stream: the ofmap row defines the
        // original index, and the ifmap row must match it.
        let plain = LayerSpec::default()
            .lower(4, RegionOffsets::default(), Dataflow::Ws)
            .unwrap();
        let offsets = RegionOffsets::default();
        for i in 0..a.ofmap.rows() {
            let orig = ((a.ofmap.row(i)[0] - offsets.ofmap) / 4 / 4) as usize;
            assert_eq!(plain.ifmap.row(orig), a.ifmap.row(i));
        }
    }

    #[test]
    fn degenerate_layers_are_rejected() {
        let spec = LayerSpec {
            ifmap_rows: 2,
            ifmap_cols: 2,
            ..LayerSpec::default()
        };
        assert!(spec.lower(4, RegionOffsets::default(), Dataflow::Ws).is_err());
        let spec = LayerSpec {
            num_filters: 0,
            ..LayerSpec::default()
        };
        assert!(spec.lower(4, RegionOffsets::default(), Dataflow::Ws).is_err());
    }

    #[test]
    fn split_rows_distributes_the_surplus_forward() {
        let matrix = AddrMatrix::from_rows((0..7).map(|r| vec![r, r + 10]).collect());
        let chunks = split_rows(&matrix, 3);
        assert_eq!(vec![3, 2, 2], chunks.iter().map(|c| c.rows()).collect::<Vec<_>>());
        assert_eq!(&[0, 10], chunks[0].row(0));
        assert_eq!(&[3, 13], chunks[1].row(0));
        assert_eq!(&[5, 15], chunks[2].row(0));
    }
}
