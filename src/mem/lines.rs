use std::collections::BTreeSet;

use log::debug;

use crate::mem::demand::{AddrMatrix, Address, NO_REQUEST};
use crate::mem::error::MemError;

/// Capacity-derived line budget of one scratchpad buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferGeometry {
    pub bandwidth: usize,
    pub active_elems: usize,
    pub prefetch_elems: usize,
    pub max_active_lines: usize,
    pub max_prefetch_lines: usize,
}

impl BufferGeometry {
    pub fn new(
        size_bytes: i64,
        word_size: i64,
        active_frac: f32,
        bandwidth: i64,
    ) -> Result<Self, MemError> {
        if word_size <= 0 {
            return Err(MemError::geometry("word size must be > 0"));
        }
        if bandwidth <= 0 {
            return Err(MemError::geometry("request-generation bandwidth must be > 0"));
        }
        if !(active_frac > 0.0 && active_frac < 1.0) {
            return Err(MemError::geometry(format!(
                "active buffer fraction {} outside (0, 1)",
                active_frac
            )));
        }
        let total_elems = size_bytes / word_size;
        if total_elems < bandwidth {
            return Err(MemError::geometry(format!(
                "buffer of {} elements is smaller than one {}-element burst",
                total_elems, bandwidth
            )));
        }
        let bandwidth = bandwidth as usize;
        let active_elems = (total_elems as f64 * active_frac as f64) as usize;
        let prefetch_elems = total_elems as usize - active_elems;
        let max_active_lines = (active_elems + bandwidth - 1) / bandwidth;
        let max_prefetch_lines = (prefetch_elems + bandwidth - 1) / bandwidth;
        if max_active_lines == 0 || max_prefetch_lines == 0 {
            return Err(MemError::geometry(
                "active/prefetch split leaves an empty window",
            ));
        }
        Ok(Self {
            bandwidth,
            active_elems,
            prefetch_elems,
            max_active_lines,
            max_prefetch_lines,
        })
    }
}

/// How a demand row maps onto the compacted line list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// The fetch line held nothing but padding; the request passes through.
    Empty,
    /// Index into the compacted line list.
    Line(usize),
}

/// The double-buffer state machine over one installed fetch schedule.
///
/// Holds the compacted hashed-line list and the two circular windows, and
/// decides when a window slide (and therefore an LLC refill burst) is due.
/// The owning buffer performs the actual LLC traffic.
#[derive(Debug)]
pub struct LineSchedule {
    geometry: BufferGeometry,
    lines: Vec<BTreeSet<Address>>,
    line_of_row: Vec<usize>,
    has_content: Vec<bool>,
    num_active: usize,
    num_prefetch: usize,
    active: (usize, usize),
    prefetch: (usize, usize),
    installed: bool,
    warmed: bool,
    finished: bool,
}

impl LineSchedule {
    pub fn new(geometry: BufferGeometry) -> Self {
        Self {
            geometry,
            lines: Vec::new(),
            line_of_row: Vec::new(),
            has_content: Vec::new(),
            num_active: 0,
            num_prefetch: 0,
            active: (0, 0),
            prefetch: (0, 0),
            installed: false,
            warmed: false,
            finished: false,
        }
    }

    pub fn geometry(&self) -> &BufferGeometry {
        &self.geometry
    }

    /// Reshape `matrix` into bandwidth-wide lines and build the compacted
    /// hashed-line list. Content-free lines are dropped but keep their slot
    /// in the row-to-line map so demand-row lookups stay stable.
    pub fn install(&mut self, matrix: &AddrMatrix) {
        let fetch = matrix.reshaped_lines(self.geometry.bandwidth);

        self.lines.clear();
        self.line_of_row.clear();
        self.has_content.clear();

        let mut line_id = 0;
        for r in 0..fetch.rows() {
            let mut hashed: BTreeSet<Address> = BTreeSet::new();
            let mut has_content = false;
            for &addr in fetch.row(r) {
                if addr != NO_REQUEST {
                    has_content = true;
                }
                hashed.insert(addr);
            }
            self.line_of_row.push(line_id);
            self.has_content.push(has_content);
            if has_content {
                self.lines.push(hashed);
                line_id += 1;
            }
        }

        let num_lines = self.lines.len();
        self.num_active = num_lines.min(self.geometry.max_active_lines);
        self.num_prefetch = (num_lines - self.num_active).min(self.geometry.max_prefetch_lines);
        self.active = (0, 0);
        self.prefetch = (0, 0);
        self.installed = true;
        self.warmed = false;
        self.finished = false;

        debug!(
            "installed fetch schedule: {} rows -> {} lines ({} active / {} prefetch)",
            fetch.rows(),
            num_lines,
            self.num_active,
            self.num_prefetch
        );
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn num_rows(&self) -> usize {
        self.line_of_row.len()
    }

    pub fn line(&self, id: usize) -> &BTreeSet<Address> {
        &self.lines[id]
    }

    pub fn classify(&self, row: usize) -> Result<RowKind, MemError> {
        if !self.installed {
            return Err(MemError::ScheduleNotInstalled);
        }
        if row >= self.line_of_row.len() {
            return Err(MemError::RowOutOfRange {
                row,
                rows: self.line_of_row.len(),
            });
        }
        if self.has_content[row] {
            Ok(RowKind::Line(self.line_of_row[row]))
        } else {
            Ok(RowKind::Empty)
        }
    }

    pub fn warmed(&self) -> bool {
        self.warmed
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn mark_finished(&mut self) {
        self.finished = true;
    }

    pub fn active_start(&self) -> usize {
        self.active.0
    }

    pub fn prefetch_start(&self) -> usize {
        self.prefetch.0
    }

    /// Compacted line ids covered by the initial warm-up fetch.
    pub fn warmup_line_ids(&self) -> Vec<usize> {
        let fetch_lines = self.geometry.max_active_lines.min(self.lines.len());
        (0..fetch_lines).collect()
    }

    /// Establish the initial windows after the warm-up fetch.
    pub fn mark_warmed(&mut self) {
        self.active = (0, self.num_active);
        self.prefetch = (self.num_active, self.num_active + self.num_prefetch);
        self.warmed = true;
    }

    /// True when `line_id` is the first line of a new active window.
    pub fn is_window_boundary(&self, line_id: usize) -> bool {
        line_id != 0 && line_id % self.geometry.max_active_lines == 0
    }

    /// True when `line_id` is the final compacted line of the schedule.
    pub fn is_last_line(&self, line_id: usize) -> bool {
        line_id + 1 == self.lines.len()
    }

    /// Advance both windows by one prefetch-window length (circularly) and
    /// return the compacted line ids of the newly designated prefetch window,
    /// in fetch order.
    pub fn slide(&mut self) -> Vec<usize> {
        let num_lines = self.lines.len();
        if num_lines == 0 {
            return Vec::new();
        }

        let active_start = (self.active.0 + self.num_prefetch) % num_lines;
        let active_end = (active_start + self.num_active) % num_lines;
        let prefetch_start = active_end;
        let prefetch_end = (prefetch_start + self.num_prefetch) % num_lines;
        self.active = (active_start, active_end);
        self.prefetch = (prefetch_start, prefetch_end);

        let fetch_lines = self.geometry.max_prefetch_lines.min(num_lines);
        (0..fetch_lines)
            .map(|k| (prefetch_start + k) % num_lines)
            .collect()
    }

    /// Stage the given lines column-wise into a bandwidth-tall matrix so the
    /// burst can be issued down columns of the transposed operand. Columns
    /// shorter than the bandwidth (deduplicated lines) are sentinel-padded.
    pub fn transposed_staging(&self, line_ids: &[usize]) -> AddrMatrix {
        let mut staged = AddrMatrix::new(self.geometry.bandwidth, line_ids.len().max(1));
        for (col, &id) in line_ids.iter().enumerate() {
            for (row, &addr) in self.lines[id].iter().enumerate() {
                if row >= self.geometry.bandwidth {
                    break;
                }
                staged.set(row, col, addr);
            }
        }
        staged
    }
}

#[cfg(test)]
mod tests {
    use super::{BufferGeometry, LineSchedule, RowKind};
    use crate::mem::demand::{AddrMatrix, NO_REQUEST};

    fn geometry() -> BufferGeometry {
        // 32 elements, bandwidth 4: 4 active lines, 4 prefetch lines
        BufferGeometry::new(32, 1, 0.5, 4).unwrap()
    }

    fn schedule_of(rows: Vec<Vec<i64>>) -> LineSchedule {
        let mut sched = LineSchedule::new(geometry());
        sched.install(&AddrMatrix::from_rows(rows));
        sched
    }

    #[test]
    fn geometry_rejects_degenerate_configs() {
        assert!(BufferGeometry::new(32, 0, 0.5, 4).is_err());
        assert!(BufferGeometry::new(32, 1, 0.5, 0).is_err());
        assert!(BufferGeometry::new(32, 1, 0.0, 4).is_err());
        assert!(BufferGeometry::new(32, 1, 1.0, 4).is_err());
        assert!(BufferGeometry::new(2, 1, 0.5, 4).is_err());
    }

    #[test]
    fn content_free_lines_are_compacted_but_keep_row_slots() {
        let sched = schedule_of(vec![
            vec![0, 1, 2, 3],
            vec![NO_REQUEST, NO_REQUEST, NO_REQUEST, NO_REQUEST],
            vec![8, 9, 10, 11],
        ]);
        assert_eq!(2, sched.num_lines());
        assert_eq!(3, sched.num_rows());
        assert_eq!(RowKind::Line(0), sched.classify(0).unwrap());
        assert_eq!(RowKind::Empty, sched.classify(1).unwrap());
        assert_eq!(RowKind::Line(1), sched.classify(2).unwrap());
    }

    #[test]
    fn classify_reports_caller_errors() {
        let sched = LineSchedule::new(geometry());
        assert!(matches!(
            sched.classify(0),
            Err(crate::mem::error::MemError::ScheduleNotInstalled)
        ));
        let sched = schedule_of(vec![vec![0, 1, 2, 3]]);
        assert!(matches!(
            sched.classify(5),
            Err(crate::mem::error::MemError::RowOutOfRange { row: 5, rows: 1 })
        ));
    }

    #[test]
    fn duplicate_addresses_hash_to_one_entry() {
        let sched = schedule_of(vec![vec![7, 7, 7, 7]]);
        assert_eq!(1, sched.line(0).len());
    }

    #[test]
    fn windows_advance_circularly() {
        // 16 lines of content, windows of 4
        let rows: Vec<Vec<i64>> = (0..16).map(|r| (r * 4..r * 4 + 4).collect()).collect();
        let mut sched = schedule_of(rows);
        sched.mark_warmed();
        assert_eq!(0, sched.active_start());
        for n in 1..=5 {
            sched.slide();
            assert_eq!((n * 4) % 16, sched.active_start());
        }
    }

    #[test]
    fn slide_returns_wrapped_prefetch_window() {
        let rows: Vec<Vec<i64>> = (0..6).map(|r| (r * 4..r * 4 + 4).collect()).collect();
        let mut sched = schedule_of(rows);
        sched.mark_warmed();
        assert_eq!(4, sched.prefetch_start());
        // active [0,4), prefetch [4,6); slide moves active start to 2
        let ids = sched.slide();
        assert_eq!(2, sched.active_start());
        assert_eq!(0, sched.prefetch_start());
        assert_eq!(vec![0, 1, 2, 3], ids);
    }

    #[test]
    fn transposed_staging_pads_short_columns() {
        let sched = schedule_of(vec![vec![3, 3, 1, 1]]);
        let staged = sched.transposed_staging(&[0]);
        assert_eq!(4, staged.rows());
        assert_eq!(&[1], staged.row(0));
        assert_eq!(&[3], staged.row(1));
        assert_eq!(&[NO_REQUEST], staged.row(2));
    }
}
