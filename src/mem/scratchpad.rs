use std::cell::RefCell;
use std::rc::Rc;

use log::trace;
use serde::Deserialize;

use crate::mem::demand::{AddrMatrix, Cycle};
use crate::mem::error::MemError;
use crate::mem::lines::{BufferGeometry, LineSchedule, RowKind};
use crate::mem::llc::Llc;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub size_bytes: i64,
    pub word_size: i64,
    pub active_frac: f32,
    pub req_gen_bandwidth: i64,
    pub hit_latency: Cycle,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size_bytes: 2048,
            word_size: 1,
            active_frac: 0.5,
            req_gen_bandwidth: 32,
            hit_latency: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Read,
    Write,
}

/// Double-buffered staging area in front of the LLC for one operand stream.
///
/// Read buffers (ifmap, filter) refill their windows with LLC reads; the
/// write variant (ofmap) drains through LLC writes. Everything else —
/// hashed-line compaction, window bookkeeping, stall accounting — is shared.
pub struct ScratchpadBuffer {
    direction: Direction,
    llc: Rc<RefCell<Llc>>,
    hit_latency: Cycle,
    schedule: LineSchedule,
    last_prefetch_cycle: Cycle,
}

impl ScratchpadBuffer {
    pub fn read(llc: Rc<RefCell<Llc>>, config: &BufferConfig) -> Result<Self, MemError> {
        Self::new(Direction::Read, llc, config)
    }

    pub fn write(llc: Rc<RefCell<Llc>>, config: &BufferConfig) -> Result<Self, MemError> {
        Self::new(Direction::Write, llc, config)
    }

    fn new(
        direction: Direction,
        llc: Rc<RefCell<Llc>>,
        config: &BufferConfig,
    ) -> Result<Self, MemError> {
        let geometry = BufferGeometry::new(
            config.size_bytes,
            config.word_size,
            config.active_frac,
            config.req_gen_bandwidth,
        )?;
        Ok(Self {
            direction,
            llc,
            hit_latency: config.hit_latency,
            schedule: LineSchedule::new(geometry),
            last_prefetch_cycle: -1,
        })
    }

    pub fn hit_latency(&self) -> Cycle {
        self.hit_latency
    }

    pub fn last_prefetch_cycle(&self) -> Cycle {
        self.last_prefetch_cycle
    }

    pub fn warmed(&self) -> bool {
        self.schedule.warmed()
    }

    pub fn finished(&self) -> bool {
        self.schedule.finished()
    }

    pub fn num_lines(&self) -> usize {
        self.schedule.num_lines()
    }

    pub fn active_start(&self) -> usize {
        self.schedule.active_start()
    }

    /// Install the fetch schedule for the next layer pass. Resets windows,
    /// warm-up state and the prefetch clock.
    pub fn install_fetch_schedule(&mut self, matrix: &AddrMatrix) {
        self.schedule.install(matrix);
        self.last_prefetch_cycle = -1;
    }

    /// Service the demand row with the given index, returning the cycle at
    /// which the row's operands are available. Triggers the warm-up fetch on
    /// first use and a window slide whenever the row crosses into a new
    /// active window.
    pub fn service_row(
        &mut self,
        row: usize,
        incoming_cycle: Cycle,
        llc_partition: usize,
        transposed: bool,
    ) -> Result<Cycle, MemError> {
        let line_id = match self.schedule.classify(row)? {
            // Padding row: pure pass-through, no buffer interaction.
            RowKind::Empty => return Ok(incoming_cycle + self.hit_latency),
            RowKind::Line(id) => id,
        };

        if !self.schedule.warmed() {
            self.last_prefetch_cycle = self.last_prefetch_cycle.max(incoming_cycle);
            let ids = self.schedule.warmup_line_ids();
            trace!("warm-up fetch of {} lines", ids.len());
            self.issue_burst(&ids, llc_partition, transposed);
            self.schedule.mark_warmed();
        }

        if self.schedule.is_window_boundary(line_id) && !self.schedule.finished() {
            self.last_prefetch_cycle = self.last_prefetch_cycle.max(incoming_cycle);
            let ids = self.schedule.slide();
            self.issue_burst(&ids, llc_partition, transposed);
            if self.schedule.is_last_line(line_id) {
                self.schedule.mark_finished();
            }
        }

        if self.schedule.is_last_line(line_id) {
            if !self.schedule.finished() {
                self.last_prefetch_cycle = self.last_prefetch_cycle.max(incoming_cycle);
                let ids = self.schedule.slide();
                self.issue_burst(&ids, llc_partition, transposed);
            }
            self.schedule.mark_finished();
        }

        Ok(self.last_prefetch_cycle.max(incoming_cycle) + self.hit_latency)
    }

    /// Issue one LLC access per line (or per staging row in transposed
    /// mode). The alternating reset flag models ping-pong channel usage
    /// across the burst.
    fn issue_burst(&mut self, line_ids: &[usize], llc_partition: usize, transposed: bool) {
        let mut llc = self.llc.borrow_mut();
        if !transposed {
            for &id in line_ids {
                let reset = (id + 1) % 2 == 1;
                let line = self.schedule.line(id);
                self.last_prefetch_cycle = match self.direction {
                    Direction::Read => llc.service_read(
                        line.iter().copied(),
                        self.last_prefetch_cycle,
                        llc_partition,
                        reset,
                    ),
                    Direction::Write => llc.service_write(
                        line.iter().copied(),
                        self.last_prefetch_cycle,
                        llc_partition,
                        reset,
                    ),
                };
            }
        } else {
            let staged = self.schedule.transposed_staging(line_ids);
            for i in 0..staged.rows() {
                let reset = (i + 1) % 2 == 1;
                let row = staged.row(i);
                self.last_prefetch_cycle = match self.direction {
                    Direction::Read => llc.service_read(
                        row.iter().copied(),
                        self.last_prefetch_cycle,
                        llc_partition,
                        reset,
                    ),
                    Direction::Write => llc.service_write(
                        row.iter().copied(),
                        self.last_prefetch_cycle,
                        llc_partition,
                        reset,
                    ),
                };
            }
        }
    }
}
