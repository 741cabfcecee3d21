pub mod cache_set;
pub mod demand;
pub mod double_buffer;
pub mod dram;
pub mod error;
pub mod lines;
pub mod llc;
pub mod replacement;
pub mod scratchpad;


pub use cache_set::{CacheSet, Outcome};
pub use demand::{AddrMatrix, Address, Cycle, NO_REQUEST};
pub use double_buffer::{CycleTotals, Dataflow, DoubleBuffer, DoubleBufferConfig, Orientation};
pub use dram::Dram;
pub use error::MemError;
pub use lines::{BufferGeometry, LineSchedule, RowKind};
pub use llc::{Llc, LlcConfig, LlcStats};
pub use replacement::Replacement;
pub use scratchpad::{BufferConfig, ScratchpadBuffer};
