use thiserror::Error;

/// Errors surfaced by the memory model. All of these indicate a caller or
/// configuration bug, not a transient condition; the driving simulator is
/// expected to abort the affected layer run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("buffer serviced before a fetch schedule was installed")]
    ScheduleNotInstalled,

    #[error("demand row {row} out of range for installed schedule ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    #[error("degenerate buffer geometry: {reason}")]
    DegenerateGeometry { reason: String },
}

impl MemError {
    pub fn config(reason: impl Into<String>) -> Self {
        MemError::Config {
            reason: reason.into(),
        }
    }

    pub fn geometry(reason: impl Into<String>) -> Self {
        MemError::DegenerateGeometry {
            reason: reason.into(),
        }
    }
}
