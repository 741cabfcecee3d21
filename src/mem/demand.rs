//! Operand address matrices handed in by the dataflow scheduler.
//!
//! Addresses are signed 64-bit; the literal -1 marks a padding slot ("no
//! request") and is skipped everywhere downstream. The sentinel is part of the
//! external contract, so it stays a plain i64 rather than an Option.

pub type Address = i64;
pub type Cycle = i64;

/// Padding slot in a demand or fetch matrix.
pub const NO_REQUEST: Address = -1;

/// Row-major matrix of operand addresses with a fixed row width.
///
/// Demand matrices are one row per compute cycle, one column per array lane.
/// Fetch matrices reuse the same storage but are consumed through
/// [`AddrMatrix::reshaped_lines`], which regroups the elements into
/// bandwidth-wide burst lines regardless of the original row width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrMatrix {
    data: Vec<Address>,
    cols: usize,
}

impl AddrMatrix {
    pub fn new(rows: usize, cols: usize) -> Self {
        assert!(cols > 0, "matrix width must be > 0");
        Self {
            data: vec![NO_REQUEST; rows * cols],
            cols,
        }
    }

    pub fn from_rows(rows: Vec<Vec<Address>>) -> Self {
        let cols = rows.first().map_or(1, |r| r.len().max(1));
        let mut mat = AddrMatrix::new(rows.len(), cols);
        for (i, row) in rows.iter().enumerate() {
            mat.row_mut(i)[..row.len()].copy_from_slice(row);
        }
        mat
    }

    pub fn rows(&self) -> usize {
        self.data.len() / self.cols
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn num_elems(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, i: usize) -> &[Address] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [Address] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn set(&mut self, row: usize, col: usize, addr: Address) {
        self.data[row * self.cols + col] = addr;
    }

    /// Regroup the elements, in row-major order, into `width`-wide lines.
    /// The trailing partial line is padded with [`NO_REQUEST`].
    pub fn reshaped_lines(&self, width: usize) -> AddrMatrix {
        assert!(width > 0, "line width must be > 0");
        let num_lines = (self.data.len() + width - 1) / width;
        let mut out = AddrMatrix::new(num_lines, width);
        for (i, addr) in self.data.iter().enumerate() {
            out.data[i] = *addr;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{AddrMatrix, NO_REQUEST};

    #[test]
    fn reshape_regroups_in_element_order() {
        let mat = AddrMatrix::from_rows(vec![vec![0, 1, 2], vec![3, 4, 5]]);
        let lines = mat.reshaped_lines(4);
        assert_eq!(2, lines.rows());
        assert_eq!(&[0, 1, 2, 3], lines.row(0));
        assert_eq!(&[4, 5, NO_REQUEST, NO_REQUEST], lines.row(1));
    }

    #[test]
    fn reshape_exact_multiple_has_no_padding() {
        let mat = AddrMatrix::from_rows(vec![vec![0, 1], vec![2, 3]]);
        let lines = mat.reshaped_lines(2);
        assert_eq!(2, lines.rows());
        assert_eq!(&[0, 1], lines.row(0));
        assert_eq!(&[2, 3], lines.row(1));
    }

    #[test]
    fn new_matrix_is_all_padding() {
        let mat = AddrMatrix::new(2, 3);
        assert!(mat.row(0).iter().all(|&a| a == NO_REQUEST));
        assert!(mat.row(1).iter().all(|&a| a == NO_REQUEST));
    }
}
