//! Compressed-sparse-row matrix: row-offset / col-index / value triple.

use crate::stream::{InStream, OutStream, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsrMatrix {
    row: i32,
    row_offset: Vec<i32>,
    col: Vec<i32>,
    value: Vec<f32>,
}

impl CsrMatrix {
    pub fn new() -> Self {
        CsrMatrix {
            row: 0,
            row_offset: vec![0],
            col: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Builds a CSR matrix directly from its three arrays, validating the
    /// invariants the original constructor enforces (sorted offsets,
    /// offsets start at 0 and end at `col.len()`, `col`/`value` same
    /// length).
    pub fn from_parts(row_offset: Vec<i32>, col: Vec<i32>, value: Vec<f32>) -> Self {
        assert!(row_offset.len() > 1, "invalid row_offset");
        assert!(!col.is_empty(), "invalid col");
        assert_eq!(col.len(), value.len(), "invalid col and value");
        assert!(
            row_offset.windows(2).all(|w| w[0] <= w[1]),
            "invalid row_offset"
        );
        assert_eq!(row_offset[0], 0, "invalid row_offset");
        assert_eq!(
            *row_offset.last().unwrap(),
            col.len() as i32,
            "invalid row_offset and col"
        );
        CsrMatrix {
            row: row_offset.len() as i32 - 1,
            row_offset,
            col,
            value,
        }
    }

    pub fn row(&self) -> i32 {
        self.row
    }

    pub fn row_offset(&self, i: usize) -> i32 {
        self.row_offset[i]
    }

    pub fn row_offset_slice(&self) -> &[i32] {
        &self.row_offset
    }

    pub fn col_size(&self) -> usize {
        self.col.len()
    }

    pub fn col(&self, i: usize) -> i32 {
        self.col[i]
    }

    pub fn value_size(&self) -> usize {
        self.value.len()
    }

    pub fn value(&self, i: usize) -> f32 {
        self.value[i]
    }

    pub fn empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn clear(&mut self) {
        self.row = 0;
        self.row_offset = vec![0];
        self.col.clear();
        self.value.clear();
    }

    pub fn reserve(&mut self, rows: usize) {
        self.row_offset.reserve(rows + 1);
        self.col.reserve(rows * 512);
        self.value.reserve(rows * 512);
    }

    /// Appends a `(col, value)` pair to the row currently being built.
    pub fn emplace(&mut self, col: i32, value: f32) {
        self.col.push(col);
        self.value.push(value);
    }

    /// Closes the current row.
    pub fn add_row(&mut self) {
        self.row += 1;
        self.row_offset.push(self.col.len() as i32);
    }

    /// Returns `(col, value)` pairs for row `i`.
    pub fn row_iter(&self, i: usize) -> impl Iterator<Item = (i32, f32)> + '_ {
        let start = self.row_offset[i] as usize;
        let end = self.row_offset[i + 1] as usize;
        self.col[start..end]
            .iter()
            .copied()
            .zip(self.value[start..end].iter().copied())
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_i32_(self.row)?;
        os.write_container_len(self.row_offset.len())?;
        for &v in &self.row_offset {
            os.write_i32_(v)?;
        }
        os.write_container_len(self.col.len())?;
        for &v in &self.col {
            os.write_i32_(v)?;
        }
        os.write_container_len(self.value.len())?;
        for &v in &self.value {
            os.write_f32_(v)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let row = is.read_i32_()?;
        let n_off = is.read_container_len()?;
        let mut row_offset = Vec::with_capacity(n_off);
        for _ in 0..n_off {
            row_offset.push(is.read_i32_()?);
        }
        let n_col = is.read_container_len()?;
        let mut col = Vec::with_capacity(n_col);
        for _ in 0..n_col {
            col.push(is.read_i32_()?);
        }
        let n_val = is.read_container_len()?;
        let mut value = Vec::with_capacity(n_val);
        for _ in 0..n_val {
            value.push(is.read_f32_()?);
        }
        Ok(CsrMatrix {
            row,
            row_offset,
            col,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::stream::to_bytes;

    #[test]
    fn construction_from_parts_matches_scenario() {
        let csr = CsrMatrix::from_parts(
            vec![0, 2, 5],
            vec![6, 16, 777, 888, 999],
            vec![1.0, 1.0, 1.0, 1.0, 1.0],
        );
        assert_eq!(csr.row(), 2);
        assert_eq!(csr.col_size(), 5);
    }

    #[test]
    fn incremental_build_matches_from_parts() {
        let mut csr = CsrMatrix::new();
        csr.emplace(6, 1.0);
        csr.emplace(16, 1.0);
        csr.add_row();
        csr.emplace(777, 1.0);
        csr.emplace(888, 1.0);
        csr.emplace(999, 1.0);
        csr.add_row();

        let expected = CsrMatrix::from_parts(
            vec![0, 2, 5],
            vec![6, 16, 777, 888, 999],
            vec![1.0, 1.0, 1.0, 1.0, 1.0],
        );
        assert_eq!(csr, expected);
    }

    #[test]
    #[should_panic]
    fn row_offset_must_start_at_zero() {
        CsrMatrix::from_parts(vec![1, 2], vec![0], vec![1.0]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let csr = CsrMatrix::from_parts(vec![0, 2], vec![1, 2], vec![0.5, 0.25]);
        let bytes = to_bytes(|os| csr.write(os));
        let mut is = InStream::new(&bytes);
        assert_eq!(CsrMatrix::read(&mut is).unwrap(), csr);
    }
}
