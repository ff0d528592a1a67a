//! Sparse row matrix: an integer-id-keyed map of fixed-width dense rows.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::initializer::Initializer;
use crate::stream::{InStream, OutStream, Result};

pub type Id = i64;

#[derive(Clone, Debug)]
enum Row {
    Owned(Vec<f32>),
    Shared(Arc<[f32]>),
}

impl Row {
    fn as_slice(&self) -> &[f32] {
        match self {
            Row::Owned(v) => v,
            Row::Shared(v) => v,
        }
    }
}

/// `SparseRowMatrix<V>`: id -> row of `col` values of type `V`. `col` is
/// fixed by the first row inserted (by `assign`/`assign_view`/`get_row`);
/// an [`Initializer`] describes how missing rows are generated on pull.
#[derive(Clone, Debug)]
pub struct SparseRowMatrix {
    col: usize,
    rows: IndexMap<Id, Row>,
    initializer: Initializer,
}

impl Default for SparseRowMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseRowMatrix {
    pub fn new() -> Self {
        SparseRowMatrix {
            col: 0,
            rows: IndexMap::new(),
            initializer: Initializer::Zeros,
        }
    }

    pub fn with_col(col: usize) -> Self {
        SparseRowMatrix {
            col,
            rows: IndexMap::new(),
            initializer: Initializer::Zeros,
        }
    }

    pub fn col(&self) -> usize {
        self.col
    }

    pub fn set_col(&mut self, col: usize) {
        self.col = col;
    }

    pub fn set_initializer(&mut self, init: Initializer) {
        self.initializer = init;
    }

    pub fn initializer(&self) -> Initializer {
        self.initializer
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.rows.reserve(additional);
    }

    pub fn contains(&self, id: Id) -> bool {
        self.rows.contains_key(&id)
    }

    /// Copies `row` into this matrix under `id`. Fixes `col` on first
    /// insertion.
    pub fn assign(&mut self, id: Id, row: &[f32]) {
        if self.rows.is_empty() {
            self.col = row.len();
        }
        assert_eq!(row.len(), self.col, "row width does not match SRM col");
        self.rows.insert(id, Row::Owned(row.to_vec()));
    }

    /// Records a shared view over `row` without copying -- the SRM
    /// counterpart of `Tensor::view`.
    pub fn assign_view(&mut self, id: Id, row: Arc<[f32]>) {
        if self.rows.is_empty() {
            self.col = row.len();
        }
        assert_eq!(row.len(), self.col, "row width does not match SRM col");
        self.rows.insert(id, Row::Shared(row));
    }

    pub fn get_row_no_init(&self, id: Id) -> Option<&[f32]> {
        self.rows.get(&id).map(Row::as_slice)
    }

    /// Converts `id`'s row to shared storage in place (if it is still
    /// `Owned`) and returns a cheap `Arc` clone over it, so a caller can
    /// hand the row to another matrix via `assign_view` without copying
    /// the underlying floats. Returns `None` if `id` has no row.
    pub fn row_arc(&mut self, id: Id) -> Option<Arc<[f32]>> {
        let row = self.rows.get_mut(&id)?;
        if let Row::Owned(v) = row {
            *row = Row::Shared(Arc::from(std::mem::take(v).into_boxed_slice()));
        }
        match row {
            Row::Shared(v) => Some(v.clone()),
            Row::Owned(_) => unreachable!(),
        }
    }

    /// Returns a mutable slice for `id`'s row, inserting a zero row of
    /// width `col` if missing and converting a viewing row to owned
    /// storage first. Used by gradient accumulation and optimiser slots,
    /// both of which need to add into a row that may not exist yet.
    pub fn get_row_mut_or_zero(&mut self, id: Id, col: usize) -> &mut [f32] {
        if self.col == 0 {
            self.col = col;
        }
        let row = self
            .rows
            .entry(id)
            .or_insert_with(|| Row::Owned(vec![0.0; col]));
        if let Row::Shared(v) = row {
            *row = Row::Owned(v.to_vec());
        }
        match row {
            Row::Owned(v) => v.as_mut_slice(),
            Row::Shared(_) => unreachable!(),
        }
    }

    /// Returns the row for `id`, generating and inserting it from the
    /// initialiser descriptor if missing.
    #[cfg(feature = "rand")]
    pub fn get_row<R: rand::Rng + ?Sized>(&mut self, rng: &mut R, id: Id) -> &[f32] {
        if !self.rows.contains_key(&id) {
            let row = self.initializer.fill_f32(rng, self.col, self.col, self.col);
            self.rows.insert(id, Row::Owned(row));
        }
        self.rows.get(&id).map(Row::as_slice).unwrap()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id, &[f32])> {
        self.rows.iter().map(|(&id, row)| (id, row.as_slice()))
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.rows.keys().copied()
    }

    /// Inserts every row from `other`, overwriting existing rows of the
    /// same id.
    pub fn upsert(&mut self, other: &SparseRowMatrix) {
        if self.rows.is_empty() {
            self.col = other.col;
        }
        for (id, row) in other.rows.iter() {
            self.rows.insert(*id, row.clone());
        }
    }

    /// Inserts rows from `other` only where this matrix doesn't already
    /// have that id.
    pub fn merge(&mut self, other: &SparseRowMatrix) {
        if self.rows.is_empty() {
            self.col = other.col;
        }
        for (id, row) in other.rows.iter() {
            self.rows.entry(*id).or_insert_with(|| row.clone());
        }
    }

    pub fn remove_if(&mut self, mut pred: impl FnMut(Id, &[f32]) -> bool) {
        self.rows.retain(|&id, row| !pred(id, row.as_slice()));
    }

    /// Drops all rows but keeps `col` and the initialiser descriptor.
    pub fn zeros(&mut self) {
        self.rows.clear();
    }

    pub fn clear(&mut self) {
        self.col = 0;
        self.rows.clear();
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u64_(self.col as u64)?;
        os.write_container_len(self.rows.len())?;
        for (id, row) in self.rows.iter() {
            os.write_i64_(*id)?;
            for v in row.as_slice() {
                os.write_f32_(*v)?;
            }
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let col = is.read_u64_()? as usize;
        let n = is.read_container_len()?;
        let mut rows = IndexMap::with_capacity(n);
        for _ in 0..n {
            let id = is.read_i64_()?;
            let mut row = Vec::with_capacity(col);
            for _ in 0..col {
                row.push(is.read_f32_()?);
            }
            rows.insert(id, Row::Owned(row));
        }
        Ok(SparseRowMatrix {
            col,
            rows,
            initializer: Initializer::Zeros,
        })
    }
}

impl PartialEq for SparseRowMatrix {
    /// Set-equality of `(id, row)` pairs, not insertion order.
    fn eq(&self, other: &Self) -> bool {
        if self.col != other.col || self.rows.len() != other.rows.len() {
            return false;
        }
        self.rows
            .iter()
            .all(|(id, row)| other.get_row_no_init(*id) == Some(row.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::stream::to_bytes;

    #[test]
    fn assign_fixes_col_on_first_row() {
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0, 2.0]);
        assert_eq!(srm.col(), 2);
        assert_eq!(srm.get_row_no_init(1), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn merge_keeps_existing_rows() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0]);
        let mut b = SparseRowMatrix::new();
        b.assign(1, &[9.0]);
        b.assign(2, &[2.0]);
        a.merge(&b);
        assert_eq!(a.get_row_no_init(1), Some(&[1.0][..]));
        assert_eq!(a.get_row_no_init(2), Some(&[2.0][..]));
    }

    #[test]
    fn upsert_overwrites_existing_rows() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0]);
        let mut b = SparseRowMatrix::new();
        b.assign(1, &[9.0]);
        a.upsert(&b);
        assert_eq!(a.get_row_no_init(1), Some(&[9.0][..]));
    }

    #[test]
    fn zeros_drops_rows_keeps_col() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0, 2.0]);
        a.zeros();
        assert!(a.is_empty());
        assert_eq!(a.col(), 2);
    }

    #[test]
    fn equality_is_set_equality_not_order() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0]);
        a.assign(2, &[2.0]);
        let mut b = SparseRowMatrix::new();
        b.assign(2, &[2.0]);
        b.assign(1, &[1.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn get_row_mut_or_zero_inserts_and_accumulates() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0, 1.0]);
        {
            let row = a.get_row_mut_or_zero(1, 2);
            row[0] += 5.0;
        }
        assert_eq!(a.get_row_no_init(1), Some(&[6.0, 1.0][..]));
        {
            let row = a.get_row_mut_or_zero(2, 2);
            row[1] += 3.0;
        }
        assert_eq!(a.get_row_no_init(2), Some(&[0.0, 3.0][..]));
    }

    #[test]
    fn row_arc_shares_storage_with_assign_view() {
        let mut a = SparseRowMatrix::new();
        a.assign(1, &[1.0, 2.0]);
        let shared = a.row_arc(1).unwrap();
        assert_eq!(Arc::strong_count(&shared), 2);

        let mut b = SparseRowMatrix::with_col(2);
        b.assign_view(1, shared);
        assert_eq!(b.get_row_no_init(1), Some(&[1.0, 2.0][..]));
        assert_eq!(a.get_row_no_init(1), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn row_arc_returns_none_for_missing_id() {
        let mut a = SparseRowMatrix::new();
        assert!(a.row_arc(1).is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut a = SparseRowMatrix::new();
        a.assign(5, &[1.0, 2.0, 3.0]);
        a.assign(9, &[4.0, 5.0, 6.0]);
        let bytes = to_bytes(|os| a.write(os));
        let mut is = InStream::new(&bytes);
        let back = SparseRowMatrix::read(&mut is).unwrap();
        assert_eq!(a, back);
    }
}
