//! Type-erased keyed container holding any tensor variant under a string
//! name -- the runtime's replacement for the original's dynamic `Any`.
//!
//! Every operator's `ptr`/`grad`/`hidden` collaborator and every parameter
//! store is a [`TensorMap`]; consumers `match` on [`TensorValue`] rather
//! than downcasting.

use indexmap::IndexMap;

use crate::csr::CsrMatrix;
use crate::srm::SparseRowMatrix;
use crate::stream::{InStream, OutStream, Result};
use crate::tensor::{Tensor, Tsr, Tsri, Tsrs};
use crate::error::SerializationError;

/// One of the tensor variants a [`TensorMap`] may hold under a name.
///
/// The original's legacy `SRP`/`SVP`/`SRG`/`SVG` tensor-type codes (param
/// vs. grad, owned vs. viewing SRM) collapse onto the single `Srm` variant
/// here -- `SparseRowMatrix` already tracks owned/viewing per row, and the
/// param/grad distinction was never recoverable at the type level anyway.
#[derive(Clone)]
pub enum TensorValue {
    Tsr(Tsr),
    Srm(SparseRowMatrix),
    Csr(CsrMatrix),
    Tsri(Tsri),
    Tsrs(Tsrs),
}

impl TensorValue {
    pub fn as_tsr(&self) -> Option<&Tsr> {
        match self {
            TensorValue::Tsr(t) => Some(t),
            _ => None,
        }
    }
    pub fn as_tsr_mut(&mut self) -> Option<&mut Tsr> {
        match self {
            TensorValue::Tsr(t) => Some(t),
            _ => None,
        }
    }
    pub fn as_srm(&self) -> Option<&SparseRowMatrix> {
        match self {
            TensorValue::Srm(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_srm_mut(&mut self) -> Option<&mut SparseRowMatrix> {
        match self {
            TensorValue::Srm(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_csr(&self) -> Option<&CsrMatrix> {
        match self {
            TensorValue::Csr(c) => Some(c),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            TensorValue::Tsr(_) => 0,
            TensorValue::Srm(_) => 1,
            TensorValue::Csr(_) => 2,
            TensorValue::Tsri(_) => 3,
            TensorValue::Tsrs(_) => 4,
        }
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_u8_(self.tag())?;
        match self {
            TensorValue::Tsr(t) => t.write(os),
            TensorValue::Srm(s) => s.write(os),
            TensorValue::Csr(c) => c.write(os),
            TensorValue::Tsri(t) => t.write(os),
            TensorValue::Tsrs(t) => t.write(os),
        }
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        Ok(match is.read_u8_()? {
            0 => TensorValue::Tsr(Tensor::read(is)?),
            1 => TensorValue::Srm(SparseRowMatrix::read(is)?),
            2 => TensorValue::Csr(CsrMatrix::read(is)?),
            3 => TensorValue::Tsri(Tensor::read(is)?),
            4 => TensorValue::Tsrs(Tensor::read(is)?),
            _ => return Err(SerializationError::Corrupt("unknown tensor value tag")),
        })
    }
}

/// Mapping from string name to [`TensorValue`]. Insertion order is not
/// semantically significant; `IndexMap` is used purely for deterministic
/// iteration in tests, matching the rest of this workspace.
#[derive(Clone, Default)]
pub struct TensorMap {
    inner: IndexMap<String, TensorValue>,
}

impl TensorMap {
    pub fn new() -> Self {
        TensorMap {
            inner: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: TensorValue) {
        self.inner.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&TensorValue> {
        self.inner.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TensorValue> {
        self.inner.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TensorValue> {
        self.inner.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorValue)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut TensorValue)> {
        self.inner.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn get_tsr(&self, name: &str) -> Option<&Tsr> {
        self.get(name).and_then(TensorValue::as_tsr)
    }

    pub fn get_tsr_mut(&mut self, name: &str) -> Option<&mut Tsr> {
        self.get_mut(name).and_then(TensorValue::as_tsr_mut)
    }

    pub fn get_srm(&self, name: &str) -> Option<&SparseRowMatrix> {
        self.get(name).and_then(TensorValue::as_srm)
    }

    pub fn get_srm_mut(&mut self, name: &str) -> Option<&mut SparseRowMatrix> {
        self.get_mut(name).and_then(TensorValue::as_srm_mut)
    }

    /// Two-level dispatch used by reduction/update code: visits `(name,
    /// TSR, TSR)` pairs and `(name, SRM, SRM)` pairs present in both maps,
    /// silently skipping any name whose dynamic type differs between the
    /// two maps (matches the original's documented `Reduce` behaviour --
    /// not a bug, see DESIGN.md Open Questions).
    pub fn for_each_matching<'a>(
        &'a self,
        other: &'a TensorMap,
        mut on_tsr: impl FnMut(&str, &Tsr, &Tsr),
        mut on_srm: impl FnMut(&str, &SparseRowMatrix, &SparseRowMatrix),
    ) {
        for (name, value) in other.iter() {
            match (self.get(name), value) {
                (Some(TensorValue::Tsr(a)), TensorValue::Tsr(b)) => on_tsr(name, a, b),
                (Some(TensorValue::Srm(a)), TensorValue::Srm(b)) => on_srm(name, a, b),
                _ => {}
            }
        }
    }

    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_container_len(self.inner.len())?;
        for (name, value) in self.inner.iter() {
            os.write_str_(name)?;
            value.write(os)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let n = is.read_container_len()?;
        let mut inner = IndexMap::with_capacity(n);
        for _ in 0..n {
            let name = is.read_string()?;
            let value = TensorValue::read(is)?;
            inner.insert(name, value);
        }
        Ok(TensorMap { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::shape::Shape;
    use crate::stream::to_bytes;

    #[test]
    fn insert_and_get_round_trips_variant() {
        let mut tm = TensorMap::new();
        tm.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 2.0])));
        assert_eq!(tm.get_tsr("w").unwrap().data(), &[1.0, 2.0]);
        assert!(tm.get_srm("w").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut tm = TensorMap::new();
        tm.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![3.0])));
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0, 2.0]);
        tm.insert("emb", TensorValue::Srm(srm));

        let bytes = to_bytes(|os| tm.write(os));
        let mut is = InStream::new(&bytes);
        let back = TensorMap::read(&mut is).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.get_tsr("w").unwrap().data(), &[3.0]);
        assert_eq!(back.get_srm("emb").unwrap().get_row_no_init(1), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn for_each_matching_skips_type_mismatch() {
        let mut a = TensorMap::new();
        a.insert("x", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![1.0])));
        let mut b = TensorMap::new();
        let mut srm = SparseRowMatrix::new();
        srm.assign(1, &[1.0]);
        b.insert("x", TensorValue::Srm(srm));

        let mut tsr_hits = 0;
        let mut srm_hits = 0;
        a.for_each_matching(&b, |_, _, _| tsr_hits += 1, |_, _, _| srm_hits += 1);
        assert_eq!(tsr_hits, 0);
        assert_eq!(srm_hits, 0);
    }
}
