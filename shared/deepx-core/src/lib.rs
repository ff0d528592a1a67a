//! Shape/tensor types, the type-erased `TensorMap`, and stream
//! serialisation shared by every other crate in the workspace.

pub mod blocking_queue;
pub mod csr;
pub mod error;
pub mod half_float;
pub mod initializer;
pub mod instance;
pub mod shape;
pub mod srm;
pub mod stream;
pub mod tensor;
pub mod tensor_map;
pub mod thread_pool;

pub use blocking_queue::BlockingQueue;
pub use csr::CsrMatrix;
pub use error::{SerializationError, ShapeError};
pub use initializer::Initializer;
pub use instance::Instance;
pub use shape::{Shape, SHAPE_DIM_ANY, SHAPE_MAX_RANK};
pub use srm::SparseRowMatrix;
pub use stream::{InStream, OutStream};
pub use tensor::{Tensor, Tsr, Tsri, Tsrs};
pub use tensor_map::{TensorMap, TensorValue};
pub use thread_pool::ThreadPool;
