//! The operator protocol (§4.4): every node in a compiled [`crate::graph::Graph`]
//! is driven through forward/backward/pull-request by one `Op` instance.
//!
//! REDESIGN: the original's class hierarchy (`OpImpl`/`OpUnaryBase`/
//! `OpBinaryBase`) becomes a trait with default methods; operator
//! registration is an explicit build-list (`build_op`) rather than a
//! process-init registry map, since Rust has no linker-visible static
//! constructor idiom as lightweight as the original's.

mod add_n;
mod embedding_lookup;
mod variable;

pub use add_n::AddNOp;
pub use embedding_lookup::EmbeddingLookupOp;
pub use variable::VariableOp;

use crate::graph::Graph;
use crate::pull_request::PullRequest;
use deepx_core::tensor_map::TensorMap;

/// The collaborators an operator reads from and writes into during each
/// phase. `ptr` holds one aliasable output per node (what downstream nodes
/// read as their inputs); `hidden` owns the tensors `ptr` aliases for
/// non-parameter nodes; `grad`/`grad_ptr` mirror `hidden`/`ptr` for
/// gradients, keyed by the same node name.
pub struct OpEnv<'a> {
    pub graph: &'a Graph,
    pub param: &'a TensorMap,
    pub ptr: &'a mut TensorMap,
    pub hidden: &'a mut TensorMap,
    pub grad: &'a mut TensorMap,
    pub grad_ptr: &'a mut TensorMap,
}

pub trait Op: Send {
    fn class_name(&self) -> &'static str;

    /// This op's own node index in the owning graph.
    fn node_index(&self) -> usize;

    /// Binds collaborators; default is a no-op (most ops need nothing here
    /// beyond what `InitForward`/`InitBackward` already do).
    fn init(&mut self, _env: &mut OpEnv<'_>) {}

    /// Looks up input pointers, computes the output shape, inserts an
    /// owned output tensor into `hidden` and a pointer into `ptr`.
    fn init_forward(&mut self, env: &mut OpEnv<'_>);

    fn init_predict(&mut self, env: &mut OpEnv<'_>) {
        self.init_forward(env)
    }

    /// Allocates gradient storage in `grad` for every input that needs a
    /// gradient, installing pointers into `grad_ptr`. Default: no inputs
    /// need gradients (e.g. constant/instance nodes).
    fn init_backward(&mut self, _env: &mut OpEnv<'_>) {}

    fn forward(&mut self, env: &mut OpEnv<'_>);

    fn predict(&mut self, env: &mut OpEnv<'_>) {
        self.forward(env)
    }

    /// Accumulates (never overwrites) into input gradients, reading the
    /// upstream gradient from `grad_ptr`/`grad`. Default: nothing to
    /// propagate.
    fn backward(&mut self, _env: &mut OpEnv<'_>) {}

    /// For parameter-type inputs, records their name (dense) or the ids
    /// touched this forward pass (sparse) into `pr`. Default: contributes
    /// nothing (non-parameter nodes).
    fn get_pull_request(&mut self, _env: &OpEnv<'_>, _pr: &mut PullRequest) {}
}

/// Explicit operator build-list keyed on `GraphNode::op_class`, replacing
/// the original's process-init registry map.
pub fn build_op(class_name: &str, node_index: usize) -> Option<Box<dyn Op>> {
    match class_name {
        "Variable" => Some(Box::new(VariableOp::new(node_index))),
        "AddN" => Some(Box::new(AddNOp::new(node_index))),
        "EmbeddingLookup" => Some(Box::new(EmbeddingLookupOp::new(node_index))),
        _ => None,
    }
}
