//! The op backing every `PARAM` leaf node: binds the node's name directly
//! to its slot in the model's parameter [`TensorMap`], dense or sparse.
//!
//! Grounded on `op/kernel/variable_op.cc`'s `VariableOp::InitForward`,
//! which does nothing but alias `param_->at(name)` into the op's pointer
//! output -- there is no forward/backward compute, only aliasing.

use super::{Op, OpEnv};
use crate::graph::{NodeType, TensorType};
use crate::pull_request::PullRequest;
use deepx_core::tensor_map::TensorValue;

pub struct VariableOp {
    node_index: usize,
}

impl VariableOp {
    pub fn new(node_index: usize) -> Self {
        VariableOp { node_index }
    }
}

impl Op for VariableOp {
    fn class_name(&self) -> &'static str {
        "Variable"
    }

    fn node_index(&self) -> usize {
        self.node_index
    }

    fn init_forward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        match node.node_type {
            NodeType::Param => {
                let value = env
                    .param
                    .get(&node.name)
                    .unwrap_or_else(|| panic!("missing parameter {}", node.name));
                env.ptr.insert(node.name.clone(), value.clone());
            }
            NodeType::Instance | NodeType::Hidden | NodeType::Constant => {
                // Already staged into `ptr` by the caller (OpContext binds
                // the current Instance's tensors before running the chain).
            }
        }
    }

    fn forward(&mut self, _env: &mut OpEnv<'_>) {}

    fn get_pull_request(&mut self, env: &OpEnv<'_>, pr: &mut PullRequest) {
        let node = env.graph.node(self.node_index);
        if node.node_type != NodeType::Param {
            return;
        }
        match node.tensor_type {
            TensorType::Tsr => pr.add_tsr(&node.name),
            TensorType::Srm => {
                // The id set actually touched is only known to the
                // consumer that indexed into this table (EmbeddingLookupOp
                // records it); a bare Variable node with no consumer that
                // tracks usage contributes nothing here.
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphBuilder, GraphNode};
    use deepx_core::shape::Shape;
    use deepx_core::tensor::Tensor;

    #[test]
    fn dense_param_contributes_name_to_pull_request() {
        let mut b = GraphBuilder::new();
        let idx = b.push(GraphNode::new(
            "w",
            NodeType::Param,
            TensorType::Tsr,
            Shape::from_dims(&[2]),
        ));
        let graph = Graph::compile(b, &[idx]).unwrap();

        let param = {
            let mut m = deepx_core::tensor_map::TensorMap::new();
            m.insert(
                "w",
                TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 2.0])),
            );
            m
        };
        let mut ptr = deepx_core::tensor_map::TensorMap::new();
        let mut hidden = deepx_core::tensor_map::TensorMap::new();
        let mut grad = deepx_core::tensor_map::TensorMap::new();
        let mut grad_ptr = deepx_core::tensor_map::TensorMap::new();
        let mut env = OpEnv {
            graph: &graph,
            param: &param,
            ptr: &mut ptr,
            hidden: &mut hidden,
            grad: &mut grad,
            grad_ptr: &mut grad_ptr,
        };

        let mut op = VariableOp::new(idx);
        op.init_forward(&mut env);
        assert_eq!(env.ptr.get_tsr("w").unwrap().data(), &[1.0, 2.0]);

        let mut pr = PullRequest::new(true);
        op.get_pull_request(&env, &mut pr);
        assert!(pr.tsr_set.contains("w"));
    }
}
