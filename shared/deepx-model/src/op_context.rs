//! Drives one or more compiled targets' forward/backward/pull-request
//! passes by walking their deduplicated union forward chain.
//!
//! Grounded on `op_context.h`/`.cc`: the union chain preserves each
//! target's own topological order with first-occurrence-wins dedup; the
//! backward chain is the *loss* target's own forward chain, reversed
//! (gradients only flow back through whatever produced the loss).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::graph::{Graph, NodeType};
use crate::op::{build_op, Op, OpEnv, VariableOp};
use crate::pull_request::PullRequest;
use deepx_core::instance::Instance;
use deepx_core::shape::Shape;
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::{TensorMap, TensorValue};

#[derive(Debug, thiserror::Error)]
pub enum OpContextError {
    #[error("unknown target {0:?}")]
    UnknownTarget(String),
    #[error("node {0:?} has no registered op class")]
    NoOpClass(String),
    #[error("unknown op class {0:?} on node {1:?}")]
    UnknownOpClass(String, String),
}

pub struct OpContext {
    graph: std::sync::Arc<Graph>,
    loss_name: String,
    union_forward: Vec<usize>,
    loss_backward: Vec<usize>,
    ops: HashMap<usize, Box<dyn Op>>,
    ptr: TensorMap,
    hidden: TensorMap,
    grad: TensorMap,
    grad_ptr: TensorMap,
    profile: bool,
}

fn env_profile_enabled() -> bool {
    std::env::var("DEEPX_OP_CONTEXT_ENABLE_PROFILE")
        .map(|v| v == "1")
        .unwrap_or(false)
}

impl OpContext {
    pub fn new(
        graph: std::sync::Arc<Graph>,
        targets: &[&str],
        loss_name: &str,
    ) -> Result<Self, OpContextError> {
        let mut union_forward = Vec::new();
        let mut seen = HashSet::new();
        for &t in targets {
            let target = graph
                .target(t)
                .ok_or_else(|| OpContextError::UnknownTarget(t.to_string()))?;
            for &idx in &target.forward {
                if seen.insert(idx) {
                    union_forward.push(idx);
                }
            }
        }
        let loss_target = graph
            .target(loss_name)
            .ok_or_else(|| OpContextError::UnknownTarget(loss_name.to_string()))?;
        let mut loss_backward = loss_target.forward.clone();
        loss_backward.reverse();

        let mut ops: HashMap<usize, Box<dyn Op>> = HashMap::new();
        for &idx in &union_forward {
            let node = graph.node(idx);
            let op: Box<dyn Op> = if node.op_class.is_empty() {
                match node.node_type {
                    NodeType::Param | NodeType::Instance | NodeType::Constant => {
                        Box::new(VariableOp::new(idx))
                    }
                    NodeType::Hidden => return Err(OpContextError::NoOpClass(node.name.clone())),
                }
            } else {
                build_op(&node.op_class, idx)
                    .ok_or_else(|| OpContextError::UnknownOpClass(node.op_class.clone(), node.name.clone()))?
            };
            ops.insert(idx, op);
        }

        Ok(OpContext {
            graph,
            loss_name: loss_name.to_string(),
            union_forward,
            loss_backward,
            ops,
            ptr: TensorMap::new(),
            hidden: TensorMap::new(),
            grad: TensorMap::new(),
            grad_ptr: TensorMap::new(),
            profile: env_profile_enabled(),
        })
    }

    fn run_phase(
        &mut self,
        param: &TensorMap,
        order: &[usize],
        mut call: impl FnMut(&mut dyn Op, &mut OpEnv<'_>),
    ) {
        let OpContext {
            graph,
            ops,
            ptr,
            hidden,
            grad,
            grad_ptr,
            profile,
            ..
        } = self;
        let start_all = (*profile).then(Instant::now);
        let mut timings = Vec::new();
        for &idx in order {
            let op = ops.get_mut(&idx).expect("op registered for every forward node");
            let mut env = OpEnv {
                graph: graph.as_ref(),
                param,
                ptr: &mut *ptr,
                hidden: &mut *hidden,
                grad: &mut *grad,
                grad_ptr: &mut *grad_ptr,
            };
            let start = (*profile).then(Instant::now);
            call(op.as_mut(), &mut env);
            if let Some(start) = start {
                timings.push((op.class_name(), start.elapsed()));
            }
        }
        if let Some(start_all) = start_all {
            timings.sort_by(|a, b| b.1.cmp(&a.1));
            tracing::info!(total_ns = start_all.elapsed().as_nanos(), "op_context phase");
            for (name, dur) in timings {
                tracing::info!(op = name, ns = dur.as_nanos(), "op timing");
            }
        }
    }

    /// Binds `instance`'s tensors into `ptr`, then runs each op's
    /// `init_forward` (or `init_predict` in predict mode) in forward
    /// order.
    pub fn init_forward(&mut self, param: &TensorMap, instance: &Instance, is_train: bool) {
        self.hidden.clear();
        self.ptr.clear();
        for (name, value) in instance.tensor_map.iter() {
            self.ptr.insert(name.to_string(), value.clone());
        }
        let order = self.union_forward.clone();
        if is_train {
            self.run_phase(param, &order, |op, env| op.init_forward(env));
        } else {
            self.run_phase(param, &order, |op, env| op.init_predict(env));
        }
    }

    pub fn forward(&mut self, param: &TensorMap, is_train: bool) {
        let order = self.union_forward.clone();
        if is_train {
            self.run_phase(param, &order, |op, env| op.forward(env));
        } else {
            self.run_phase(param, &order, |op, env| op.predict(env));
        }
    }

    /// Reserves a 1-element gradient tensor for the loss name, then runs
    /// each op's `init_backward` in reverse (loss-target) order.
    pub fn init_backward(&mut self, param: &TensorMap) {
        self.grad.clear();
        self.grad_ptr.clear();
        self.grad.insert(
            self.loss_name.clone(),
            TensorValue::Tsr(Tensor::zeros(Shape::from_dims(&[1]))),
        );
        let view = self.grad.get_tsr(&self.loss_name).unwrap().get_view();
        self.grad_ptr.insert(self.loss_name.clone(), TensorValue::Tsr(view));
        let order = self.loss_backward.clone();
        self.run_phase(param, &order, |op, env| op.init_backward(env));
    }

    /// Zeroes every gradient, sets the loss gradient slot to 1, then runs
    /// each op's `backward` in reverse (loss-target) order.
    pub fn backward(&mut self, param: &TensorMap) {
        for (_, value) in self.grad.iter_mut() {
            match value {
                TensorValue::Tsr(t) => {
                    let shape = *t.shape();
                    let zeros = vec![0.0; t.data().len()];
                    t.set_data(shape, &zeros);
                }
                TensorValue::Srm(s) => s.zeros(),
                _ => {}
            }
        }
        let shape = *self.grad.get_tsr(&self.loss_name).unwrap().shape();
        self.grad.get_tsr_mut(&self.loss_name).unwrap().set_data(shape, &[1.0]);

        let order = self.loss_backward.clone();
        self.run_phase(param, &order, |op, env| op.backward(env));
    }

    /// Clears then rebuilds a fresh [`PullRequest`] from every op's
    /// contribution, in forward order.
    pub fn get_pull_request(&mut self, param: &TensorMap, is_train: bool) -> PullRequest {
        let mut pr = PullRequest::new(is_train);
        let order = self.union_forward.clone();
        let OpContext {
            graph,
            ops,
            ptr,
            hidden,
            grad,
            grad_ptr,
            ..
        } = self;
        for &idx in &order {
            let op = ops.get_mut(&idx).unwrap();
            let env = OpEnv {
                graph: graph.as_ref(),
                param,
                ptr: &mut *ptr,
                hidden: &mut *hidden,
                grad: &mut *grad,
                grad_ptr: &mut *grad_ptr,
            };
            op.get_pull_request(&env, &mut pr);
        }
        pr
    }

    pub fn loss_value(&self) -> f32 {
        self.ptr
            .get_tsr(&self.loss_name)
            .map(|t| t.data().first().copied().unwrap_or(0.0))
            .unwrap_or(0.0)
    }

    pub fn grad(&self) -> &TensorMap {
        &self.grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, GraphNode, TensorType};
    use deepx_core::initializer::Initializer;

    fn build_two_layer_graph() -> (std::sync::Arc<Graph>, usize) {
        let mut b = GraphBuilder::new();
        let w = b.push(
            GraphNode::new("w", NodeType::Param, TensorType::Tsr, Shape::from_dims(&[2]))
                .needing_grad(),
        );
        let x = b.push(GraphNode::new(
            "x",
            NodeType::Instance,
            TensorType::Tsr,
            Shape::from_dims(&[2]),
        ));
        let mut sum = GraphNode::new("loss", NodeType::Hidden, TensorType::Tsr, Shape::from_dims(&[2]))
            .with_op_class("AddN");
        sum.inputs = vec![w, x];
        let loss = b.push(sum);
        (std::sync::Arc::new(Graph::compile(b, &[loss]).unwrap()), loss)
    }

    #[test]
    fn forward_sums_param_and_instance() {
        let (graph, _loss) = build_two_layer_graph();
        let mut ctx = OpContext::new(graph, &["loss"], "loss").unwrap();

        let mut param = TensorMap::new();
        param.insert(
            "w",
            TensorValue::Tsr(deepx_core::tensor::Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 2.0])),
        );

        let mut instance = Instance::new(1);
        instance.tensor_map.insert(
            "x",
            TensorValue::Tsr(deepx_core::tensor::Tensor::from_vec(Shape::from_dims(&[2]), vec![10.0, 20.0])),
        );

        ctx.init_forward(&param, &instance, true);
        ctx.forward(&param, true);

        assert_eq!(ctx.ptr.get_tsr("loss").unwrap().data(), &[11.0, 22.0]);

        ctx.init_backward(&param);
        ctx.backward(&param);
        let gw = ctx.grad.get_tsr("w").unwrap();
        assert_eq!(gw.data(), &[1.0, 1.0]);

        let pr = ctx.get_pull_request(&param, true);
        assert!(pr.tsr_set.contains("w"));

        let _ = Initializer::Zeros;
    }
}
