//! Elementwise sum of N same-shaped dense inputs. Grounded on
//! `op/kernel/add_n_op.cc`'s `AddN`/`AddNBackward`: forward zeros the
//! output then accumulates each input; backward copies the upstream
//! gradient, unchanged, into every input's gradient (since d/dXi of
//! sum(X) is 1).

use super::{Op, OpEnv};
use crate::graph::NodeType;
use crate::pull_request::PullRequest;
use deepx_core::shape::Shape;
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::TensorValue;

pub struct AddNOp {
    node_index: usize,
}

impl AddNOp {
    pub fn new(node_index: usize) -> Self {
        AddNOp { node_index }
    }

    fn input_shape(env: &OpEnv<'_>, node_index: usize) -> Shape {
        let node = env.graph.node(node_index);
        let inputs = &node.inputs;
        let x0 = env
            .ptr
            .get_tsr(&env.graph.node(inputs[0]).name)
            .expect("AddN input not bound")
            .shape();
        *x0
    }
}

impl Op for AddNOp {
    fn class_name(&self) -> &'static str {
        "AddN"
    }

    fn node_index(&self) -> usize {
        self.node_index
    }

    fn init_forward(&mut self, env: &mut OpEnv<'_>) {
        let shape = Self::input_shape(env, self.node_index);
        let node = env.graph.node(self.node_index);
        env.hidden
            .insert(node.name.clone(), TensorValue::Tsr(Tensor::zeros(shape)));
        let view = env.hidden.get_tsr(&node.name).unwrap().get_view();
        env.ptr.insert(node.name.clone(), TensorValue::Tsr(view));
    }

    fn init_backward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let shape = Self::input_shape(env, self.node_index);
        for &input_index in &node.inputs {
            let input_name = env.graph.node(input_index).name.clone();
            if !env.grad.contains(&input_name) {
                env.grad
                    .insert(input_name.clone(), TensorValue::Tsr(Tensor::zeros(shape)));
            }
            let view = env.grad.get_tsr(&input_name).unwrap().get_view();
            env.grad_ptr.insert(input_name, TensorValue::Tsr(view));
        }
    }

    fn forward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let name = node.name.clone();
        let mut sum = vec![0.0f32; env.ptr.get_tsr(&name).unwrap().data().len()];
        for &input_index in &node.inputs {
            let input_name = &env.graph.node(input_index).name;
            let x = env.ptr.get_tsr(input_name).expect("AddN input not bound");
            for (acc, &v) in sum.iter_mut().zip(x.data()) {
                *acc += v;
            }
        }
        let shape = *env.hidden.get_tsr(&name).unwrap().shape();
        env.hidden.get_tsr_mut(&name).unwrap().set_data(shape, &sum);
        let view = env.hidden.get_tsr(&name).unwrap().get_view();
        env.ptr.insert(name, TensorValue::Tsr(view));
    }

    fn backward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let name = node.name.clone();
        let Some(gz) = env.grad_ptr.get_tsr(&name).map(|t| t.data().to_vec()) else {
            return;
        };
        for &input_index in &node.inputs {
            let input_name = env.graph.node(input_index).name.clone();
            if let Some(gx) = env.grad.get_tsr_mut(&input_name) {
                for (acc, &v) in gx.data_mut().iter_mut().zip(gz.iter()) {
                    *acc += v;
                }
            }
        }
    }

    fn get_pull_request(&mut self, env: &OpEnv<'_>, pr: &mut PullRequest) {
        let node = env.graph.node(self.node_index);
        for &input_index in &node.inputs {
            let input = env.graph.node(input_index);
            if input.node_type == NodeType::Param {
                pr.add_tsr(&input.name);
            }
        }
    }
}
