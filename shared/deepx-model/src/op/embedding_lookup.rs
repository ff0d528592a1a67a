//! Sparse-feature embedding gather: input 0 is an `INSTANCE` CSR of
//! `(id, weight)` pairs per batch row, input 1 is the `PARAM` embedding
//! table (dense or sparse). Output row `i` is the weighted sum of the
//! embedding rows named by `X`'s row `i`.
//!
//! Grounded on `op/kernel/embedding_lookup_op.cc`'s `EmbeddingLookup`/
//! `SparseEmbeddingLookup` (`gesmm_mod`/`gesmsm`) and their `*Backward`
//! counterparts (`gestmm_mod`/`gestmm`), which scatter `weight * gZ_row`
//! back into the table's gradient row for every id touched.

use std::collections::HashSet;

use super::{Op, OpEnv};
use crate::graph::TensorType;
use crate::pull_request::PullRequest;
use deepx_core::shape::Shape;
use deepx_core::srm::Id;
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::TensorValue;

pub struct EmbeddingLookupOp {
    node_index: usize,
    col: usize,
    /// Ids looked up during the most recent forward pass, per batch row.
    touched: Vec<Vec<Id>>,
}

impl EmbeddingLookupOp {
    pub fn new(node_index: usize) -> Self {
        EmbeddingLookupOp {
            node_index,
            col: 0,
            touched: Vec::new(),
        }
    }

    fn table_col(env: &OpEnv<'_>, table_name: &str, tensor_type: TensorType) -> usize {
        match tensor_type {
            TensorType::Tsr => env.ptr.get_tsr(table_name).unwrap().shape().get(1) as usize,
            TensorType::Srm => env.ptr.get_srm(table_name).unwrap().col(),
            _ => panic!("embedding table must be TSR or SRM"),
        }
    }
}

impl Op for EmbeddingLookupOp {
    fn class_name(&self) -> &'static str {
        "EmbeddingLookup"
    }

    fn node_index(&self) -> usize {
        self.node_index
    }

    fn init_forward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let x_name = env.graph.node(node.inputs[0]).name.clone();
        let w_node = env.graph.node(node.inputs[1]);
        let w_name = w_node.name.clone();
        let w_type = w_node.tensor_type;

        let rows = env.ptr.get(&x_name).and_then(TensorValue::as_csr).unwrap().row();
        self.col = Self::table_col(env, &w_name, w_type);

        let out_shape = Shape::from_dims(&[rows as i64, self.col as i64]);
        env.hidden
            .insert(node.name.clone(), TensorValue::Tsr(Tensor::zeros(out_shape)));
        let view = env.hidden.get_tsr(&node.name).unwrap().get_view();
        env.ptr.insert(node.name.clone(), TensorValue::Tsr(view));
    }

    fn init_backward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let w_name = env.graph.node(node.inputs[1]).name.clone();
        if !env.grad.contains(&w_name) {
            env.grad
                .insert(w_name.clone(), TensorValue::Srm(deepx_core::srm::SparseRowMatrix::with_col(self.col)));
        }
    }

    fn forward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let out_name = node.name.clone();
        let x_name = env.graph.node(node.inputs[0]).name.clone();
        let w_name = env.graph.node(node.inputs[1]).name.clone();

        let csr = env.ptr.get(&x_name).and_then(TensorValue::as_csr).unwrap().clone();
        let rows = csr.row() as usize;
        let mut out = vec![0.0f32; rows * self.col];
        let mut touched = Vec::with_capacity(rows);

        for r in 0..rows {
            let mut row_ids = Vec::new();
            for (col_id, weight) in csr.row_iter(r) {
                let id = col_id as Id;
                row_ids.push(id);
                let table_row: Option<Vec<f32>> = match env.ptr.get(&w_name).unwrap() {
                    TensorValue::Srm(srm) => srm.get_row_no_init(id).map(|s| s.to_vec()),
                    TensorValue::Tsr(t) => {
                        let start = id as usize * self.col;
                        t.data().get(start..start + self.col).map(|s| s.to_vec())
                    }
                    _ => None,
                };
                if let Some(table_row) = table_row {
                    let out_row = &mut out[r * self.col..(r + 1) * self.col];
                    for (o, v) in out_row.iter_mut().zip(table_row) {
                        *o += weight * v;
                    }
                }
            }
            touched.push(row_ids);
        }
        self.touched = touched;

        let shape = *env.hidden.get_tsr(&out_name).unwrap().shape();
        env.hidden.get_tsr_mut(&out_name).unwrap().set_data(shape, &out);
        let view = env.hidden.get_tsr(&out_name).unwrap().get_view();
        env.ptr.insert(out_name, TensorValue::Tsr(view));
    }

    fn backward(&mut self, env: &mut OpEnv<'_>) {
        let node = env.graph.node(self.node_index);
        let out_name = node.name.clone();
        let x_name = env.graph.node(node.inputs[0]).name.clone();
        let w_name = env.graph.node(node.inputs[1]).name.clone();

        let Some(gz) = env.grad_ptr.get_tsr(&out_name).map(|t| t.data().to_vec()) else {
            return;
        };
        let csr = env.ptr.get(&x_name).and_then(TensorValue::as_csr).unwrap().clone();
        let Some(gw) = env.grad.get_srm_mut(&w_name) else {
            return;
        };
        for r in 0..csr.row() as usize {
            let gz_row = &gz[r * self.col..(r + 1) * self.col];
            for (col_id, weight) in csr.row_iter(r) {
                let id = col_id as Id;
                let slot = gw.get_row_mut_or_zero(id, self.col);
                for (s, &g) in slot.iter_mut().zip(gz_row) {
                    *s += weight * g;
                }
            }
        }
    }

    fn get_pull_request(&mut self, env: &OpEnv<'_>, pr: &mut PullRequest) {
        let node = env.graph.node(self.node_index);
        let w_name = env.graph.node(node.inputs[1]).name.clone();
        let ids: HashSet<Id> = self.touched.iter().flatten().copied().collect();
        if !ids.is_empty() {
            pr.add_srm_ids(&w_name, ids);
        }
    }
}
