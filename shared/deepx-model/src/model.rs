//! Owns a graph's parameters and drives the parameter-server-facing
//! operations built on top of it: initialisation, pulling missing rows for
//! a forward pass, and reducing a worker's gradient into the local
//! parameter map via an [`Optimizer`].
//!
//! Grounded on `ps/model.h`/`.cc`: `Param` is a plain [`TensorMap`]
//! (dense TSR or sparse SRM per node); `InitParam` walks every `PARAM`
//! node's [`InitializerSpec`] to produce its initial value; `Pull` fills
//! in whatever a [`PullRequest`] asks for that isn't already present
//! (dense names are a hard miss -> re-init, sparse ids are looked up
//! row-by-row via the SRM's own initialiser).

use rand::Rng;

use deepx_core::srm::SparseRowMatrix;
use deepx_core::stream::{InStream, OutStream, Result as StreamResult};
use deepx_core::tensor::Tensor;
use deepx_core::tensor_map::{TensorMap, TensorValue};

use crate::graph::{Graph, NodeType, TensorType};
use crate::optimizer::Optimizer;
use crate::pull_request::PullRequest;
use crate::shard::Shard;

/// The parameter-server-owned half of a graph: its dense/sparse weights
/// plus the optimiser driving their updates.
pub struct Model {
    pub param: TensorMap,
    optimizer: Box<dyn Optimizer>,
}

impl Model {
    pub fn new(optimizer: Box<dyn Optimizer>) -> Self {
        Model {
            param: TensorMap::new(),
            optimizer,
        }
    }

    /// Initialises every `PARAM` node's entry in `self.param` from its
    /// [`InitializerSpec`], skipping names already present (so repeated
    /// calls across a growing graph only fill in the new nodes).
    pub fn init_param<R: Rng + ?Sized>(&mut self, graph: &Graph, rng: &mut R) {
        for node in graph.nodes() {
            if node.node_type != NodeType::Param || self.param.contains(&node.name) {
                continue;
            }
            match node.tensor_type {
                TensorType::Tsr => {
                    let len = node.shape.total_dim().max(0) as usize;
                    let fan_in = node.shape.get(0).max(1) as usize;
                    let fan_out = if node.shape.rank() > 1 {
                        node.shape.get(1).max(1) as usize
                    } else {
                        fan_in
                    };
                    let data = node.initializer.fill_f32(rng, len, fan_in, fan_out);
                    self.param
                        .insert(node.name.clone(), TensorValue::Tsr(Tensor::from_vec(node.shape, data)));
                }
                TensorType::Srm => {
                    let col = node.shape.get(node.shape.rank().saturating_sub(1)).max(1) as usize;
                    let mut srm = SparseRowMatrix::with_col(col);
                    srm.set_initializer(node.initializer);
                    self.param.insert(node.name.clone(), TensorValue::Srm(srm));
                }
                _ => {}
            }
        }
    }

    /// Fills in whatever `request` asks for that isn't already present:
    /// dense names are generated fresh from the graph's recorded
    /// initialiser (a PS should already own every dense name; a miss means
    /// a newly added node). Sparse ids behave differently depending on
    /// `request.is_train`: a training pull generates and stores a missing
    /// id's row from the SRM's own initialiser descriptor (a worker must
    /// see *some* row to train against); an inference pull never mutates
    /// the SRM -- a missing id is simply absent from the returned map, so
    /// serving traffic can't inflate the parameter store with ids it only
    /// asked about once.
    pub fn pull<R: Rng + ?Sized>(&mut self, graph: &Graph, request: &PullRequest, rng: &mut R) -> TensorMap {
        let mut out = TensorMap::new();
        for name in &request.tsr_set {
            if !self.param.contains(name) {
                if let Some(node) = graph.node_by_name(name) {
                    let len = node.shape.total_dim().max(0) as usize;
                    let data = node.initializer.fill_f32(rng, len, len, len);
                    self.param
                        .insert(name.clone(), TensorValue::Tsr(Tensor::from_vec(node.shape, data)));
                }
            }
            if let Some(t) = self.param.get_tsr(name) {
                out.insert(name.clone(), TensorValue::Tsr(t.get_view()));
            }
        }
        for (name, ids) in &request.srm_map {
            if !self.param.contains(name) {
                self.param.insert(name.clone(), TensorValue::Srm(SparseRowMatrix::new()));
            }
            let srm = self.param.get_srm_mut(name).unwrap();
            let mut view = SparseRowMatrix::with_col(srm.col().max(1));
            for &id in ids {
                if request.is_train {
                    let row = srm.get_row(rng, id).to_vec();
                    view.assign(id, &row);
                } else if let Some(row) = srm.get_row_no_init(id) {
                    view.assign(id, row);
                }
            }
            out.insert(name.clone(), TensorValue::Srm(view));
        }
        out
    }

    /// Reduces `grad` into `self.param` via the owned optimiser, after
    /// ensuring slot storage exists for every gradient name.
    pub fn update(&mut self, grad: &TensorMap) {
        self.optimizer.init_param(&self.param, grad);
        self.optimizer.update(&mut self.param, grad);
    }

    pub fn split_pull_request(&self, shard: &Shard, request: &PullRequest) -> Vec<PullRequest> {
        shard.split_pull_request(request)
    }

    pub fn split_grad(&self, shard: &Shard, grad: &mut TensorMap) -> Vec<TensorMap> {
        shard.split_grad(grad)
    }

    pub fn split_param(&self, shard: &Shard) -> Vec<TensorMap> {
        shard.split_param(&self.param)
    }

    /// Serialises the owned optimiser alone (`optimizer_shard_N.bin`,
    /// §6) -- `self.param` has its own `TensorMap::write`/`read` and is
    /// persisted to `model_shard_N.bin` separately.
    pub fn write_optimizer(&self, os: &mut dyn OutStream) -> StreamResult<()> {
        self.optimizer.write(os)
    }

    /// Replaces the owned optimiser with one deserialised from
    /// `optimizer_shard_N.bin`, dispatching on its stored class name.
    pub fn read_optimizer(&mut self, is: &mut InStream<'_>) -> StreamResult<()> {
        self.optimizer = crate::optimizer::read_dyn(is)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, GraphNode};
    use crate::optimizer::Sgd;
    use deepx_core::initializer::Initializer;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn init_param_fills_dense_param_nodes() {
        let mut b = GraphBuilder::new();
        let w = b.push(
            GraphNode::new("w", NodeType::Param, TensorType::Tsr, Shape::from_dims(&[3]))
                .with_initializer(Initializer::Ones),
        );
        let graph = Graph::compile(b, &[w]).unwrap();

        let mut model = Model::new(Box::new(Sgd::new(0.1)));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        model.init_param(&graph, &mut rng);

        assert_eq!(model.param.get_tsr("w").unwrap().data(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn pull_inference_never_materialises_missing_srm_rows() {
        let mut model = Model::new(Box::new(Sgd::new(0.1)));
        model.param.insert("emb", TensorValue::Srm(SparseRowMatrix::with_col(2)));

        let mut request = PullRequest::new(false);
        request.add_srm_ids("emb", [7]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let out = model.pull(&crate::graph::Graph::compile(GraphBuilder::new(), &[]).unwrap(), &request, &mut rng);
        assert!(out.get_srm("emb").unwrap().get_row_no_init(7).is_none());
        assert!(!model.param.get_srm("emb").unwrap().contains(7));
    }

    #[test]
    fn pull_training_materialises_missing_srm_rows() {
        let mut model = Model::new(Box::new(Sgd::new(0.1)));
        model.param.insert("emb", TensorValue::Srm(SparseRowMatrix::with_col(2)));

        let mut request = PullRequest::new(true);
        request.add_srm_ids("emb", [7]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let out = model.pull(&crate::graph::Graph::compile(GraphBuilder::new(), &[]).unwrap(), &request, &mut rng);
        assert!(out.get_srm("emb").unwrap().get_row_no_init(7).is_some());
        assert!(model.param.get_srm("emb").unwrap().contains(7));
    }

    #[test]
    fn update_applies_optimizer_step() {
        let mut model = Model::new(Box::new(Sgd::new(0.1)));
        model.param.insert(
            "w",
            TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![1.0])),
        );
        let mut grad = TensorMap::new();
        grad.insert("w", TensorValue::Tsr(Tensor::from_vec(Shape::from_dims(&[1]), vec![2.0])));
        model.update(&grad);
        approx::assert_abs_diff_eq!(model.param.get_tsr("w").unwrap().data()[0], 0.8, epsilon = 1e-6);
    }
}
