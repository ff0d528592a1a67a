//! Binds one shard's [`Model`] (parameters + optimiser) to its freshness
//! stores, presenting the operations a parameter-server worker actually
//! calls per request: pull, push (update + freshness bookkeeping), and
//! periodic expire/collect sweeps.
//!
//! Grounded on `ps/model_shard.h`/`.cc` (§4.1 component K): one
//! `ModelShard` per shard id, owning exactly the slice of the global
//! parameter space that shard's [`Shard`] descriptor routes to it.

use rand::Rng;

use deepx_core::tensor_map::TensorMap;

use crate::freq_store::FreqStore;
use crate::graph::Graph;
use crate::model::Model;
use crate::ol_store::OlStore;
use crate::optimizer::Optimizer;
use crate::pull_request::PullRequest;
use crate::shard::Shard;
use crate::ts_store::{unix_now, TsStore};

pub struct ModelShard {
    pub shard: Shard,
    pub model: Model,
    pub ts_store: TsStore,
    pub freq_store: FreqStore,
    pub ol_store: OlStore,
}

impl ModelShard {
    /// `ol_update_threshold`/`ol_distance_threshold` are the two
    /// `OlStore::collect` trip conditions (update count, L2 drift) --
    /// see `ps/ol_store.h`.
    pub fn new(
        shard: Shard,
        optimizer: Box<dyn Optimizer>,
        freq_filter_threshold: u32,
        ol_update_threshold: u32,
        ol_distance_threshold: f32,
    ) -> Self {
        ModelShard {
            shard,
            model: Model::new(optimizer),
            ts_store: TsStore::new(),
            freq_store: FreqStore::new(freq_filter_threshold),
            ol_store: OlStore::new(ol_update_threshold, ol_distance_threshold),
        }
    }

    /// Initialises every `PARAM` node this shard owns.
    pub fn init_param<R: Rng + ?Sized>(&mut self, graph: &Graph, rng: &mut R) {
        self.model.init_param(graph, rng);
    }

    /// Applies the freshness filter, then pulls the (now-filtered) request
    /// from the owned model.
    pub fn pull<R: Rng + ?Sized>(&mut self, graph: &Graph, mut request: PullRequest, rng: &mut R) -> TensorMap {
        self.freq_store.filter_pull_request(&mut request);
        self.model.pull(graph, &request, rng)
    }

    /// Stamps freshness, filters stale rows, then reduces `grad` into the
    /// owned model's parameters. The resulting parameter state also feeds
    /// the online-learning counters, so [`Self::collect_online_learning`]
    /// can later find rows worth pushing out-of-band.
    pub fn push(&mut self, mut grad: TensorMap) {
        self.ts_store.update(&grad, unix_now());
        self.freq_store.filter_grad(&mut grad);
        self.model.update(&grad);
        self.ol_store.update(&self.model.param);
    }

    /// Periodic maintenance: expires stale ids from the TS store. Returns
    /// the expired id set for the caller to log/act on.
    pub fn expire(&self, expire_threshold_secs: u64) -> std::collections::HashSet<deepx_core::srm::Id> {
        self.ts_store.expire(unix_now(), expire_threshold_secs)
    }

    /// Periodic maintenance: returns every `(name, id)` pair whose online
    /// update count or embedding drift has crossed the configured
    /// thresholds, resetting their counters and refreshing their
    /// snapshot rows.
    pub fn collect_online_learning(&mut self) -> std::collections::HashSet<(String, deepx_core::srm::Id)> {
        self.ol_store.collect(&self.model.param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, GraphNode, NodeType, TensorType};
    use crate::optimizer::Sgd;
    use deepx_core::shape::Shape;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn pull_then_push_round_trip() {
        let mut b = GraphBuilder::new();
        let w = b.push(GraphNode::new("w", NodeType::Param, TensorType::Tsr, Shape::from_dims(&[2])));
        let graph = Graph::compile(b, &[w]).unwrap();

        let mut shard = ModelShard::new(Shard::new(0, 1), Box::new(Sgd::new(0.1)), 0, 1000, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        shard.init_param(&graph, &mut rng);

        let mut pr = PullRequest::new(true);
        pr.add_tsr("w");
        let pulled = shard.pull(&graph, pr, &mut rng);
        assert!(pulled.get_tsr("w").is_some());

        let mut grad = TensorMap::new();
        grad.insert(
            "w",
            deepx_core::tensor_map::TensorValue::Tsr(deepx_core::tensor::Tensor::from_vec(
                Shape::from_dims(&[2]),
                vec![1.0, 1.0],
            )),
        );
        shard.push(grad);
        assert!(shard.model.param.get_tsr("w").is_some());
    }

    #[test]
    fn push_feeds_online_learning_counters() {
        let mut b = GraphBuilder::new();
        let emb = b.push(GraphNode::new("emb", NodeType::Param, TensorType::Srm, Shape::from_dims(&[2])));
        let graph = Graph::compile(b, &[emb]).unwrap();

        let mut shard = ModelShard::new(Shard::new(0, 1), Box::new(Sgd::new(0.1)), 0, 2, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        shard.init_param(&graph, &mut rng);

        let mut grad = TensorMap::new();
        let mut srm = deepx_core::srm::SparseRowMatrix::new();
        srm.assign(7, &[1.0, 1.0]);
        grad.insert("emb", deepx_core::tensor_map::TensorValue::Srm(srm));

        shard.push(grad.clone());
        shard.push(grad.clone());
        shard.push(grad);

        let collected = shard.collect_online_learning();
        assert!(collected.contains(&("emb".to_string(), 7)));
    }
}
