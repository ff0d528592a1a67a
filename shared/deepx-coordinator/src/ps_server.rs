//! Binds one shard's [`ModelShard`] + compiled [`Graph`] to the
//! [`ConnectionHandler`] trait so `PULL_REQUEST`/`PUSH_NOTIFY`/
//! `MODEL_SAVE_REQUEST`/`TERMINATION_NOTIFY` messages arriving over a
//! [`TcpServer`] connection drive the actual parameter-server logic.
//!
//! Grounded on `ps/rpc_server.cc`'s dispatch table (§4.9): the handler
//! itself only (de)serialises the opaque `buf` payloads the wire layer
//! hands it and calls straight into [`ModelShard::pull`]/`push`; a single
//! shard is served per process, matching one `ps/model_shard` instance per
//! `ps_server` binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use deepx_core::blocking_queue::BlockingQueue;
use deepx_core::stream::InStream;
use deepx_core::tensor_map::TensorMap;
use deepx_core::thread_pool::ThreadPool;
use deepx_model::pull_request::PullRequest;
use deepx_model::{model_store, Graph, ModelShard};
use deepx_net::{ConnectionHandler, ConnectionState, DistMessage};

/// Serves one shard. `save_dir`, when set, is the model directory
/// `MODEL_SAVE_REQUEST` writes this shard's files into (§6's on-disk
/// layout); a node with no save directory configured still answers
/// `ModelSaveResponse` (an ack with nothing persisted), matching a
/// read-only replica.
pub struct PsServer {
    graph: Arc<Graph>,
    shard: Mutex<ModelShard>,
    rng: Mutex<ChaCha8Rng>,
    save_dir: Option<PathBuf>,
}

impl PsServer {
    pub fn new(graph: Arc<Graph>, shard: ModelShard, save_dir: Option<PathBuf>) -> Self {
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
        PsServer {
            graph,
            shard: Mutex::new(shard),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            save_dir,
        }
    }

    fn handle_pull(&self, buf: &[u8]) -> Option<DistMessage> {
        let request = match PullRequest::read(&mut InStream::new(buf)) {
            Ok(r) => r,
            Err(err) => {
                warn!("dropping malformed PullRequest: {err}");
                return None;
            }
        };
        let pulled = {
            let mut shard = self.shard.lock();
            let mut rng = self.rng.lock();
            shard.pull(&self.graph, request, &mut *rng)
        };
        let mut out = Vec::new();
        if let Err(err) = pulled.write(&mut out) {
            warn!("failed to serialise PullResponse: {err}");
            return None;
        }
        Some(DistMessage::PullResponse { buf: out })
    }

    fn handle_push(&self, buf: &[u8]) {
        match TensorMap::read(&mut InStream::new(buf)) {
            Ok(grad) => self.shard.lock().push(grad),
            Err(err) => warn!("dropping malformed PushNotify: {err}"),
        }
    }

    fn handle_model_save(&self) -> DistMessage {
        if let Some(dir) = &self.save_dir {
            let shard = self.shard.lock();
            if let Err(err) = model_store::save_graph_and_info(dir, &self.graph, shard.shard.shard_size) {
                warn!("failed to save graph/shard_info to {}: {err:#}", dir.display());
            }
            if let Err(err) = model_store::save_shard(dir, shard.shard.shard_id, &shard) {
                warn!("failed to save shard {} to {}: {err:#}", shard.shard.shard_id, dir.display());
            }
        }
        DistMessage::ModelSaveResponse
    }

    /// Starts a background expire/online-learning-collect sweep, run
    /// every `period` with an `expire_threshold_secs` staleness cutoff.
    ///
    /// The sweep itself runs on a dedicated [`ThreadPool`] worker rather
    /// than inline on a tokio timer tick, so a slow sweep (it locks
    /// `self.shard` for its duration) never stalls the reactor's async
    /// scheduler. A [`BlockingQueue`] carries one tick per timer fire from
    /// the tokio task to a plain OS thread, which hands each tick to the
    /// pool and blocks on it via [`ThreadPool::run`] -- this bounds
    /// maintenance to one in-flight sweep at a time even if a sweep ever
    /// outlasts `period`.
    pub fn spawn_maintenance(self: Arc<Self>, period: Duration, expire_threshold_secs: u64) -> MaintenanceHandle {
        let ticks = Arc::new(BlockingQueue::new());
        let pool = Arc::new(ThreadPool::new());
        pool.start(1);

        let dispatch_ticks = ticks.clone();
        let dispatch_pool = pool.clone();
        let this = self.clone();
        let dispatch = std::thread::spawn(move || {
            while dispatch_ticks.pop().is_some() {
                let this = this.clone();
                dispatch_pool.run(move || {
                    let (n_expired, n_collected) = {
                        let mut shard = this.shard.lock();
                        let expired = shard.expire(expire_threshold_secs);
                        let collected = shard.collect_online_learning();
                        (expired.len(), collected.len())
                    };
                    if n_expired > 0 || n_collected > 0 {
                        info!("maintenance sweep: expired {n_expired} ids, collected {n_collected} online-learning updates");
                    }
                });
            }
        });

        let timer_ticks = ticks.clone();
        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                timer_ticks.push(());
            }
        });

        MaintenanceHandle { ticks, pool, timer, dispatch: Some(dispatch) }
    }
}

/// Stops the background sweep spawned by [`PsServer::spawn_maintenance`].
pub struct MaintenanceHandle {
    ticks: Arc<BlockingQueue<()>>,
    pool: Arc<ThreadPool>,
    timer: tokio::task::JoinHandle<()>,
    dispatch: Option<std::thread::JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn stop(mut self) {
        self.timer.abort();
        self.ticks.stop();
        if let Some(dispatch) = self.dispatch.take() {
            let _ = dispatch.join();
        }
        self.pool.stop();
    }
}

#[async_trait]
impl ConnectionHandler for PsServer {
    async fn on_message(&self, _state: &mut ConnectionState, message: DistMessage) -> Option<DistMessage> {
        match message {
            DistMessage::PullRequest { buf } => self.handle_pull(&buf),
            DistMessage::PushNotify { buf } => {
                self.handle_push(&buf);
                None
            }
            DistMessage::ModelSaveRequest { .. } => Some(self.handle_model_save()),
            DistMessage::HeartBeatNotify | DistMessage::TerminationNotify => None,
            other => {
                warn!("PsServer received unexpected message tag {}", other.tag());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepx_model::graph::{GraphBuilder, GraphNode, NodeType, TensorType};
    use deepx_model::optimizer::Sgd;
    use deepx_model::shard::Shard;
    use deepx_core::shape::Shape;
    use deepx_core::tensor_map::TensorValue;
    use deepx_net::{TcpClient, TcpServer};

    fn single_param_graph() -> Graph {
        let mut b = GraphBuilder::new();
        let w = b.push(GraphNode::new("w", NodeType::Param, TensorType::Tsr, Shape::from_dims(&[2])));
        Graph::compile(b, &[w]).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn pull_then_push_over_real_socket() {
        let graph = Arc::new(single_param_graph());
        let mut shard = ModelShard::new(Shard::new(0, 1), Box::new(Sgd::new(0.1)), 0, 1000, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        shard.init_param(&graph, &mut rng);

        let handler = Arc::new(PsServer::new(graph.clone(), shard, None));
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), handler).await.unwrap();
        let mut client = TcpClient::connect(server.local_addr()).await.unwrap();

        let mut pr = PullRequest::new(true);
        pr.add_tsr("w");
        let mut pr_buf = Vec::new();
        pr.write(&mut pr_buf).unwrap();

        let response = client.call(DistMessage::PullRequest { buf: pr_buf }).await.unwrap();
        let pulled = match response {
            DistMessage::PullResponse { buf } => TensorMap::read(&mut InStream::new(&buf)).unwrap(),
            other => panic!("unexpected response: {other:?}"),
        };
        assert!(pulled.get_tsr("w").is_some());

        let mut grad = TensorMap::new();
        grad.insert(
            "w",
            TensorValue::Tsr(deepx_core::tensor::Tensor::from_vec(Shape::from_dims(&[2]), vec![1.0, 1.0])),
        );
        let mut grad_buf = Vec::new();
        grad.write(&mut grad_buf).unwrap();
        client.notify(DistMessage::PushNotify { buf: grad_buf }).await.unwrap();

        client.notify(DistMessage::TerminationNotify).await.unwrap();
        server.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn maintenance_sweep_expires_stale_ids_in_background() {
        let graph = Arc::new(single_param_graph());
        let mut shard = ModelShard::new(Shard::new(0, 1), Box::new(Sgd::new(0.1)), 0, 1000, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        shard.init_param(&graph, &mut rng);

        let mut grad = TensorMap::new();
        let mut srm = deepx_core::srm::SparseRowMatrix::new();
        srm.assign(1, &[1.0]);
        grad.insert("emb", TensorValue::Srm(srm));
        shard.ts_store.update(&grad, 0);

        let handler = Arc::new(PsServer::new(graph, shard, None));
        assert!(!handler.shard.lock().ts_store.is_empty());

        let maintenance = handler.clone().spawn_maintenance(Duration::from_millis(5), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        maintenance.stop();

        assert!(handler.shard.lock().ts_store.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn model_save_request_writes_shard_files() {
        let tmp = tempfile::tempdir().unwrap();
        let graph = Arc::new(single_param_graph());
        let mut shard = ModelShard::new(Shard::new(0, 1), Box::new(Sgd::new(0.1)), 0, 1000, 1000.0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        shard.init_param(&graph, &mut rng);

        let handler = Arc::new(PsServer::new(graph, shard, Some(tmp.path().to_path_buf())));
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), handler).await.unwrap();
        let mut client = TcpClient::connect(server.local_addr()).await.unwrap();

        let response = client
            .call(DistMessage::ModelSaveRequest { epoch: 1, timestamp: "now".into(), kv_protocol_version: 1 })
            .await
            .unwrap();
        assert_eq!(response, DistMessage::ModelSaveResponse);

        assert!(tmp.path().join("graph.bin").exists());
        assert!(tmp.path().join("model_shard_0.bin").exists());
        assert!(tmp.path().join("SUCCESS_shard_0").exists());

        client.notify(DistMessage::TerminationNotify).await.unwrap();
        server.shutdown().await;
    }
}
