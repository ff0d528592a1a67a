//! Drives one full training run: `PreTrain` -> `(PreEpoch -> serve workers
//! until the epoch is done -> PostEpoch) x epochs` -> `PostTrain` ->
//! optionally broadcast `MODEL_SAVE_REQUEST` to every PS -> broadcast
//! `TERMINATION_NOTIFY` (§4.10).
//!
//! Grounded on `ps/coord_server.cc`: the coordinator's own TCP listener
//! only ever answers `FILE_REQUEST`/`FILE_FINISH_NOTIFY` from workers,
//! routing them straight into a [`FileDispatcher`]; the PS broadcast at the
//! end of a run is a handful of outbound [`TcpClient`] calls, not part of
//! the listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tracing::{info, warn};

use deepx_net::{ConnectionHandler, ConnectionState, DistMessage, TcpClient, TcpServer};

use crate::file_dispatcher::{DispatchOutcome, FileDispatcher, FinishOutcome};

/// Sentinel `FileResponse.file` value meaning "nothing to dispatch right
/// now" -- a worker seeing this backs off and retries (§5: no per-message
/// timeout, so retry cadence is a worker-side policy choice, not the
/// protocol's).
pub const NO_FILE_SENTINEL: &str = "";

struct CoordHandler {
    dispatcher: Mutex<FileDispatcher>,
    epoch_done: Notify,
}

#[async_trait]
impl ConnectionHandler for CoordHandler {
    async fn on_message(&self, _state: &mut ConnectionState, message: DistMessage) -> Option<DistMessage> {
        match message {
            DistMessage::FileRequest => {
                let outcome = self.dispatcher.lock().worker_dispatch_file();
                let file = match outcome {
                    DispatchOutcome::File(f) => f,
                    DispatchOutcome::NoFile => NO_FILE_SENTINEL.to_string(),
                };
                Some(DistMessage::FileResponse { epoch: 0, file })
            }
            DistMessage::FileFinishNotify { file, loss, loss_weight } => {
                info!(file = %file, loss, loss_weight, "file finished");
                let outcome = self.dispatcher.lock().worker_finish_file(&file);
                if outcome == FinishOutcome::EpochDone {
                    self.epoch_done.notify_waiters();
                }
                None
            }
            DistMessage::HeartBeatNotify | DistMessage::TerminationNotify => None,
            other => {
                warn!("CoordServer received unexpected message tag {}", other.tag());
                None
            }
        }
    }
}

/// Orchestrates a full run against a set of PS node addresses. Does not
/// itself know how to reach workers beyond accepting their connections --
/// workers discover the coordinator's address out of band, the same as
/// the original.
pub struct CoordServer {
    handler: Arc<CoordHandler>,
}

impl Default for CoordServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordServer {
    pub fn new() -> Self {
        CoordServer {
            handler: Arc::new(CoordHandler {
                dispatcher: Mutex::new(FileDispatcher::new()),
                epoch_done: Notify::new(),
            }),
        }
    }

    /// Runs `epochs` epochs of `files` against workers connecting to
    /// `addr`, then (if `save_model`) broadcasts `MODEL_SAVE_REQUEST`, then
    /// unconditionally broadcasts `TERMINATION_NOTIFY`, to every address in
    /// `ps_addrs`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<R: Rng + ?Sized>(
        &self,
        addr: SocketAddr,
        files: Vec<String>,
        epochs: usize,
        reverse: bool,
        shuffle: bool,
        timeout: Duration,
        rng: &mut R,
        ps_addrs: &[SocketAddr],
        save_model: bool,
    ) -> Result<()> {
        self.handler.dispatcher.lock().pre_train(files);

        let server = TcpServer::bind(addr, self.handler.clone()).await?;
        info!(addr = %server.local_addr(), "coordinator listening");

        for epoch in 0..epochs {
            // Create the `Notified` future before populating the queue: a
            // worker on another runtime thread could finish every file
            // before this task gets back around to awaiting it, and
            // `notify_waiters` only wakes listeners that already exist.
            let notified = self.handler.epoch_done.notified();
            self.handler.dispatcher.lock().pre_epoch(reverse, shuffle, timeout, rng);
            info!(epoch, "epoch started");
            notified.await;
            info!(epoch, "epoch done");
        }

        if save_model {
            broadcast(ps_addrs, || DistMessage::ModelSaveRequest {
                epoch: epochs as i32,
                timestamp: unix_timestamp_string(),
                kv_protocol_version: 1,
            })
            .await;
        }
        broadcast(ps_addrs, || DistMessage::TerminationNotify).await;

        server.shutdown().await;
        Ok(())
    }

    pub fn finished_files(&self) -> Vec<String> {
        self.handler.dispatcher.lock().finished_files().to_vec()
    }
}

fn unix_timestamp_string() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    now.to_string()
}

/// Connects to every address in `addrs` and sends one message built by
/// `build` on each. A PS that's unreachable is logged and skipped rather
/// than aborting the whole broadcast -- a model save is best-effort across
/// however many shards are actually still alive by the end of a run.
async fn broadcast(addrs: &[SocketAddr], build: impl Fn() -> DistMessage) {
    for &addr in addrs {
        let message = build();
        let requires_response = message.requires_response();
        match TcpClient::connect(addr).await {
            Ok(mut client) => {
                let sent = if requires_response {
                    client.call(message).await.map(|_| ())
                } else {
                    client.notify(message).await
                };
                if let Err(err) = sent {
                    warn!("broadcast to {addr} failed: {err:#}");
                }
            }
            Err(err) => warn!("couldn't connect to {addr} for broadcast: {err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc as StdArc;

    use deepx_net::ConnectionState;

    struct TerminationRecorder {
        terminated: StdArc<AtomicBool>,
    }

    #[async_trait]
    impl ConnectionHandler for TerminationRecorder {
        async fn on_message(&self, _state: &mut ConnectionState, message: DistMessage) -> Option<DistMessage> {
            match message {
                DistMessage::TerminationNotify => {
                    self.terminated.store(true, Ordering::SeqCst);
                    None
                }
                DistMessage::ModelSaveRequest { .. } => Some(DistMessage::ModelSaveResponse),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn full_run_dispatches_every_file_and_terminates_ps() {
        let terminated = StdArc::new(AtomicBool::new(false));
        let ps_handler = StdArc::new(TerminationRecorder { terminated: terminated.clone() });
        let ps = TcpServer::bind("127.0.0.1:0".parse().unwrap(), ps_handler).await.unwrap();
        let ps_addr = ps.local_addr();

        let coord = CoordServer::new();
        let coord_handler = coord.handler.clone();

        let files = vec!["a".to_string(), "b".to_string()];
        coord_handler.dispatcher.lock().pre_train(files.clone());

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = TcpServer::bind(addr, coord_handler.clone()).await.unwrap();
        let coord_addr = server.local_addr();

        let worker = tokio::spawn(async move {
            let mut client = TcpClient::connect(coord_addr).await.unwrap();
            loop {
                let response = client.call(DistMessage::FileRequest).await.unwrap();
                let file = match response {
                    DistMessage::FileResponse { file, .. } if file.is_empty() => break,
                    DistMessage::FileResponse { file, .. } => file,
                    other => panic!("unexpected response: {other:?}"),
                };
                client
                    .notify(DistMessage::FileFinishNotify { file, loss: 0.1, loss_weight: 1.0 })
                    .await
                    .unwrap();
            }
        });

        let notified = coord_handler.epoch_done.notified();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        coord_handler.dispatcher.lock().pre_epoch(false, false, Duration::ZERO, &mut rng);

        worker.await.unwrap();
        notified.await;

        let mut finished = coord_handler.dispatcher.lock().finished_files().to_vec();
        finished.sort();
        let mut expected = files;
        expected.sort();
        assert_eq!(finished, expected);

        broadcast(&[ps_addr], || DistMessage::TerminationNotify).await;
        assert!(terminated.load(Ordering::SeqCst));

        server.shutdown().await;
        ps.shutdown().await;
    }
}
