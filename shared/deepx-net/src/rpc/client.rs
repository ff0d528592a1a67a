//! Typed request/response convenience wrappers over [`crate::tcp::TcpClient`],
//! grounded on `ps/rpc_client.h`'s `RpcClient::Call`-style helpers: callers
//! on the worker/coordinator side shouldn't have to hand-build a
//! `DistMessage::UserRequest { rpc_type, buf }` envelope and unwrap the
//! matching `UserResponse` at every call site.

use anyhow::{anyhow, Result};

use crate::dist_message::DistMessage;
use crate::tcp::TcpClient;

/// Sends a `USER_REQUEST` with the given `rpc_type` and payload, and
/// returns the matching `USER_RESPONSE` payload. Errors if the peer
/// replies with a different `rpc_type` or a non-response message kind.
pub async fn call_rpc(client: &mut TcpClient, rpc_type: i32, buf: Vec<u8>) -> Result<Vec<u8>> {
    let response = client.call(DistMessage::UserRequest { rpc_type, buf }).await?;
    match response {
        DistMessage::UserResponse { rpc_type: got, buf } if got == rpc_type => Ok(buf),
        DistMessage::UserResponse { rpc_type: got, .. } => {
            Err(anyhow!("rpc_type mismatch: sent {rpc_type}, got response for {got}"))
        }
        other => Err(anyhow!("expected UserResponse, got {other:?}")),
    }
}

/// Sends a fire-and-forget `USER_NOTIFY` with the given `rpc_type`.
pub async fn notify_rpc(client: &mut TcpClient, rpc_type: i32, buf: Vec<u8>) -> Result<()> {
    client.notify(DistMessage::UserNotify { rpc_type, buf }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::{ConnectionHandler, ConnectionState, TcpServer};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoRpcHandler;

    #[async_trait]
    impl ConnectionHandler for EchoRpcHandler {
        async fn on_message(
            &self,
            _state: &mut ConnectionState,
            message: DistMessage,
        ) -> Option<DistMessage> {
            match message {
                DistMessage::UserRequest { rpc_type, buf } => {
                    Some(DistMessage::UserResponse { rpc_type, buf })
                }
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn call_rpc_round_trips_payload_under_matching_rpc_type() {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(EchoRpcHandler))
            .await
            .unwrap();
        let addr = server.local_addr();
        let mut client = TcpClient::connect(addr).await.unwrap();

        let reply = call_rpc(&mut client, 42, b"payload".to_vec()).await.unwrap();
        assert_eq!(reply, b"payload");

        server.shutdown().await;
    }
}
