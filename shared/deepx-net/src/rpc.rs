//! RPC dispatch over the `USER_REQUEST`/`USER_RESPONSE`/`USER_NOTIFY`
//! `DistMessage` kinds: two maps keyed by an integer `rpc_type`, one for
//! request/response handlers and one for fire-and-forget notifications.
//!
//! Grounded on `ps/rpc_server.h`: the body's first `i32` is the `rpc_type`;
//! the registered handler owns deserialising the rest of the buffer as its
//! own request type and serialising its own response type. This module
//! only handles the envelope -- the byte payloads are opaque to it, the
//! same way `deepx_net::dist_message` only moves `PullRequest`/`TensorMap`
//! bytes without interpreting them.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::dist_message::DistMessage;

pub mod client;

pub type RequestHandler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;
pub type NotifyHandler = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

/// Keeps the two `rpc_type -> handler` maps and dispatches `USER_REQUEST`/
/// `USER_NOTIFY` messages into them. One `RpcServer` is shared (behind an
/// `Arc`) across every connection task on a node.
#[derive(Default)]
pub struct RpcServer {
    request_handlers: HashMap<i32, RequestHandler>,
    notify_handlers: HashMap<i32, NotifyHandler>,
}

impl RpcServer {
    pub fn new() -> Self {
        RpcServer::default()
    }

    pub fn register_request(&mut self, rpc_type: i32, handler: RequestHandler) {
        self.request_handlers.insert(rpc_type, handler);
    }

    pub fn register_notify(&mut self, rpc_type: i32, handler: NotifyHandler) {
        self.notify_handlers.insert(rpc_type, handler);
    }

    /// Dispatches a `USER_REQUEST`. Per §7's `ProtocolError` taxonomy, an
    /// unregistered `rpc_type` or a handler that fails is surfaced as an
    /// error so the caller can close the connection, rather than silently
    /// dropping the request.
    pub fn dispatch_request(&self, message: &DistMessage) -> Result<DistMessage> {
        let DistMessage::UserRequest { rpc_type, buf } = message else {
            return Err(anyhow!("dispatch_request called on a non-UserRequest message"));
        };
        let handler = self
            .request_handlers
            .get(rpc_type)
            .ok_or_else(|| anyhow!("no request handler registered for rpc_type {rpc_type}"))?;
        let response_buf = handler(buf)?;
        Ok(DistMessage::UserResponse { rpc_type: *rpc_type, buf: response_buf })
    }

    /// Dispatches a `USER_NOTIFY`. Unlike requests, an unregistered
    /// `rpc_type` is not necessarily a protocol error -- some nodes only
    /// care about a subset of notify types -- so this is a no-op rather
    /// than an error when nothing is registered.
    pub fn dispatch_notify(&self, message: &DistMessage) -> Result<()> {
        let DistMessage::UserNotify { rpc_type, buf } = message else {
            return Err(anyhow!("dispatch_notify called on a non-UserNotify message"));
        };
        if let Some(handler) = self.notify_handlers.get(rpc_type) {
            handler(buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn dispatch_request_round_trips_rpc_type_and_echoes_payload() {
        let mut server = RpcServer::new();
        server.register_request(
            7,
            Arc::new(|buf: &[u8]| Ok(buf.iter().rev().copied().collect())),
        );

        let request = DistMessage::UserRequest { rpc_type: 7, buf: vec![1, 2, 3] };
        let response = server.dispatch_request(&request).unwrap();
        match response {
            DistMessage::UserResponse { rpc_type, buf } => {
                assert_eq!(rpc_type, 7);
                assert_eq!(buf, vec![3, 2, 1]);
            }
            _ => panic!("expected UserResponse"),
        }
    }

    #[test]
    fn dispatch_request_errors_on_unregistered_rpc_type() {
        let server = RpcServer::new();
        let request = DistMessage::UserRequest { rpc_type: 99, buf: vec![] };
        assert!(server.dispatch_request(&request).is_err());
    }

    #[test]
    fn dispatch_notify_is_noop_when_unregistered() {
        let server = RpcServer::new();
        let notify = DistMessage::UserNotify { rpc_type: 1, buf: vec![] };
        assert!(server.dispatch_notify(&notify).is_ok());
    }

    #[test]
    fn dispatch_notify_invokes_registered_handler() {
        let mut server = RpcServer::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        server.register_notify(
            2,
            Arc::new(move |_buf| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let notify = DistMessage::UserNotify { rpc_type: 2, buf: vec![] };
        server.dispatch_notify(&notify).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
