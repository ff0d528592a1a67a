//! The wire protocol and RPC runtime (§1 component 3): a length-framed
//! binary protocol over TCP with typed message variants, a task-based
//! async reactor, and `rpc_type`-keyed request/notify dispatch built on
//! top of it.

pub mod dist_message;
pub mod rpc;
pub mod tcp;

pub use dist_message::{DistMessage, FrameStatus, MAX_BUF_BYTES};
pub use rpc::RpcServer;
pub use tcp::{ConnectionHandler, ConnectionState, TcpClient, TcpServer};
