//! The dataflow graph, operator runtime, and parameter-server sharding
//! layer built on top of `deepx-core`'s tensor types.

pub mod feature_kv;
pub mod freq_store;
pub mod graph;
pub mod model;
pub mod model_shard;
pub mod model_store;
pub mod ol_store;
pub mod op;
pub mod op_context;
pub mod optimizer;
pub mod pull_request;
pub mod shard;
pub mod ts_store;

pub use graph::{Graph, GraphBuilder, GraphNode};
pub use model::Model;
pub use model_shard::ModelShard;
pub use op_context::OpContext;
pub use pull_request::PullRequest;
pub use shard::Shard;
