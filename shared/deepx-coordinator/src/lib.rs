//! The coordinator and parameter-server binaries' shared runtime: a
//! [`FileDispatcher`] for epoch-level work distribution, [`PsServer`]
//! binding a shard to the wire protocol, and [`CoordServer`] orchestrating
//! a full training run (§4.10).

pub mod coord_server;
pub mod file_dispatcher;
pub mod ps_server;

pub use coord_server::CoordServer;
pub use file_dispatcher::{DispatchOutcome, FileDispatcher, FinishOutcome};
pub use ps_server::PsServer;
