//! Worker superstep engine
//!
//! A worker owns the vertices of its assigned partitions and runs them in
//! `parallelism` sub-engines per superstep:
//!
//! - [`mailbox`]: actor holding messages for the next superstep
//! - [`engine`]: one sub-engine computing a slice of the vertices
//! - [`shard`]: load, run and save the worker's vertices
//! - [`processor`]: maps coordinator commands onto a shard
//! - [`connection`]: TCP session with the server

pub mod connection;
pub mod engine;
pub mod mailbox;
pub mod processor;
pub mod shard;

pub use connection::run_worker;
pub use engine::{EngineStats, SubEngine};
pub use mailbox::{Inbox, MailboxHandle};
pub use processor::ShardProcessor;
pub use shard::{RoundStats, WorkerShard};
