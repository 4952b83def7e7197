//! prique: client for a priority queue that lives inside Redis
//!
//! The queue itself is maintained by server-side Lua procedures. This crate
//! builds the calls to those procedures and implements the blocking-pop
//! handshake around the `<queue>:sigque` signal list.
//!
//! # Architecture
//!
//! - Procedure references resolved to `EVALSHA` or inline `EVAL` per call
//! - Blocking pop as `BRPOP <queue>:sigque` followed by the dequeue procedure
//! - Blocking client over a single TCP connection
//! - mio-driven consumer cycle for long-running workers

/// Synchronous queue operations
pub mod client;

/// Configuration management
pub mod config;

/// Event-driven consumer cycle
pub mod cycle;

/// Error types and result aliases
pub mod error;

/// Connections to the store
pub mod network;

/// RESP encoding, command building and reply decoding
pub mod protocol;

pub use client::{bpop, len, pop, push, push_batch, remove, EmptyWakeup, Item, QueueClient};
pub use config::Config;
pub use cycle::{CycleEvent, CycleExit, CycleState, CycleStopper, QueueCycle};
pub use error::{Error, Result};
pub use network::{Connection, Transport};
pub use protocol::ProcRef;
