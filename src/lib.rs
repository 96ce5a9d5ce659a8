//! Library surface for the replicated, topic-partitioned message broker.
//! `main.rs` is a thin CLI shell around this crate; `tests/` exercises it
//! as an external consumer, wiring several in-process nodes together over
//! `transport::InMemoryTransport` instead of real sockets.

pub mod command;
pub mod config;
pub mod consensus;
pub mod error;
pub mod http;
pub mod log;
pub mod node;
pub mod state_machine;
pub mod transport;
pub mod wire;
