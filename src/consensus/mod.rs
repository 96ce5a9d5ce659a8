//! The consensus engine: leader election, log replication, and the
//! client-facing `propose` entry point, all serialized behind one
//! coarse-grained lock (spec §5 — a single writer at a time, reads and
//! writes alike go through the log).

mod engine;

pub use engine::{ClientError, ConsensusEngine, Core, SharedState, TimeoutConfig};
