//! Shared test doubles and fixtures for Counsel crates.
//!
//! Everything here exists to make supervisor and pipeline tests
//! deterministic: scripted transports instead of a real service process,
//! canned configs with short timeouts, and a recording event sink.

pub mod fixtures;
pub mod sink;
pub mod transport;

pub use fixtures::{contract_chunks, descriptor, test_config, write_index_jsonl};
pub use sink::CollectingSink;
pub use transport::{
    FailingTransport, ScriptStep, ScriptedTransport, SilentTransport, heartbeat, ready_probe,
};
