//! Confidential worker for the darkpool pipeline.
//!
//! One invocation reads a decrypted trade intent from the enclave input
//! directory, matches it against the order book, derives and optionally
//! signs the resulting trade, and writes a deterministic result artifact.
//! Whatever happens, `computed.json` is written before the run returns.

pub mod artifact;
pub mod book;
pub mod config;
pub mod error;
pub mod input;
pub mod phases;
pub mod runner;
pub mod secret;

pub use artifact::{ComputedDescriptor, FAILURE_MESSAGE};
pub use book::{BestPriceMatcher, BookOrder, MarketMaker, MatchOutcome, MatchingEngine, OrderBook};
pub use config::WorkerEnv;
pub use error::{InputError, WorkerError};
pub use phases::{Phase, PhaseExecutor};
pub use runner::Worker;
pub use secret::RedactedSecret;
