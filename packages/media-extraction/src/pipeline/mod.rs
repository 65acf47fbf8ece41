//! Batch extraction pipeline.

pub mod orchestrator;

pub use orchestrator::{build_chain, Orchestrator};
