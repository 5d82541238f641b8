//! Scheduling core: concurrency gate, request matrices, scheduler registry and
//! the worker loop that drives a matrix.

pub mod context;
pub mod gate;
pub mod matrix;
pub mod runner;
pub mod scheduler;

pub use context::RunContext;
pub use gate::ConcurrencyGate;
pub use matrix::{MatrixStats, RequestMatrix, Slot};
pub use runner::{CrawlRunner, RunSummary};
pub use scheduler::{MatrixHandle, Scheduler};
