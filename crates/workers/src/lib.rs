//! Event consumers.
//!
//! Each worker is a single consumer loop wrapping a domain handler in the
//! idempotent runtime: receive, open a transaction, check the ledger, run the
//! handler, write the ledger marker, commit, acknowledge. Multiple replicas
//! of the same worker may run concurrently; correctness rests on database
//! locking, not in-process coordination.

pub mod config;
pub mod handlers;
pub mod runtime;

pub use config::WorkerConfig;
pub use runtime::{EventHandler, HandlerError, Outcome, process_delivery, run_worker};
