//! Payment orchestration engine: provider-agnostic transactions, resilient
//! connector invocation, a hash-chained audit trail and ledger
//! reconciliation for crypto settlement.

pub mod api;
pub mod audit;
pub mod config;
pub mod discovery;
pub mod error;
pub mod invoker;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod reconcile;
pub mod store;
pub mod workers;
