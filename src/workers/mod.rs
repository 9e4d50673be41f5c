//! Long-running background tasks. Each worker owns a poll loop driven by
//! `tokio::select!` over its interval and a shared shutdown watch channel.

mod expiry;
mod reconciler;

pub use expiry::ExpiryWorker;
pub use reconciler::ReconcileWorker;
