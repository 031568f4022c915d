//! Retry and backoff policy.
//!
//! This module encapsulates error classification (network failures,
//! throttling, timeouts, terminal causes like private videos) and
//! exponential backoff decisions so the queue and pipeline share a
//! consistent policy.

mod classify;
mod policy;
mod run;

pub use classify::{classify, ClassifiedError};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
