//! Metrics hooks for token store operations.

use std::time::Duration;

/// Trait for recording token store metrics.
///
/// Implement it to forward counts to Prometheus, StatsD, an APM agent, etc.
/// All methods default to no-ops.
pub trait StoreMetrics: Send + Sync {
    /// A batch of identifiers was rotated (`stored == false` when the write was swallowed).
    fn record_rotation(&self, _count: usize, _stored: bool, _duration: Duration) {}

    /// An operation is about to be retried after a connectivity failure.
    fn record_retry(&self, _operation: &str, _attempt: u32) {}

    /// A read exhausted its retries and returned an unstored token.
    fn record_fail_open(&self, _key: &str) {}

    /// An operation failed and the error was swallowed or returned.
    fn record_error(&self, _operation: &str, _error: &str) {}
}

/// Default no-op metrics implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl StoreMetrics for NoOpMetrics {}
