//! Scheduling errors

use thiserror::Error;

/// Result alias for task submission.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Errors raised at submission time.
///
/// Anything that goes wrong *inside* a flush is routed through the
/// uncaught-error registry instead; these errors exist so that malformed
/// submissions fail fast rather than being deferred into the scheduling
/// machinery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("delayed task passed a negative delay: {delay_ms}ms")]
    NegativeDelay {
        /// The delay that was requested.
        delay_ms: i64,
    },

    #[error("periodic task passed a non-positive period: {period_ms}ms")]
    NonPositivePeriod {
        /// The period that was requested.
        period_ms: i64,
    },
}
