//! Tickline
//!
//! A task-scheduling layer over host event-loop primitives. Tasks are queued
//! onto one of five virtual processor units (VPUs) — micro, macro,
//! animation-frame, after-frame and on-idle — each a FIFO queue bound to a
//! tick source. Queuing never runs anything synchronously; when the bound
//! tick fires, the VPU flushes the tasks present at that moment, defers work
//! enqueued mid-flush to the next tick, and contains panicking task bodies
//! behind an uncaught-error registry.
//!
//! The free functions below operate on a process-wide default context;
//! [`SchedulerContext`] gives embedders isolated instances and custom
//! [`TickSource`] bindings.
//!
//! # Example
//!
//! ```no_run
//! let handle = tickline::macro_task(Some("refresh"), || {
//!     assert_eq!(tickline::current_vpu(), Some(tickline::VpuKind::Macro));
//! });
//! assert!(!handle.is_canceled());
//! ```

#![doc(html_root_url = "https://docs.rs/tickline")]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod testing;
pub mod tick;
pub mod uncaught;
pub mod vpu;

mod task;
mod timer;

// Re-exports
pub use config::{Environment, SchedulerConfig};
pub use error::{ScheduleError, ScheduleResult};
pub use scheduler::{default_context, SchedulerContext, TickSourceSet};
pub use task::Cancelable;
pub use tick::{Deadline, TickCallback, TickContext, TickHandle, TickSource};
pub use uncaught::{HandlerId, TaskFailure, UncaughtErrorSupport};
pub use vpu::{FlushMode, VirtualProcessorUnit, VpuKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue a task on the default context's micro VPU.
pub fn micro_task<F>(name: Option<&str>, task: F) -> Cancelable
where
    F: FnOnce() + Send + 'static,
{
    default_context().micro_task(name, task)
}

/// Queue a task on the default context's macro VPU.
pub fn macro_task<F>(name: Option<&str>, task: F) -> Cancelable
where
    F: FnOnce() + Send + 'static,
{
    default_context().macro_task(name, task)
}

/// Queue a task to run immediately before the next render frame.
pub fn animation_frame<F>(name: Option<&str>, task: F) -> Cancelable
where
    F: FnOnce() + Send + 'static,
{
    default_context().animation_frame(name, task)
}

/// Queue a task to run immediately after the next render frame.
pub fn after_frame<F>(name: Option<&str>, task: F) -> Cancelable
where
    F: FnOnce() + Send + 'static,
{
    default_context().after_frame(name, task)
}

/// Queue a task to run when the host is idle, under the idle deadline.
pub fn on_idle<F>(name: Option<&str>, task: F) -> Cancelable
where
    F: FnOnce() + Send + 'static,
{
    default_context().on_idle(name, task)
}

/// Run a task once after a delay, delivered as a macro task. See
/// [`SchedulerContext::delayed_task`].
pub fn delayed_task<F>(name: Option<&str>, task: F, delay_ms: i64) -> ScheduleResult<Cancelable>
where
    F: FnOnce() + Send + 'static,
{
    default_context().delayed_task(name, task, delay_ms)
}

/// Run a task repeatedly at a fixed period, each occurrence delivered as a
/// macro task. See [`SchedulerContext::periodic_task`].
pub fn periodic_task<F>(name: Option<&str>, task: F, period_ms: i64) -> ScheduleResult<Cancelable>
where
    F: FnMut() + Send + 'static,
{
    default_context().periodic_task(name, task, period_ms)
}

/// Milliseconds elapsed since the default context was created. Monotonic.
pub fn now() -> u64 {
    default_context().now()
}

/// The kind of the VPU currently flushing on the default context, if any.
pub fn current_vpu() -> Option<VpuKind> {
    default_context().current_vpu()
}

/// True while any of the default context's VPUs is mid-flush.
pub fn is_vpu_activated() -> bool {
    default_context().is_vpu_activated()
}

/// Register an uncaught-error handler on the default context.
pub fn add_uncaught_error_handler(
    handler: impl Fn(&TaskFailure) + Send + Sync + 'static,
) -> HandlerId {
    default_context().add_uncaught_error_handler(handler)
}

/// Remove a previously registered uncaught-error handler.
pub fn remove_uncaught_error_handler(id: HandlerId) {
    default_context().remove_uncaught_error_handler(id);
}

/// Report a failure to the default context's uncaught-error handlers.
pub fn report_uncaught_error(failure: TaskFailure) {
    default_context().report_uncaught_error(failure);
}
