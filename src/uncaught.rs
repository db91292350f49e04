//! Uncaught-error registry
//!
//! A task body that panics is caught at the per-task boundary during a flush
//! and reported here, so a failure in one task can neither abort the flush nor
//! vanish silently. Handlers run in registration order; a handler that itself
//! panics is isolated and logged. When dispatch is enabled but no handler is
//! registered the failure escalates to the log so it is never invisible; when
//! dispatch is disabled the failure is dropped with a debug trace only.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Identifier issued when a handler is registered; used to remove it again.
///
/// Closures are not comparable, so membership is tracked by id: duplicate
/// registration of the same id cannot occur and removing an absent id is a
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A failure raised by a task body (a caught panic) or reported explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    task: Option<String>,
    message: String,
}

impl TaskFailure {
    /// A failure reported explicitly, not tied to a task.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            task: None,
            message: message.into(),
        }
    }

    /// Build a failure from a panic payload caught during task execution.
    pub fn from_panic(task: Option<String>, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "task panicked".to_string()
        };
        Self {
            task,
            message,
        }
    }

    /// Name of the failing task, when names were enabled.
    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    /// Failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "task '{task}' failed: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

type Handler = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// Registry of uncaught-error handlers, dispatched in insertion order.
pub struct UncaughtErrorSupport {
    enabled: bool,
    next_id: AtomicU64,
    handlers: Mutex<IndexMap<HandlerId, Handler>>,
}

impl UncaughtErrorSupport {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(IndexMap::new()),
        }
    }

    /// True if handlers will be consulted at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Register a handler; it will be invoked for every reported failure, in
    /// registration order, until removed.
    pub fn add_handler(&self, handler: impl Fn(&TaskFailure) + Send + Sync + 'static) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().insert(id, Arc::new(handler));
        id
    }

    /// Remove a previously registered handler. Removing an id that is not
    /// registered is a no-op.
    pub fn remove_handler(&self, id: HandlerId) {
        self.handlers.lock().shift_remove(&id);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Dispatch a failure to every handler. Never unwinds into the caller: a
    /// panicking handler is caught and logged, and remaining handlers still
    /// run.
    pub fn report(&self, failure: &TaskFailure) {
        if !self.enabled {
            debug!(%failure, "uncaught task failure dropped (handlers disabled)");
            return;
        }
        // Snapshot under the lock so handlers may register or remove handlers
        // without deadlocking; changes apply from the next report.
        let handlers: Vec<Handler> = self.handlers.lock().values().cloned().collect();
        if handlers.is_empty() {
            error!(%failure, "uncaught task failure (no handlers registered)");
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(failure))).is_err() {
                error!(%failure, "uncaught error handler panicked while handling failure");
            }
        }
    }
}

impl fmt::Debug for UncaughtErrorSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncaughtErrorSupport")
            .field("enabled", &self.enabled)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure() -> TaskFailure {
        TaskFailure::new("boom")
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let support = UncaughtErrorSupport::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        support.add_handler(move |_| a.lock().push("first"));
        support.add_handler(move |_| b.lock().push("second"));
        support.report(&failure());
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let support = UncaughtErrorSupport::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tail = Arc::clone(&seen);
        support.add_handler(|_| panic!("handler exploded"));
        support.add_handler(move |f| tail.lock().push(f.message().to_string()));
        support.report(&failure());
        assert_eq!(*seen.lock(), vec!["boom".to_string()]);
    }

    #[test]
    fn removed_handler_is_not_invoked() {
        let support = UncaughtErrorSupport::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        let id = support.add_handler(move |_| a.lock().push(()));
        support.remove_handler(id);
        support.report(&failure());
        assert!(seen.lock().is_empty());
        // Removing again is a no-op.
        support.remove_handler(id);
    }

    #[test]
    fn disabled_registry_drops_failures() {
        let support = UncaughtErrorSupport::new(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        support.add_handler(move |_| a.lock().push(()));
        support.report(&failure());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn panic_payload_variants() {
        let from_str = TaskFailure::from_panic(None, Box::new("static"));
        assert_eq!(from_str.message(), "static");
        let from_string = TaskFailure::from_panic(Some("t".into()), Box::new("owned".to_string()));
        assert_eq!(from_string.message(), "owned");
        assert_eq!(from_string.task(), Some("t"));
        let opaque = TaskFailure::from_panic(None, Box::new(42_u32));
        assert_eq!(opaque.message(), "task panicked");
    }
}
