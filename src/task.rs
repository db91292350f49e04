//! Task entries and cancellation handles

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A one-shot task body.
pub type TaskBody = Box<dyn FnOnce() + Send>;

struct TaskCell {
    /// Present only when names are enabled on the owning context.
    name: Option<String>,
    /// Taken exactly once: either by execution or by cancellation.
    body: Option<TaskBody>,
    canceled: bool,
    /// Side action run on cancellation, e.g. disarming a pending timer.
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

/// The atomic unit of work: an optional name, a one-shot body and a canceled
/// flag. Cancellation takes the body out of the cell, so a canceled body can
/// never execute; canceling after execution has started is a no-op.
///
/// The entry is a shared handle: the owning VPU queue and the caller-held
/// [`Cancelable`] refer to the same cell.
#[derive(Clone)]
pub(crate) struct TaskEntry {
    cell: Arc<Mutex<TaskCell>>,
}

impl TaskEntry {
    pub(crate) fn new(name: Option<String>, body: TaskBody) -> Self {
        Self {
            cell: Arc::new(Mutex::new(TaskCell {
                name,
                body: Some(body),
                canceled: false,
                on_cancel: None,
            })),
        }
    }

    /// An entry carrying no body of its own; used by periodic tasks, where the
    /// entry only tracks the canceled flag and the disarm action while the
    /// repeating body lives with the timer.
    pub(crate) fn marker(name: Option<String>) -> Self {
        Self {
            cell: Arc::new(Mutex::new(TaskCell {
                name,
                body: None,
                canceled: false,
                on_cancel: None,
            })),
        }
    }

    /// Attach the action run when the entry is canceled.
    pub(crate) fn set_cancel_action(&self, action: impl FnOnce() + Send + 'static) {
        self.cell.lock().on_cancel = Some(Box::new(action));
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.cell.lock().name.clone()
    }

    /// Take the body for execution. Returns `None` if the entry was canceled
    /// or already executed.
    pub(crate) fn take_body(&self) -> Option<TaskBody> {
        self.cell.lock().body.take()
    }

    /// Take the body and run it, if still present.
    pub(crate) fn execute(&self) {
        if let Some(body) = self.take_body() {
            body();
        }
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cell.lock().canceled
    }

    pub(crate) fn cancel(&self) {
        let action = {
            let mut cell = self.cell.lock();
            if cell.canceled {
                return;
            }
            cell.canceled = true;
            cell.body = None;
            cell.on_cancel.take()
        };
        // Run the side action outside the cell lock; it may reach back into
        // scheduler state (timer disarm).
        if let Some(action) = action {
            action();
        }
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell.lock();
        f.debug_struct("TaskEntry")
            .field("name", &cell.name)
            .field("canceled", &cell.canceled)
            .field("pending", &cell.body.is_some())
            .finish()
    }
}

impl fmt::Display for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell.lock();
        match (&cell.name, cell.canceled) {
            (_, true) => write!(f, "-"),
            (Some(name), _) => write!(f, "{name}"),
            (None, _) => write!(f, "<anonymous>"),
        }
    }
}

/// Caller-held handle permitting pre-execution cancellation of a submitted
/// task. The caller owns the handle; the VPU owns the underlying entry.
#[derive(Clone, Debug)]
pub struct Cancelable {
    entry: TaskEntry,
}

impl Cancelable {
    pub(crate) fn new(entry: TaskEntry) -> Self {
        Self { entry }
    }

    /// A handle whose task was dropped before it was ever queued (runaway
    /// purge path).
    pub(crate) fn canceled() -> Self {
        let entry = TaskEntry::marker(None);
        entry.cancel();
        Self { entry }
    }

    /// Cancel the task. Once this returns the body is guaranteed never to
    /// execute. Canceling a task whose execution already started, or canceling
    /// twice, is a no-op.
    pub fn cancel(&self) {
        self.entry.cancel();
    }

    /// True if the task was canceled.
    pub fn is_canceled(&self) -> bool {
        self.entry.is_canceled()
    }
}
