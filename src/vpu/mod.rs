//! Virtual processor units
//!
//! A VPU is a named FIFO queue of tasks bound to exactly one [`TickSource`].
//! Queuing a task onto an idle VPU requests a tick; when the tick fires the
//! VPU flushes the tasks present at that moment. Tasks enqueued by running
//! task bodies are deferred to the next flush, so a VPU under steady
//! re-enqueue pressure still yields to its siblings, and a runaway guard
//! bounds how much work one flush may generate into its own queue.
//!
//! # Ordering
//!
//! Within one VPU, execution order equals enqueue order, modulo cancellation
//! (canceled tasks are skipped, never reordered). Across VPUs the core never
//! reorders ticks; relative ordering is whatever the bound tick sources
//! deliver.

pub(crate) mod queue;
pub(crate) mod runaway;


use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

use crate::scheduler::Shared;
use crate::task::{Cancelable, TaskBody, TaskEntry};
use crate::tick::{TickContext, TickSource};
use queue::TaskQueue;
use runaway::RunawayGuard;

/// Minimum idle-deadline budget worth starting another task for.
const MIN_TASK_TIME: Duration = Duration::from_millis(1);

/// The execution classes tasks can be submitted to, ordered by the phase in
/// which a browser-like host runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpuKind {
    /// Runs immediately after the current task, before yielding to the host.
    Micro,
    /// The host's ordinary event-loop turn.
    Macro,
    /// Immediately before the next render frame.
    AnimationFrame,
    /// Immediately after the next render frame.
    AfterFrame,
    /// When the host is idle, under a deadline.
    OnIdle,
}

impl VpuKind {
    /// All kinds, in phase order.
    pub const ALL: [VpuKind; 5] = [
        VpuKind::Micro,
        VpuKind::Macro,
        VpuKind::AnimationFrame,
        VpuKind::AfterFrame,
        VpuKind::OnIdle,
    ];

    /// Display name of the VPU kind.
    pub fn name(&self) -> &'static str {
        match self {
            VpuKind::Micro => "Micro",
            VpuKind::Macro => "Macro",
            VpuKind::AnimationFrame => "AnimationFrame",
            VpuKind::AfterFrame => "AfterFrame",
            VpuKind::OnIdle => "OnIdle",
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            VpuKind::Micro => 0,
            VpuKind::Macro => 1,
            VpuKind::AnimationFrame => 2,
            VpuKind::AfterFrame => 3,
            VpuKind::OnIdle => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<VpuKind> {
        VpuKind::ALL.get(value as usize).copied()
    }
}

impl fmt::Display for VpuKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a flush consumes the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Snapshot the queue length at flush entry and run exactly that many
    /// tasks; work enqueued during the flush waits for the next tick.
    Rounds,
    /// Run tasks while the tick's deadline has at least [`MIN_TASK_TIME`]
    /// remaining, then re-request a tick if tasks remain. A tick without a
    /// deadline falls back to the snapshot behavior.
    Deadline,
}

struct VpuState {
    queue: TaskQueue,
    /// True iff a tick has been requested and has not yet fired.
    scheduled: bool,
    /// True while this VPU's flush is executing.
    active: bool,
    guard: RunawayGuard,
}

/// Processing unit responsible for executing tasks queued against one host
/// scheduling primitive.
pub struct VirtualProcessorUnit {
    kind: VpuKind,
    name: Option<String>,
    flush_mode: FlushMode,
    tick_source: Arc<dyn TickSource>,
    shared: Arc<Shared>,
    state: Mutex<VpuState>,
}

impl VirtualProcessorUnit {
    pub(crate) fn new(
        kind: VpuKind,
        flush_mode: FlushMode,
        tick_source: Arc<dyn TickSource>,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let name = shared
            .config()
            .enable_names
            .then(|| kind.name().to_string());
        let threshold = shared.config().runaway_threshold;
        Arc::new(Self {
            kind,
            name,
            flush_mode,
            tick_source,
            shared,
            state: Mutex::new(VpuState {
                queue: TaskQueue::new(),
                scheduled: false,
                active: false,
                guard: RunawayGuard::new(threshold),
            }),
        })
    }

    /// The execution class this VPU serves.
    pub fn kind(&self) -> VpuKind {
        self.kind
    }

    /// The VPU's diagnostic name; `None` when names are disabled.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of tasks currently queued.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Queue a task for execution, requesting a tick if the VPU is neither
    /// scheduled nor mid-flush. Never blocks and never runs the body
    /// synchronously. The returned handle cancels exactly this task.
    pub fn queue<F>(self: &Arc<Self>, name: Option<String>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        let name = if self.shared.config().enable_names {
            name
        } else {
            None
        };
        let entry = TaskEntry::new(name, Box::new(task));
        if self.enqueue(entry.clone(), true) {
            Cancelable::new(entry)
        } else {
            // Dropped by the runaway purge; hand back a dead handle.
            Cancelable::canceled()
        }
    }

    /// Insert a task at the head of the queue without requesting a tick.
    /// Only used by the timer delivery path, which activates the VPU itself
    /// immediately afterwards, so the no-stranded-task invariant holds.
    pub(crate) fn queue_next(self: &Arc<Self>, name: Option<String>, task: TaskBody) {
        let entry = TaskEntry::new(name, task);
        self.enqueue(entry, false);
    }

    /// Synchronously flush on the caller's stack, as if a tick had fired.
    pub(crate) fn activate(self: &Arc<Self>) {
        self.flush(TickContext::new());
    }

    /// Returns false if the entry was dropped by the runaway purge.
    fn enqueue(self: &Arc<Self>, entry: TaskEntry, to_back: bool) -> bool {
        let request = {
            let mut st = self.state.lock();
            if st.active {
                let purge = self.shared.config().purge_tasks_when_runaway_detected;
                if st.guard.is_runaway() && purge {
                    return false;
                }
                if st.guard.note_reentrant_enqueue() {
                    let pending = self
                        .shared
                        .config()
                        .enable_names
                        .then(|| st.queue.task_names());
                    warn!(
                        vpu = %self,
                        threshold = st.guard.threshold(),
                        pending = ?pending,
                        purge,
                        "runaway task scheduling detected within a single flush"
                    );
                    if purge {
                        return false;
                    }
                }
            }
            if to_back {
                st.queue.push_back(entry);
            } else {
                st.queue.push_front(entry);
            }
            if to_back && !st.active && !st.scheduled {
                st.scheduled = true;
                true
            } else {
                false
            }
        };
        if request {
            self.request_tick();
        }
        true
    }

    /// Invoked when this VPU's tick fires. Snapshots the queue, runs tasks
    /// per the flush mode with per-task panic containment, and re-requests a
    /// tick if tasks remain afterwards.
    pub(crate) fn flush(self: &Arc<Self>, ctx: TickContext) {
        let snapshot = {
            let mut st = self.state.lock();
            st.active = true;
            st.scheduled = false;
            st.guard.reset();
            st.queue.len()
        };
        self.shared.enter_vpu(self.kind);
        match self.flush_mode {
            FlushMode::Deadline if ctx.time_remaining().is_some() => self.run_until_deadline(&ctx),
            _ => self.run_snapshot(snapshot),
        }
        self.shared.exit_vpu(self.kind);
        let request = {
            let mut st = self.state.lock();
            st.active = false;
            if !st.queue.is_empty() && !st.scheduled {
                st.scheduled = true;
                true
            } else {
                false
            }
        };
        if request {
            self.request_tick();
        }
    }

    fn run_snapshot(&self, snapshot: usize) {
        for _ in 0..snapshot {
            let Some(entry) = self.state.lock().queue.pop_front() else {
                break;
            };
            self.run_entry(entry);
        }
    }

    fn run_until_deadline(&self, ctx: &TickContext) {
        loop {
            match ctx.time_remaining() {
                Some(remaining) if remaining >= MIN_TASK_TIME => {}
                _ => break,
            }
            let Some(entry) = self.state.lock().queue.pop_front() else {
                break;
            };
            self.run_entry(entry);
        }
    }

    /// Run one entry. Canceled entries are skipped; a panicking body is
    /// caught here and routed to the uncaught-error registry so the flush
    /// loop keeps going.
    fn run_entry(&self, entry: TaskEntry) {
        let Some(body) = entry.take_body() else {
            trace!(vpu = %self, task = %entry, "skipping canceled task");
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(body)) {
            let failure = crate::uncaught::TaskFailure::from_panic(entry.name(), payload);
            self.shared.uncaught().report(&failure);
        }
    }

    fn request_tick(self: &Arc<Self>) {
        let vpu = Arc::clone(self);
        let _ = self
            .tick_source
            .request_tick(Box::new(move |ctx| vpu.flush(ctx)));
    }
}

impl fmt::Display for VirtualProcessorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => f.write_str(self.kind.name()),
        }
    }
}

impl fmt::Debug for VirtualProcessorUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("VirtualProcessorUnit")
            .field("kind", &self.kind)
            .field("queued", &st.queue.len())
            .field("scheduled", &st.scheduled)
            .field("active", &st.active)
            .finish()
    }
}
