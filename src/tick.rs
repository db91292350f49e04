//! Tick source capability
//!
//! A [`TickSource`] is the narrow interface the scheduler core requires from a
//! host-runtime binding: given a callback, arrange for it to be invoked at the
//! next opportunity appropriate to the bound primitive (microtask checkpoint,
//! message-queue turn, animation frame, post-frame moment, idle period, or
//! after a timer delay). The core never branches on which primitive backs a
//! VPU; it only requests and (best-effort) cancels ticks.

use std::fmt;
use std::time::Duration;

/// Callback invoked when a requested tick fires.
pub type TickCallback = Box<dyn FnOnce(TickContext) + Send>;

/// Opaque handle identifying a pending tick request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

impl TickHandle {
    /// Wrap a source-assigned identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The source-assigned identifier.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Capability that delivers a future callback per a specific host scheduling
/// primitive. One implementation exists per VPU kind, plus one for timers.
pub trait TickSource: Send + Sync {
    /// Ask the host to invoke `callback` at the next opportunity appropriate
    /// to this source's semantics. Never invokes the callback synchronously.
    fn request_tick(&self, callback: TickCallback) -> TickHandle;

    /// Best-effort cancellation of a pending request. A handle that already
    /// fired is ignored.
    fn cancel_tick(&self, handle: TickHandle);
}

/// Remaining-time probe attached to idle ticks, mirroring the deadline the
/// host's idle callback reports.
pub struct Deadline {
    remaining: Box<dyn Fn() -> Duration + Send>,
}

impl Deadline {
    /// Build a deadline from a time-remaining closure.
    pub fn new(remaining: impl Fn() -> Duration + Send + 'static) -> Self {
        Self {
            remaining: Box::new(remaining),
        }
    }

    /// Time remaining before the host reclaims control.
    pub fn time_remaining(&self) -> Duration {
        (self.remaining)()
    }
}

impl fmt::Debug for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("time_remaining", &self.time_remaining())
            .finish()
    }
}

/// Context handed to a tick callback when it fires.
#[derive(Debug, Default)]
pub struct TickContext {
    deadline: Option<Deadline>,
}

impl TickContext {
    /// A tick with no deadline attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// A tick carrying an idle deadline.
    pub fn with_deadline(deadline: Deadline) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Time remaining on this tick's deadline, if it carries one.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.deadline.as_ref().map(Deadline::time_remaining)
    }
}
