//! Deterministic test support
//!
//! The timer-backed default tick sources deliver ticks on a background
//! thread, which makes ordering assertions racy. [`ManualTickSource`] records
//! tick requests instead and fires them only when told to, so a test drives
//! every flush from its own thread and observes queue state in between.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SchedulerConfig;
use crate::scheduler::{SchedulerContext, TickSourceSet};
use crate::tick::{Deadline, TickCallback, TickContext, TickHandle, TickSource};

/// A [`TickSource`] that queues tick requests until the test fires them.
#[derive(Default)]
pub struct ManualTickSource {
    pending: Mutex<VecDeque<(u64, TickCallback)>>,
    next_id: AtomicU64,
}

impl ManualTickSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of requested-but-unfired ticks.
    pub fn pending_ticks(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fire the oldest pending tick with no deadline attached. Returns false
    /// if nothing was pending.
    pub fn fire_next(&self) -> bool {
        self.fire(TickContext::new())
    }

    /// Fire the oldest pending tick carrying an idle deadline of `budget`,
    /// counted from the moment of firing.
    pub fn fire_next_with_deadline(&self, budget: Duration) -> bool {
        let expires = Instant::now() + budget;
        let deadline = Deadline::new(move || expires.saturating_duration_since(Instant::now()));
        self.fire(TickContext::with_deadline(deadline))
    }

    /// Fire ticks (including ones requested by the fired callbacks) until
    /// none remain. Returns how many fired.
    pub fn drain(&self) -> usize {
        let mut fired = 0;
        while self.fire_next() {
            fired += 1;
        }
        fired
    }

    fn fire(&self, ctx: TickContext) -> bool {
        // Pop before invoking: the callback may request further ticks.
        let next = self.pending.lock().pop_front();
        match next {
            Some((_, callback)) => {
                callback(ctx);
                true
            }
            None => false,
        }
    }
}

impl TickSource for ManualTickSource {
    fn request_tick(&self, callback: TickCallback) -> TickHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push_back((id, callback));
        TickHandle::new(id)
    }

    fn cancel_tick(&self, handle: TickHandle) {
        self.pending.lock().retain(|(id, _)| *id != handle.value());
    }
}

/// A context whose five VPUs all share one manual tick source, plus that
/// source. Delayed and periodic tasks still use the real timer thread.
pub fn manual_context(config: SchedulerConfig) -> (SchedulerContext, Arc<ManualTickSource>) {
    let source = ManualTickSource::new();
    let ctx = SchedulerContext::with_tick_sources(
        config,
        TickSourceSet::uniform(Arc::clone(&source) as Arc<dyn TickSource>),
    );
    (ctx, source)
}
