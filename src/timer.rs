//! Timer thread
//!
//! One background thread owns every armed timer for a scheduler context. It
//! waits on a command mailbox until the earliest deadline, then invokes the
//! due callbacks on its own stack; periodic timers re-arm themselves at a
//! fixed rate until disarmed. Delayed/periodic tasks and the default
//! [`TimerTickSource`] VPU binding are both delivered through it.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::tick::{TickCallback, TickContext, TickHandle, TickSource};

/// Callback invoked when a timer fires. Periodic timers invoke it once per
/// firing.
pub(crate) type TimerCallback = Box<dyn FnMut() + Send>;

enum TimerCmd {
    Arm {
        id: u64,
        delay: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    },
    Disarm(u64),
    Shutdown,
}

/// Handle to the timer thread. Arming and disarming never block; commands are
/// applied by the thread between firings.
pub(crate) struct Timer {
    tx: Sender<TimerCmd>,
    next_id: AtomicU64,
    log: bool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer {
    pub(crate) fn spawn(log: bool) -> Arc<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("tickline-timer".to_string())
            .spawn(move || timer_loop(rx))
            .expect("failed to spawn timer thread");
        Arc::new(Self {
            tx,
            next_id: AtomicU64::new(1),
            log,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Arm a timer firing after `delay`, and every `period` thereafter when
    /// one is given. Returns the id used to disarm it.
    pub(crate) fn arm(
        &self,
        delay: Duration,
        period: Option<Duration>,
        callback: TimerCallback,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.log {
            trace!(id, ?delay, ?period, "arming timer");
        }
        let _ = self.tx.send(TimerCmd::Arm {
            id,
            delay,
            period,
            callback,
        });
        id
    }

    /// Best-effort cancellation; a timer that already fired (and is not
    /// periodic) is ignored.
    pub(crate) fn disarm(&self, id: u64) {
        if self.log {
            trace!(id, "disarming timer");
        }
        let _ = self.tx.send(TimerCmd::Disarm(id));
    }

    fn shutdown(&self) {
        let _ = self.tx.send(TimerCmd::Shutdown);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // The final Arc may be dropped from a timer callback, on the
            // timer thread itself; joining would deadlock then.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Slot {
    callback: TimerCallback,
    period: Option<Duration>,
}

fn timer_loop(rx: Receiver<TimerCmd>) {
    let mut slots: HashMap<u64, Slot> = HashMap::new();
    // Min-heap of (deadline, id). Entries for disarmed timers go stale in the
    // heap and are skipped when they surface.
    let mut armed: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while let Some(&Reverse((at, id))) = armed.peek() {
            if at > now {
                break;
            }
            armed.pop();
            let rearm = match slots.get_mut(&id) {
                Some(slot) => {
                    (slot.callback)();
                    slot.period
                }
                None => None,
            };
            match rearm {
                // Fixed-rate: the next deadline advances from the previous
                // one, not from when the callback finished.
                Some(period) => armed.push(Reverse((at + period, id))),
                None => {
                    slots.remove(&id);
                }
            }
        }

        let cmd = match armed.peek() {
            Some(&Reverse((at, _))) => {
                let timeout = at.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
        };
        match cmd {
            TimerCmd::Arm {
                id,
                delay,
                period,
                callback,
            } => {
                slots.insert(id, Slot { callback, period });
                armed.push(Reverse((Instant::now() + delay, id)));
            }
            TimerCmd::Disarm(id) => {
                slots.remove(&id);
            }
            TimerCmd::Shutdown => break,
        }
    }
}

/// [`TickSource`] delivering ticks through the timer thread after a fixed
/// delay. With a zero delay this is the default binding for every VPU in a
/// plain Rust host: a tick fires on the next timer-thread turn, never
/// synchronously.
pub(crate) struct TimerTickSource {
    timer: Arc<Timer>,
    delay: Duration,
}

impl TimerTickSource {
    pub(crate) fn new(timer: Arc<Timer>, delay: Duration) -> Self {
        Self { timer, delay }
    }
}

impl TickSource for TimerTickSource {
    fn request_tick(&self, callback: TickCallback) -> TickHandle {
        let mut callback = Some(callback);
        let id = self.timer.arm(
            self.delay,
            None,
            Box::new(move || {
                if let Some(callback) = callback.take() {
                    callback(TickContext::new());
                }
            }),
        );
        TickHandle::new(id)
    }

    fn cancel_tick(&self, handle: TickHandle) {
        self.timer.disarm(handle.value());
    }
}
