//! Scheduler context
//!
//! A [`SchedulerContext`] owns the five VPUs, the timer thread and the shared
//! cross-VPU state (configuration, uncaught-error registry, the
//! currently-active-VPU marker and the task-name counter). The free functions
//! in the crate root delegate to a lazily-created default context; embedders
//! that need isolation or custom tick sources build their own.

#[cfg(test)]
mod tests;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Environment, SchedulerConfig};
use crate::error::{ScheduleError, ScheduleResult};
use crate::task::{Cancelable, TaskBody, TaskEntry};
use crate::tick::TickSource;
use crate::timer::{Timer, TimerTickSource};
use crate::uncaught::{HandlerId, TaskFailure, UncaughtErrorSupport};
use crate::vpu::{FlushMode, VirtualProcessorUnit, VpuKind};

/// Sentinel for "no VPU active on this context".
const NO_VPU: u8 = u8::MAX;

/// State shared between a context's VPUs and its facade.
pub(crate) struct Shared {
    config: SchedulerConfig,
    uncaught: UncaughtErrorSupport,
    /// `VpuKind::as_u8` of the active VPU, or [`NO_VPU`].
    current: AtomicU8,
    next_task_id: AtomicU64,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Arc<Self> {
        let uncaught = UncaughtErrorSupport::new(config.enable_uncaught_error_handlers);
        Arc::new(Self {
            config,
            uncaught,
            current: AtomicU8::new(NO_VPU),
            next_task_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn uncaught(&self) -> &UncaughtErrorSupport {
        &self.uncaught
    }

    pub(crate) fn current_vpu(&self) -> Option<VpuKind> {
        VpuKind::from_u8(self.current.load(Ordering::Acquire))
    }

    /// Mark `kind` as the active VPU. At most one VPU per context is active
    /// at a time; nested activation is a bug in the tick-source binding.
    pub(crate) fn enter_vpu(&self, kind: VpuKind) {
        debug_assert!(
            self.current_vpu().is_none(),
            "activating {kind} while {:?} is active",
            self.current_vpu()
        );
        self.current.store(kind.as_u8(), Ordering::Release);
    }

    pub(crate) fn exit_vpu(&self, kind: VpuKind) {
        debug_assert_eq!(self.current_vpu(), Some(kind));
        self.current.store(NO_VPU, Ordering::Release);
    }

    /// Resolve the name a task is queued under. `None` when names are
    /// disabled; the explicit name when one was given; otherwise a synthesized
    /// `Prefix@N` with a context-wide monotonically increasing `N`.
    pub(crate) fn generate_name(&self, prefix: &str, explicit: Option<&str>) -> Option<String> {
        if !self.config.enable_names {
            return None;
        }
        Some(match explicit {
            Some(name) => name.to_string(),
            None => {
                let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}@{id}")
            }
        })
    }
}

/// The tick sources backing each VPU of a context, in phase order. Host
/// bindings supply one per VPU kind; the default binding routes all five
/// through the timer thread with zero delay.
pub struct TickSourceSet {
    pub micro: Arc<dyn TickSource>,
    pub macro_task: Arc<dyn TickSource>,
    pub animation_frame: Arc<dyn TickSource>,
    pub after_frame: Arc<dyn TickSource>,
    pub on_idle: Arc<dyn TickSource>,
}

impl TickSourceSet {
    /// Bind one source to all five VPUs.
    pub fn uniform(source: Arc<dyn TickSource>) -> Self {
        Self {
            micro: Arc::clone(&source),
            macro_task: Arc::clone(&source),
            animation_frame: Arc::clone(&source),
            after_frame: Arc::clone(&source),
            on_idle: source,
        }
    }
}

/// An isolated scheduler: five VPUs, a timer thread and an uncaught-error
/// registry. Contexts are independent; tasks, names and handlers never cross
/// between them.
pub struct SchedulerContext {
    shared: Arc<Shared>,
    micro: Arc<VirtualProcessorUnit>,
    macro_task: Arc<VirtualProcessorUnit>,
    animation_frame: Arc<VirtualProcessorUnit>,
    after_frame: Arc<VirtualProcessorUnit>,
    on_idle: Arc<VirtualProcessorUnit>,
    timer: Arc<Timer>,
    start: Instant,
}

impl SchedulerContext {
    /// A context with default configuration and timer-backed tick sources.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// A context with the given configuration and timer-backed tick sources.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let timer = Timer::spawn(config.log_worker_interactions);
        let source: Arc<dyn TickSource> =
            Arc::new(TimerTickSource::new(Arc::clone(&timer), Duration::ZERO));
        Self::build(config, TickSourceSet::uniform(source), timer)
    }

    /// A context whose VPUs are driven by host-supplied tick sources. The
    /// timer thread still backs delayed and periodic tasks.
    pub fn with_tick_sources(config: SchedulerConfig, sources: TickSourceSet) -> Self {
        let timer = Timer::spawn(config.log_worker_interactions);
        Self::build(config, sources, timer)
    }

    fn build(config: SchedulerConfig, sources: TickSourceSet, timer: Arc<Timer>) -> Self {
        let shared = Shared::new(config);
        let vpu = |kind, mode, source| {
            VirtualProcessorUnit::new(kind, mode, source, Arc::clone(&shared))
        };
        Self {
            micro: vpu(VpuKind::Micro, FlushMode::Rounds, sources.micro),
            macro_task: vpu(VpuKind::Macro, FlushMode::Rounds, sources.macro_task),
            animation_frame: vpu(
                VpuKind::AnimationFrame,
                FlushMode::Rounds,
                sources.animation_frame,
            ),
            after_frame: vpu(VpuKind::AfterFrame, FlushMode::Rounds, sources.after_frame),
            on_idle: vpu(VpuKind::OnIdle, FlushMode::Deadline, sources.on_idle),
            shared,
            timer,
            start: Instant::now(),
        }
    }

    /// Queue a task on the micro VPU: runs before the host regains control.
    pub fn micro_task<F>(&self, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_on(VpuKind::Micro, "MicroTask", name, task)
    }

    /// Queue a task on the macro VPU: an ordinary event-loop turn.
    pub fn macro_task<F>(&self, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_on(VpuKind::Macro, "MacroTask", name, task)
    }

    /// Queue a task to run immediately before the next render frame.
    pub fn animation_frame<F>(&self, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_on(VpuKind::AnimationFrame, "AnimationFrameTask", name, task)
    }

    /// Queue a task to run immediately after the next render frame.
    pub fn after_frame<F>(&self, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_on(VpuKind::AfterFrame, "AfterFrameTask", name, task)
    }

    /// Queue a task to run when the host is idle, under the idle deadline.
    pub fn on_idle<F>(&self, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue_on(VpuKind::OnIdle, "OnIdleTask", name, task)
    }

    fn queue_on<F>(&self, kind: VpuKind, prefix: &str, name: Option<&str>, task: F) -> Cancelable
    where
        F: FnOnce() + Send + 'static,
    {
        self.vpu(kind)
            .queue(self.shared.generate_name(prefix, name), task)
    }

    /// Run `task` once after `delay_ms` milliseconds, delivered as a macro
    /// task so `current_vpu()` reports [`VpuKind::Macro`] inside the body.
    ///
    /// A zero delay means "as soon as possible", still asynchronously.
    /// Negative delays are rejected.
    pub fn delayed_task<F>(
        &self,
        name: Option<&str>,
        task: F,
        delay_ms: i64,
    ) -> ScheduleResult<Cancelable>
    where
        F: FnOnce() + Send + 'static,
    {
        if delay_ms < 0 {
            return Err(ScheduleError::NegativeDelay { delay_ms });
        }
        let name = self.shared.generate_name("DelayedTask", name);
        let task_name = name.clone();
        let vpu = Arc::clone(&self.macro_task);
        let shared = Arc::clone(&self.shared);
        let entry = TaskEntry::new(
            name,
            Box::new(move || {
                become_macro_task_on(&vpu, &shared, task_name, Box::new(task));
            }),
        );
        let fire = entry.clone();
        let id = self.timer.arm(
            Duration::from_millis(delay_ms as u64),
            None,
            Box::new(move || fire.execute()),
        );
        let timer = Arc::clone(&self.timer);
        entry.set_cancel_action(move || timer.disarm(id));
        Ok(Cancelable::new(entry))
    }

    /// Run `task` every `period_ms` milliseconds (first occurrence one period
    /// from now), each occurrence delivered as a macro task. Cancellation
    /// stops future occurrences; an occurrence already being delivered may
    /// still complete.
    ///
    /// Non-positive periods are rejected.
    pub fn periodic_task<F>(
        &self,
        name: Option<&str>,
        task: F,
        period_ms: i64,
    ) -> ScheduleResult<Cancelable>
    where
        F: FnMut() + Send + 'static,
    {
        if period_ms <= 0 {
            return Err(ScheduleError::NonPositivePeriod { period_ms });
        }
        let explicit = name.map(str::to_string);
        let entry = TaskEntry::marker(self.shared.generate_name("PeriodicTask", name));
        let marker = entry.clone();
        let vpu = Arc::clone(&self.macro_task);
        let shared = Arc::clone(&self.shared);
        // The repeating body lives with the timer; each firing wraps one
        // invocation of it into a fresh macro-task delivery, named at delivery
        // time so synthesized occurrence names stay distinct.
        let body = Arc::new(Mutex::new(task));
        let period = Duration::from_millis(period_ms as u64);
        let id = self.timer.arm(
            period,
            Some(period),
            Box::new(move || {
                if marker.is_canceled() {
                    return;
                }
                let body = Arc::clone(&body);
                let occurrence = shared.generate_name("PeriodicTask", explicit.as_deref());
                become_macro_task_on(
                    &vpu,
                    &shared,
                    occurrence,
                    Box::new(move || (*body.lock())()),
                );
            }),
        );
        let timer = Arc::clone(&self.timer);
        entry.set_cancel_action(move || timer.disarm(id));
        Ok(Cancelable::new(entry))
    }

    /// Milliseconds elapsed since this context was created. Monotonic.
    pub fn now(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// The kind of the VPU currently flushing on this context, if any.
    pub fn current_vpu(&self) -> Option<VpuKind> {
        self.shared.current_vpu()
    }

    /// True while any of this context's VPUs is mid-flush.
    pub fn is_vpu_activated(&self) -> bool {
        self.current_vpu().is_some()
    }

    /// The VPU serving `kind`.
    pub fn vpu(&self, kind: VpuKind) -> &Arc<VirtualProcessorUnit> {
        match kind {
            VpuKind::Micro => &self.micro,
            VpuKind::Macro => &self.macro_task,
            VpuKind::AnimationFrame => &self.animation_frame,
            VpuKind::AfterFrame => &self.after_frame,
            VpuKind::OnIdle => &self.on_idle,
        }
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &SchedulerConfig {
        self.shared.config()
    }

    /// Deployment mode of this context.
    pub fn environment(&self) -> Environment {
        self.shared.config().environment
    }

    /// True if task and VPU names are retained.
    pub fn are_names_enabled(&self) -> bool {
        self.shared.config().enable_names
    }

    /// True if tasks enqueued after runaway detection are dropped.
    pub fn purge_tasks_when_runaway_detected(&self) -> bool {
        self.shared.config().purge_tasks_when_runaway_detected
    }

    /// Reentrant enqueues tolerated within one flush.
    pub fn runaway_threshold(&self) -> usize {
        self.shared.config().runaway_threshold
    }

    /// True if uncaught-error handlers are dispatched.
    pub fn are_uncaught_error_handlers_enabled(&self) -> bool {
        self.shared.uncaught().is_enabled()
    }

    /// Host-binding hint: schedule macro tasks via a message channel.
    pub fn use_message_channel_to_schedule_tasks(&self) -> bool {
        self.shared.config().use_message_channel_to_schedule_tasks
    }

    /// Host-binding hint: run delayed-task timers on a dedicated worker.
    pub fn use_worker_to_schedule_delayed_tasks(&self) -> bool {
        self.shared.config().use_worker_to_schedule_delayed_tasks
    }

    /// True if timer/worker interactions are trace-logged.
    pub fn should_log_worker_interactions(&self) -> bool {
        self.shared.config().log_worker_interactions
    }

    /// Register an uncaught-error handler on this context.
    pub fn add_uncaught_error_handler(
        &self,
        handler: impl Fn(&TaskFailure) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.uncaught().add_handler(handler)
    }

    /// Remove a previously registered uncaught-error handler.
    pub fn remove_uncaught_error_handler(&self, id: HandlerId) {
        self.shared.uncaught().remove_handler(id);
    }

    /// Report a failure to this context's uncaught-error handlers, as if a
    /// task body had panicked with it.
    pub fn report_uncaught_error(&self, failure: TaskFailure) {
        self.shared.uncaught().report(&failure);
    }
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("environment", &self.environment())
            .field("current_vpu", &self.current_vpu())
            .finish()
    }
}

/// Deliver a timer-originated body as a macro task: head-insert it and flush
/// the macro VPU on the calling stack, so the body observes
/// `current_vpu() == Some(Macro)`. Must only be called while no VPU is
/// active, i.e. from the timer thread.
fn become_macro_task_on(
    vpu: &Arc<VirtualProcessorUnit>,
    shared: &Shared,
    name: Option<String>,
    task: TaskBody,
) {
    debug_assert!(
        shared.current_vpu().is_none(),
        "becoming a macro task while {:?} is active",
        shared.current_vpu()
    );
    vpu.queue_next(name, task);
    vpu.activate();
}

static DEFAULT_CONTEXT: Lazy<SchedulerContext> = Lazy::new(SchedulerContext::new);

/// The process-wide default context backing the crate-root free functions.
/// Created on first use with `SchedulerConfig::default()`.
pub fn default_context() -> &'static SchedulerContext {
    &DEFAULT_CONTEXT
}
