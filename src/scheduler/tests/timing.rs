//! Delayed- and periodic-task tests against the real timer thread. These use
//! generous waits rather than exact timing assertions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::super::SchedulerContext;
use crate::error::ScheduleError;
use crate::task::Cancelable;
use crate::vpu::VpuKind;

fn wait_until(deadline: Duration, check: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    check()
}

#[test]
fn negative_delay_is_rejected() {
    let ctx = SchedulerContext::new();
    let result = ctx.delayed_task(None, || {}, -1);
    assert!(matches!(
        result,
        Err(ScheduleError::NegativeDelay { delay_ms: -1 })
    ));
}

#[test]
fn non_positive_period_is_rejected() {
    let ctx = SchedulerContext::new();
    assert!(matches!(
        ctx.periodic_task(None, || {}, 0),
        Err(ScheduleError::NonPositivePeriod { period_ms: 0 })
    ));
    assert!(matches!(
        ctx.periodic_task(None, || {}, -5),
        Err(ScheduleError::NonPositivePeriod { period_ms: -5 })
    ));
}

#[test]
fn delayed_task_runs_as_a_macro_task() {
    let ctx = SchedulerContext::new();
    let shared = Arc::clone(&ctx.shared);
    let seen = Arc::new(Mutex::new(None));
    let seen2 = Arc::clone(&seen);
    ctx.delayed_task(
        Some("later"),
        move || {
            *seen2.lock() = Some(shared.current_vpu());
        },
        10,
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(2), || seen.lock().is_some()));
    assert_eq!(*seen.lock(), Some(Some(VpuKind::Macro)));
    assert_eq!(ctx.current_vpu(), None);
}

#[test]
fn zero_delay_still_runs() {
    let ctx = SchedulerContext::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = Arc::clone(&ran);
    ctx.delayed_task(
        None,
        move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        },
        0,
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        ran.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn canceled_delayed_task_never_runs() {
    let ctx = SchedulerContext::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran2 = Arc::clone(&ran);
    let handle = ctx
        .delayed_task(
            None,
            move || {
                ran2.fetch_add(1, Ordering::SeqCst);
            },
            50,
        )
        .unwrap();
    handle.cancel();
    assert!(handle.is_canceled());
    thread::sleep(Duration::from_millis(120));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn periodic_task_repeats_until_canceled() {
    let ctx = SchedulerContext::new();
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks2 = Arc::clone(&ticks);
    let handle = ctx
        .periodic_task(
            Some("heartbeat"),
            move || {
                ticks2.fetch_add(1, Ordering::SeqCst);
            },
            5,
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        ticks.load(Ordering::SeqCst) >= 3
    }));
    handle.cancel();
    thread::sleep(Duration::from_millis(30));
    let settled = ticks.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(ticks.load(Ordering::SeqCst), settled);
}

#[test]
fn periodic_task_canceled_from_its_own_body_runs_once() {
    let ctx = SchedulerContext::new();
    let ticks = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Cancelable>>> = Arc::default();
    let ticks2 = Arc::clone(&ticks);
    let slot2 = Arc::clone(&slot);
    let handle = ctx
        .periodic_task(
            None,
            move || {
                ticks2.fetch_add(1, Ordering::SeqCst);
                if let Some(handle) = slot2.lock().as_ref() {
                    handle.cancel();
                }
            },
            25,
        )
        .unwrap();
    *slot.lock() = Some(handle);
    assert!(wait_until(Duration::from_secs(2), || {
        ticks.load(Ordering::SeqCst) >= 1
    }));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn periodic_occurrences_get_fresh_names() {
    let ctx = SchedulerContext::new();
    let names: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let names2 = Arc::clone(&names);
    ctx.add_uncaught_error_handler(move |failure| {
        names2.lock().push(failure.task().map(str::to_string));
    });
    let handle = ctx
        .periodic_task(None, || panic!("observe my name"), 5)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || names.lock().len() >= 2));
    handle.cancel();
    let names = names.lock();
    let first = names[0].as_deref().unwrap();
    let second = names[1].as_deref().unwrap();
    assert!(first.starts_with("PeriodicTask@"));
    assert!(second.starts_with("PeriodicTask@"));
    // Each delivery carries its own counter suffix.
    assert_ne!(first, second);
}

#[test]
fn periodic_occurrences_keep_an_explicit_name() {
    let ctx = SchedulerContext::new();
    let names: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let names2 = Arc::clone(&names);
    ctx.add_uncaught_error_handler(move |failure| {
        names2.lock().push(failure.task().map(str::to_string));
    });
    let handle = ctx
        .periodic_task(Some("heartbeat"), || panic!("observe my name"), 5)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || names.lock().len() >= 2));
    handle.cancel();
    let names = names.lock();
    assert_eq!(names[0].as_deref(), Some("heartbeat"));
    assert_eq!(names[1].as_deref(), Some("heartbeat"));
}

#[test]
fn now_is_monotonic() {
    let ctx = SchedulerContext::new();
    let first = ctx.now();
    thread::sleep(Duration::from_millis(5));
    let second = ctx.now();
    assert!(second >= first);
}
