//! Context-surface tests: name synthesis, config mirroring, error reporting.

use parking_lot::Mutex;
use std::sync::Arc;

use super::super::{Shared, SchedulerContext};
use crate::config::{Environment, SchedulerConfig};
use crate::uncaught::TaskFailure;

#[test]
fn generated_names_are_unique_per_context() {
    let shared = Shared::new(SchedulerConfig::default());
    assert_eq!(
        shared.generate_name("MicroTask", None),
        Some("MicroTask@1".to_string())
    );
    // The counter is shared across prefixes.
    assert_eq!(
        shared.generate_name("MacroTask", None),
        Some("MacroTask@2".to_string())
    );
}

#[test]
fn explicit_names_pass_through_untouched() {
    let shared = Shared::new(SchedulerConfig::default());
    assert_eq!(
        shared.generate_name("MicroTask", Some("render")),
        Some("render".to_string())
    );
}

#[test]
fn no_names_when_disabled() {
    let shared = Shared::new(SchedulerConfig::production());
    assert_eq!(shared.generate_name("MicroTask", None), None);
    assert_eq!(shared.generate_name("MicroTask", Some("render")), None);
}

#[test]
fn accessors_mirror_the_configuration() {
    let config = SchedulerConfig::production()
        .with_names(true)
        .with_runaway_threshold(42)
        .with_purge_on_runaway(false);
    let ctx = SchedulerContext::with_config(config.clone());
    assert_eq!(ctx.environment(), Environment::Production);
    assert!(ctx.are_names_enabled());
    assert_eq!(ctx.runaway_threshold(), 42);
    assert!(!ctx.purge_tasks_when_runaway_detected());
    assert!(!ctx.are_uncaught_error_handlers_enabled());
    assert!(ctx.use_message_channel_to_schedule_tasks());
    assert!(ctx.use_worker_to_schedule_delayed_tasks());
    assert!(!ctx.should_log_worker_interactions());
    assert_eq!(ctx.config(), &config);
}

#[test]
fn vpus_carry_their_names_in_development() {
    let ctx = SchedulerContext::new();
    for kind in crate::VpuKind::ALL {
        assert_eq!(ctx.vpu(kind).name(), Some(kind.name()));
        assert_eq!(ctx.vpu(kind).kind(), kind);
    }
}

#[test]
fn explicitly_reported_errors_reach_handlers() {
    let ctx = SchedulerContext::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    let id = ctx.add_uncaught_error_handler(move |failure| {
        seen2.lock().push(failure.message().to_string());
    });
    ctx.report_uncaught_error(TaskFailure::new("manual"));
    ctx.remove_uncaught_error_handler(id);
    ctx.report_uncaught_error(TaskFailure::new("after removal"));
    assert_eq!(*seen.lock(), vec!["manual".to_string()]);
}

#[test]
fn contexts_are_isolated() {
    let a = SchedulerContext::new();
    let b = SchedulerContext::new();
    let seen = Arc::new(Mutex::new(0_usize));
    let seen2 = Arc::clone(&seen);
    a.add_uncaught_error_handler(move |_| *seen2.lock() += 1);
    b.report_uncaught_error(TaskFailure::new("elsewhere"));
    assert_eq!(*seen.lock(), 0);
    a.report_uncaught_error(TaskFailure::new("here"));
    assert_eq!(*seen.lock(), 1);
}
