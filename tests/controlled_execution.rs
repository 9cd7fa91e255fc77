#![allow(missing_docs)]

mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepwise::{
    ControlledLock, ControlledMutex, ControlledRuntime, ErrorKind, StrategyKind, TestConfig,
};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

fn active_operations(rt: &ControlledRuntime) -> usize {
    rt.scheduler()
        .operations()
        .iter()
        .filter(|op| op.is_active())
        .count()
}

#[test]
fn lock_keeps_critical_sections_apart() {
    init_test("lock_keeps_critical_sections_apart");
    let max_active = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&max_active);

    let config = test_config(StrategyKind::Random, 300).stop_on_first_bug(false);
    let report = explore(config, move |rt| {
        let lock = Arc::new(ControlledLock::new(rt));
        let inside = Arc::new(AtomicBool::new(false));
        let mut tasks = Vec::new();
        for name in ["w0", "w1", "w2"] {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let observed = Arc::clone(&observed);
            tasks.push(rt.spawn(name, move |rt| {
                for _ in 0..2 {
                    let _guard = lock.acquire(&rt)?;
                    rt.assert(!inside.swap(true, Ordering::SeqCst), "two operations inside")?;
                    observed.fetch_max(active_operations(&rt), Ordering::SeqCst);
                    rt.yield_now()?;
                    inside.store(false, Ordering::SeqCst);
                }
                Ok(())
            })?);
        }
        let ids: Vec<_> = tasks.iter().map(|task| task.id()).collect();
        rt.wait_all(&ids)
    });

    assert_with_log!(!report.has_bugs(), "no overlapping critical sections", 0, report.report.num_of_found_bugs);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    test_complete!("lock_keeps_critical_sections_apart");
}

#[test]
fn unprotected_update_is_caught() {
    init_test("unprotected_update_is_caught");
    let report = explore(test_config(StrategyKind::Dfs, 1_000), |rt| {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for name in ["inc0", "inc1"] {
            let counter = Arc::clone(&counter);
            tasks.push(rt.spawn(name, move |rt| {
                let read = counter.load(Ordering::SeqCst);
                rt.yield_now()?;
                counter.store(read + 1, Ordering::SeqCst);
                Ok(())
            })?);
        }
        let ids: Vec<_> = tasks.iter().map(|task| task.id()).collect();
        rt.wait_all(&ids)?;
        let value = counter.load(Ordering::SeqCst);
        rt.assert(value == 2, format!("lost update: counter = {value}"))
    });

    let bug = report.first_bug().and_then(|run| run.bug.clone()).expect("lost update found");
    assert_eq!(bug.kind, ErrorKind::AssertionFailure);
    assert_eq!(bug.message, "lost update: counter = 1");
    test_complete!("unprotected_update_is_caught");
}

#[test]
fn mutex_protects_its_value() {
    init_test("mutex_protects_its_value");
    let report = explore(test_config(StrategyKind::Dfs, 10_000), |rt| {
        let counter = Arc::new(ControlledMutex::new(rt, 0_u32));
        let mut tasks = Vec::new();
        for name in ["inc0", "inc1"] {
            let counter = Arc::clone(&counter);
            tasks.push(rt.spawn(name, move |rt| {
                let mut guard = counter.lock(&rt)?;
                let read = *guard;
                rt.yield_now()?;
                *guard = read + 1;
                Ok(())
            })?);
        }
        let ids: Vec<_> = tasks.iter().map(|task| task.id()).collect();
        rt.wait_all(&ids)?;
        let value = *counter.lock(rt)?;
        rt.assert(value == 2, format!("lost update: counter = {value}"))
    });

    assert!(report.exhausted);
    assert!(!report.has_bugs());
    test_complete!("mutex_protects_its_value", runs = report.runs.len());
}

#[test]
fn step_bound_ends_iterations_quietly() {
    init_test("step_bound_ends_iterations_quietly");
    let config = test_config(StrategyKind::Random, 10)
        .max_steps(5)
        .stop_on_first_bug(false);
    let report = explore(config, |rt| {
        for _ in 0..100 {
            rt.yield_now()?;
        }
        Ok(())
    });

    assert!(!report.has_bugs());
    assert_eq!(report.runs.len(), 10);
    for run in &report.runs {
        assert!(run.steps <= 5, "steps {} over the bound", run.steps);
        assert!(run.hit_bound);
    }
    assert_eq!(report.report.max_fair_steps_hit_in_fair_tests, 10);
    test_complete!("step_bound_ends_iterations_quietly");
}

#[test]
fn step_bound_as_bug() {
    init_test("step_bound_as_bug");
    let config = test_config(StrategyKind::Dfs, 10)
        .max_steps(5)
        .depth_bound_as_bug(true);
    let report = explore(config, |rt| loop {
        rt.yield_now()?;
    });

    let bug = report.first_bug().and_then(|run| run.bug.clone()).expect("bound reported");
    assert_eq!(bug.kind, ErrorKind::StepBoundReached);
    assert_eq!(bug.message, "Scheduling steps bound of 5 reached.");
    test_complete!("step_bound_as_bug");
}

#[test]
fn uncontrolled_thread_is_reported() {
    init_test("uncontrolled_thread_is_reported");
    let report = explore(test_config(StrategyKind::Random, 5), |rt| {
        let handle = rt.clone();
        let stray = std::thread::Builder::new()
            .name("stray".into())
            .spawn(move || handle.yield_now())
            .expect("spawn stray thread");
        let stray_result = stray.join().expect("stray thread finished");
        assert_eq!(
            stray_result.unwrap_err().kind(),
            ErrorKind::UncontrolledConcurrency
        );
        rt.yield_now()
    });

    let bug = report.first_bug().and_then(|run| run.bug.clone()).expect("bug reported");
    assert_eq!(bug.kind, ErrorKind::UncontrolledConcurrency);
    assert!(bug.message.contains("'stray'"), "{}", bug.message);
    assert_eq!(report.runs.len(), 1);
    test_complete!("uncontrolled_thread_is_reported");
}

#[test]
fn task_results_and_waits() {
    init_test("task_results_and_waits");
    let config = test_config(StrategyKind::Pct, 50).stop_on_first_bug(false);
    let report = explore(config, |rt| {
        let slow = rt.spawn("slow", |rt| {
            rt.delay(Duration::from_secs(3600))?;
            rt.inject_context_switch()?;
            Ok(2_u32)
        })?;
        let fast = rt.spawn("fast", |rt| {
            rt.yield_now()?;
            Ok(40_u32)
        })?;

        let first = rt.wait_any(&[slow.id(), fast.id()])?;
        rt.assert(
            first == slow.id() || first == fast.id(),
            "wait_any returned an unrelated operation",
        )?;
        let total = rt.join(fast)? + rt.join(slow)?;
        rt.assert(total == 42, format!("total = {total}"))
    });

    assert!(!report.has_bugs(), "{:?}", report.report.bug_reports);
    assert_eq!(report.runs.len(), 50);
    test_complete!("task_results_and_waits");
}

#[test]
fn wait_any_rejects_an_empty_set() {
    init_test("wait_any_rejects_an_empty_set");
    let report = explore(test_config(StrategyKind::Random, 1), |rt| {
        let err = rt.wait_any(&[]).unwrap_err();
        rt.assert(err.kind() == ErrorKind::User, "empty wait_any accepted")
    });
    assert!(!report.has_bugs());
    test_complete!("wait_any_rejects_an_empty_set");
}

#[test]
fn failure_points_are_explored_both_ways() {
    init_test("failure_points_are_explored_both_ways");
    let injected = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&injected);
    let config = TestConfig::new(DEFAULT_TEST_SEED)
        .strategy(StrategyKind::Dfs)
        .iterations(10);
    let report = explore(config, move |rt| {
        if rt.failure_point()? {
            count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    });

    assert!(report.exhausted);
    assert_eq!(report.runs.len(), 2);
    assert_eq!(injected.load(Ordering::SeqCst), 1);
    test_complete!("failure_points_are_explored_both_ways");
}
