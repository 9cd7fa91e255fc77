#![allow(missing_docs)]

mod common;

use common::*;
use stepwise::{
    ErrorKind, FibBench, LockedJoin, ScheduleStep, ScheduleTrace, StrategyKind, TestingEngine,
};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

fn buggy_fib_trace() -> (ScheduleTrace, String) {
    let bench = FibBench::new(2);
    let report = explore(test_config(StrategyKind::Dfs, 50_000), move |rt| bench.run(rt));
    let run = report.first_bug().expect("DFS finds the fib bug");
    let message = run.bug.as_ref().expect("bug").message.clone();
    (run.trace.clone(), message)
}

#[test]
fn replay_reproduces_the_buggy_schedule() {
    init_test("replay_reproduces_the_buggy_schedule");
    let (trace, message) = buggy_fib_trace();
    assert!(!trace.is_empty());

    let bench = FibBench::new(2);
    let config = test_config(StrategyKind::Dfs, 1);
    let replay = TestingEngine::replay(&config, &trace, move |rt| bench.run(rt)).unwrap();

    assert!(replay.divergence.is_none(), "{:?}", replay.divergence);
    assert!(replay.reproduced);
    assert!(replay.result.trace.same_decisions(&trace));
    let bug = replay.result.bug.expect("bug reproduced");
    assert_eq!(bug.message, message);
    test_complete!("replay_reproduces_the_buggy_schedule", steps = trace.len());
}

#[test]
fn replay_from_saved_files() {
    init_test("replay_from_saved_files");
    let (trace, message) = buggy_fib_trace();
    let dir = tempfile::tempdir().unwrap();

    for name in ["bug.json", "bug.trace"] {
        test_section!(name);
        let path = dir.path().join(name);
        trace.save(&path).unwrap();
        let loaded = ScheduleTrace::load(&path).unwrap();
        assert_eq!(loaded, trace);

        let bench = FibBench::new(2);
        let config = test_config(StrategyKind::Random, 1);
        let replay = TestingEngine::replay(&config, &loaded, move |rt| bench.run(rt)).unwrap();
        assert!(replay.reproduced);
        assert_eq!(replay.result.bug.map(|bug| bug.message), Some(message.clone()));
    }
    test_complete!("replay_from_saved_files");
}

#[test]
fn replay_against_another_program_diverges() {
    init_test("replay_against_another_program_diverges");
    let (trace, _) = buggy_fib_trace();

    let config = test_config(StrategyKind::Dfs, 1);
    let replay = TestingEngine::replay(&config, &trace, |rt| LockedJoin.run(rt)).unwrap();

    assert!(!replay.reproduced);
    assert!(!replay.result.fully_explored);
    if let Some(divergence) = &replay.divergence {
        assert_eq!(divergence.kind(), ErrorKind::TraceDivergence);
    }
    test_complete!("replay_against_another_program_diverges");
}

#[test]
fn choices_are_replayed() {
    init_test("choices_are_replayed");
    let program = |rt: &stepwise::ControlledRuntime| -> stepwise::Result<()> {
        let a = rt.random_bool()?;
        let n = rt.random_int(10)?;
        let b = rt.fair_random_bool("site")?;
        rt.set_custom_state(u64::from(n));
        let task = rt.spawn("worker", move |rt| {
            rt.yield_now()?;
            Ok(u64::from(a) + u64::from(b))
        })?;
        let sum = rt.join(task)? + u64::from(n);
        rt.assert(sum < 100, "sum out of range")
    };

    let report = explore(test_config(StrategyKind::Random, 1), program);
    let trace = report.runs[0].trace.clone();
    assert!(matches!(trace.get(0), Some(ScheduleStep::Boolean { .. })));
    assert!(matches!(trace.get(1), Some(ScheduleStep::Integer { value }) if *value < 10));
    assert!(matches!(
        trace.get(2),
        Some(ScheduleStep::FairBoolean { id, .. }) if id == "site"
    ));

    let replay =
        TestingEngine::replay(&test_config(StrategyKind::Dfs, 1), &trace, program).unwrap();
    assert!(replay.reproduced);
    assert_eq!(replay.result.trace.steps, trace.steps);
    test_complete!("choices_are_replayed");
}

fn spin(rt: &stepwise::ControlledRuntime) -> stepwise::Result<()> {
    loop {
        rt.yield_now()?;
    }
}

#[test]
fn step_bound_bug_is_replayed() {
    init_test("step_bound_bug_is_replayed");
    let config = test_config(StrategyKind::Random, 3)
        .max_steps(5)
        .depth_bound_as_bug(true);
    let report = explore(config, spin);
    let run = report.first_bug().expect("bound reported as a bug");
    assert_eq!(run.bug.as_ref().map(|bug| bug.kind), Some(ErrorKind::StepBoundReached));
    assert!(run.trace.metadata.ended_on_bound);
    assert!(run.trace.metadata.bound_is_bug);
    assert_eq!(run.trace.metadata.step_bound, 5);

    // The replay configuration does not need to repeat the bound settings.
    let replay =
        TestingEngine::replay(&test_config(StrategyKind::Dfs, 1), &run.trace, spin).unwrap();
    assert!(replay.divergence.is_none(), "{:?}", replay.divergence);
    assert!(replay.reproduced);
    assert!(!replay.result.fully_explored);
    assert!(replay.result.hit_bound);
    assert_eq!(replay.result.bug, run.bug);
    test_complete!("step_bound_bug_is_replayed", steps = run.trace.len());
}

#[test]
fn quiet_step_bound_is_replayed_without_divergence() {
    init_test("quiet_step_bound_is_replayed_without_divergence");
    let config = test_config(StrategyKind::Random, 1).max_steps(4);
    let report = explore(config, spin);
    let run = &report.runs[0];
    assert!(run.bug.is_none());
    assert!(run.trace.metadata.ended_on_bound);

    let replay =
        TestingEngine::replay(&test_config(StrategyKind::Dfs, 1), &run.trace, spin).unwrap();
    assert!(replay.reproduced);
    assert!(replay.result.hit_bound);
    assert!(replay.result.bug.is_none());
}

#[test]
fn trace_too_short_for_the_program_is_not_explored() {
    init_test("trace_too_short_for_the_program_is_not_explored");
    let (mut trace, _) = buggy_fib_trace();
    trace.steps.truncate(trace.len() / 2);

    let bench = FibBench::new(2);
    let config = test_config(StrategyKind::Dfs, 1);
    let replay = TestingEngine::replay(&config, &trace, move |rt| bench.run(rt)).unwrap();

    let divergence = replay.divergence.expect("replay ran past the trace");
    assert_eq!(divergence.kind(), ErrorKind::TraceDivergence);
    assert!(!replay.reproduced);
    assert!(!replay.result.fully_explored);
    assert!(replay.result.bug.is_none());
    test_complete!("trace_too_short_for_the_program_is_not_explored");
}
