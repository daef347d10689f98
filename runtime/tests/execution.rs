use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use runtime::behavior::history::{ExecutionSpan, MetricValue, SpanOutcome};
use runtime::behavior::loop_coordinator::{LoopPhase, LoopState};
use runtime::behavior::timer::TimerState;
use runtime::driver::EffortOverride;
use runtime::memory::{MemoryChange, MemoryValue, SubscriptionFilter};
use runtime::{
    BlockId, BlockState, Cue, DriveConfig, JitCompiler, MemoryKind, RuntimeError, RuntimeEvent,
    RuntimeStack, RuntimeWarning, TickResult, Timestamp, simulate,
};
use wod::{Fragment, RoundsValue, Statement, TimerValue, hints};

fn t(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn effort(name: &str) -> Statement {
    Statement::new(vec![Fragment::Effort(name.to_string())])
}

fn emom(rounds: u32) -> Statement {
    Statement::new(vec![
        Fragment::Timer(TimerValue::countdown_secs(60)),
        Fragment::Rounds(RoundsValue::fixed(rounds)),
        Fragment::Action("EMOM".into()),
    ])
    .with_children(vec![effort("Burpees")])
}

fn compile(statements: &[Statement]) -> runtime::BlockTree {
    JitCompiler::default().compile(statements).expect("compiles")
}

fn closed_spans(events: &[RuntimeEvent]) -> Vec<&ExecutionSpan> {
    events
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::SpanClosed(span) => Some(span),
            _ => None,
        })
        .collect()
}

#[test]
fn emom_waits_for_each_minute() {
    let tree = compile(&[emom(10)]);
    let interval = BlockId(1);
    let report = simulate(
        tree,
        &DriveConfig {
            effort_secs: 45.0,
            ..DriveConfig::default()
        },
    );

    assert!(report.completed);
    let starts: Vec<(u32, Timestamp)> = report.round_starts(interval);
    let expected: Vec<(u32, Timestamp)> = (1..=10).map(|r| (r, t(u64::from(r - 1) * 60))).collect();
    assert_eq!(starts, expected);
    assert_eq!(starts.last(), Some(&(10, t(540))));

    let waits = report.transitions_to(interval, BlockState::WaitingForInterval);
    let expected: Vec<Timestamp> = (0..10).map(|r| t(r * 60 + 45)).collect();
    assert_eq!(waits, expected);

    assert!(report.warnings().is_empty());
    assert_eq!(report.end, t(600));
}

#[test]
fn overrun_starts_next_round_at_once_and_realigns() {
    let tree = compile(&[emom(5)]);
    let interval = BlockId(1);
    let report = simulate(
        tree,
        &DriveConfig {
            effort_secs: 45.0,
            effort_overrides: vec![EffortOverride { round: 3, secs: 70.0 }],
            ..DriveConfig::default()
        },
    );

    assert_eq!(
        report.round_starts(interval),
        vec![(1, t(0)), (2, t(60)), (3, t(120)), (4, t(190)), (5, t(240))]
    );
    assert_eq!(
        report.warnings(),
        vec![&RuntimeWarning::IntervalOverrun {
            block: interval,
            round: 3,
            overrun: Duration::from_secs(10),
            at: t(190),
        }]
    );
    // round 4 ran 45s from 190 and waited only until the 240 boundary
    assert!(report
        .transitions_to(interval, BlockState::WaitingForInterval)
        .contains(&t(235)));
    assert_eq!(report.end, t(300));
}

#[test]
fn interval_round_start_is_synchronous_with_the_boundary_tick() {
    let mut stack = RuntimeStack::new(compile(&[emom(2)]));
    let interval = BlockId(1);
    let burpees = BlockId(2);
    stack.start(t(0));
    stack.advance(t(45));
    assert_eq!(stack.state(interval), Some(BlockState::WaitingForInterval));
    assert_eq!(
        stack.memory().get::<LoopState>(interval).map(|l| l.phase),
        Some(LoopPhase::WaitingForInterval)
    );

    assert_eq!(stack.tick(t(59)), TickResult::Continue);
    assert_eq!(stack.tick(t(60)), TickResult::Advance);
    assert_eq!(stack.top(), Some(burpees));
    assert_eq!(stack.state(burpees), Some(BlockState::Running));
    assert_eq!(stack.memory().get::<LoopState>(interval).map(|l| l.round), Some(2));
}

#[test]
fn aborting_deep_effort_cancels_one_span_per_block() {
    let workout = vec![
        Statement::new(vec![Fragment::Action("Strength".into())]).with_children(vec![
            Statement::new(vec![Fragment::Rounds(RoundsValue::fixed(3))])
                .with_children(vec![effort("Deadlift"), effort("Box Jumps")]),
        ]),
    ];
    let mut stack = RuntimeStack::new(compile(&workout));
    stack.start(t(0));
    let group = BlockId(1);
    let rounds = BlockId(2);
    let deadlift = BlockId(3);
    assert_eq!(stack.top(), Some(deadlift));
    assert_eq!(stack.tree().depth(deadlift), 3);
    stack.drain_events();

    stack.abort(group, t(12)).expect("abort");

    let events = stack.drain_events();
    let cancelled: Vec<BlockId> = closed_spans(&events)
        .into_iter()
        .filter(|s| s.outcome == Some(SpanOutcome::Cancelled))
        .inspect(|s| assert!(s.end.is_some_and(|end| end >= s.start)))
        .map(|s| s.block)
        .collect();
    assert_eq!(cancelled, vec![deadlift, rounds, group]);
    assert_eq!(stack.top(), Some(stack.tree().root()));
    assert_eq!(stack.state(group), Some(BlockState::Cancelled));
    assert!(stack.memory().get::<ExecutionSpan>(deadlift).is_none());
}

#[test]
fn aborting_the_running_effort_three_levels_deep() {
    let workout = vec![
        Statement::new(vec![Fragment::Action("Strength".into())]).with_children(vec![
            Statement::new(vec![Fragment::Rounds(RoundsValue::fixed(3))])
                .with_children(vec![effort("Deadlift"), effort("Box Jumps")]),
        ]),
    ];
    let mut stack = RuntimeStack::new(compile(&workout));
    stack.start(t(0));
    let rounds = BlockId(2);
    let deadlift = BlockId(3);
    let box_jumps = BlockId(4);
    assert_eq!(stack.tree().depth(deadlift), 3);
    stack.drain_events();

    stack.abort(deadlift, t(12)).expect("abort");

    let events = stack.drain_events();
    let closed = closed_spans(&events);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].block, deadlift);
    assert_eq!(closed[0].outcome, Some(SpanOutcome::Cancelled));
    assert_eq!(closed[0].start, t(0));
    assert_eq!(closed[0].end, Some(t(12)));
    assert_eq!(stack.top(), Some(rounds));
    assert_eq!(stack.state(rounds), Some(BlockState::Running));

    assert_eq!(stack.tick(t(13)), TickResult::Advance);
    assert_eq!(stack.top(), Some(box_jumps));
}

#[test]
fn amrap_around_an_empty_group_holds_until_the_cap() {
    let amrap = Statement::new(vec![
        Fragment::Timer(TimerValue::countdown_secs(60)),
        Fragment::Action("AMRAP".into()),
    ])
    .with_children(vec![Statement::new(vec![Fragment::Action("Rest".into())]).with_hint(hints::GROUP)]);
    let mut stack = RuntimeStack::new(compile(&[amrap]));
    let capped = BlockId(1);

    assert_eq!(stack.start(t(0)), TickResult::Advance);
    assert_eq!(stack.top(), Some(capped));
    assert_eq!(stack.state(capped), Some(BlockState::Running));

    assert_eq!(stack.tick(t(30)), TickResult::Continue);
    assert_eq!(stack.tick(t(60)), TickResult::Complete);

    let rounds = stack
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::RoundStarted { block, .. } if *block == capped))
        .count();
    assert_eq!(rounds, 1);
}

#[test]
fn many_instant_rounds_finish_without_deep_recursion() {
    let rounds = Statement::new(vec![Fragment::Rounds(RoundsValue::fixed(50_000))])
        .with_children(vec![Statement::new(vec![Fragment::Action("Rest".into())]).with_hint(hints::GROUP)]);
    let mut stack = RuntimeStack::new(compile(&[rounds]));

    assert_eq!(stack.start(t(0)), TickResult::Complete);
    let started = stack
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::RoundStarted { .. }))
        .count();
    assert_eq!(started, 50_000);
}

#[test]
fn aborting_a_leaf_resumes_with_the_next_sibling() {
    let workout = vec![
        Statement::new(vec![Fragment::Rounds(RoundsValue::fixed(2))])
            .with_children(vec![effort("Row"), effort("Run")]),
    ];
    let mut stack = RuntimeStack::new(compile(&workout));
    stack.start(t(0));
    stack.abort(BlockId(2), t(5)).expect("abort");
    assert_eq!(stack.top(), Some(BlockId(1)));

    assert_eq!(stack.tick(t(6)), TickResult::Advance);
    assert_eq!(stack.top(), Some(BlockId(3)));
}

#[test]
fn abort_of_unknown_or_inactive_block_is_rejected() {
    let workout = vec![effort("Row"), effort("Run")];
    let mut stack = RuntimeStack::new(compile(&workout));
    stack.start(t(0));

    assert_eq!(stack.abort(BlockId(99), t(1)), Err(RuntimeError::UnknownBlock(BlockId(99))));
    assert_eq!(stack.abort(BlockId(2), t(1)), Err(RuntimeError::NotActive(BlockId(2))));
    assert_eq!(stack.active_path(), &[BlockId(0), BlockId(1)]);
}

#[test]
fn aborting_the_root_ends_the_workout() {
    let mut stack = RuntimeStack::new(compile(&[effort("Row")]));
    stack.start(t(0));
    stack.abort(stack.tree().root(), t(3)).expect("abort");
    assert!(stack.is_finished());
    assert_eq!(stack.tick(t(4)), TickResult::Complete);
}

#[test]
fn rep_scheme_rounds_stamp_reps_on_spans() {
    let fran = vec![
        Statement::new(vec![Fragment::Rounds(RoundsValue::scheme(vec![21, 15, 9]))])
            .with_children(vec![effort("Thrusters"), effort("Pullups")]),
    ];
    let report = simulate(compile(&fran), &DriveConfig::default());
    assert!(report.completed);

    let thrusters: Vec<(Option<&MetricValue>, Option<&MetricValue>)> = report
        .spans()
        .into_iter()
        .filter(|s| s.label == "Thrusters")
        .map(|s| (s.metrics.get("round"), s.metrics.get("reps")))
        .collect();
    assert_eq!(
        thrusters,
        vec![
            (Some(&MetricValue::Count(1)), Some(&MetricValue::Count(21))),
            (Some(&MetricValue::Count(2)), Some(&MetricValue::Count(15))),
            (Some(&MetricValue::Count(3)), Some(&MetricValue::Count(9))),
        ]
    );
    assert_eq!(report.round_starts(BlockId(1)).len(), 3);
}

#[test]
fn time_bound_restarts_rounds_until_the_cap() {
    let amrap = vec![
        Statement::new(vec![
            Fragment::Timer(TimerValue::countdown_secs(300)),
            Fragment::Action("AMRAP".into()),
        ])
        .with_children(vec![effort("Pullups"), effort("Pushups")]),
    ];
    let report = simulate(compile(&amrap), &DriveConfig::default());
    assert!(report.completed);
    assert_eq!(report.end, t(300));

    // 60s per round; the cap lands on the last push-up
    let rounds: Vec<u32> = report.round_starts(BlockId(1)).into_iter().map(|(r, _)| r).collect();
    assert_eq!(rounds, vec![1, 2, 3, 4, 5]);

    let spans = report.spans();
    let last_child = spans
        .iter()
        .rev()
        .find(|s| s.block == BlockId(3))
        .expect("pushups span");
    assert_eq!(last_child.start, t(270));
    assert_eq!(last_child.end, Some(t(300)));
    assert!(spans.iter().all(|s| s.outcome == Some(SpanOutcome::Completed)));
}

#[test]
fn timer_with_children_finishes_on_whichever_comes_first() {
    let capped = vec![
        Statement::new(vec![Fragment::Timer(TimerValue::countdown_secs(90))])
            .with_children(vec![effort("Row"), effort("Ski")]),
    ];
    let report = simulate(compile(&capped), &DriveConfig::default());
    assert_eq!(report.end, t(60));

    let slow = DriveConfig {
        effort_secs: 50.0,
        ..DriveConfig::default()
    };
    let report = simulate(compile(&capped), &slow);
    assert_eq!(report.end, t(90));
    let expiries = report
        .events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::TimerExpired { block, .. } if *block == BlockId(1)))
        .count();
    assert_eq!(expiries, 1);
}

#[test]
fn countdown_and_round_cues() {
    let report = simulate(compile(&[emom(2)]), &DriveConfig {
        effort_secs: 45.0,
        ..DriveConfig::default()
    });
    let ids: Vec<String> = report.cues.iter().map(|c| c.cue.id()).collect();
    assert_eq!(
        ids,
        vec![
            "start",
            "countdown-3",
            "countdown-2",
            "countdown-1",
            "timer-complete",
            "round-start",
            "countdown-3",
            "countdown-2",
            "countdown-1",
            "timer-complete",
        ]
    );
    let round_start = report
        .cues
        .iter()
        .find(|c| c.cue == Cue::RoundStart(2))
        .expect("round start cue");
    assert_eq!(round_start.at, t(60));
}

#[test]
fn pause_freezes_timers_on_the_active_path() {
    let mut stack = RuntimeStack::new(compile(&[emom(2)]));
    let interval = BlockId(1);
    stack.start(t(0));
    stack.tick(t(20));
    stack.pause(t(20));
    stack.pause(t(25));
    assert_eq!(stack.tick(t(100)), TickResult::Continue);
    stack.resume(t(100));

    let elapsed = stack
        .memory()
        .get::<TimerState>(interval)
        .map(|timer| timer.elapsed(t(130)));
    assert_eq!(elapsed, Some(Duration::from_secs(50)));

    // the first boundary moved from 60 to 140
    stack.advance(t(110));
    assert_eq!(stack.tick(t(139)), TickResult::Continue);
    assert_eq!(stack.tick(t(140)), TickResult::Advance);
}

#[test]
fn clock_skew_is_clamped_and_reported() {
    let mut stack = RuntimeStack::new(compile(&[Statement::new(vec![Fragment::Timer(
        TimerValue::countdown_secs(30),
    )])]));
    let timer = BlockId(1);
    stack.start(t(0));
    stack.tick(t(10));
    stack.tick(t(4));

    let elapsed = stack.memory().get::<TimerState>(timer).map(|s| s.elapsed(t(10)));
    assert_eq!(elapsed, Some(Duration::from_secs(10)));
    assert_eq!(stack.now(), Some(t(10)));
    assert!(stack.drain_events().contains(&RuntimeEvent::Warning(RuntimeWarning::ClockSkew {
        previous: t(10),
        received: t(4),
    })));
}

#[test]
fn spans_reach_subscribers_through_shared_memory() {
    let mut stack = RuntimeStack::new(compile(&[effort("Row"), effort("Run")]));
    let stored = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&stored);
    stack
        .memory_mut()
        .subscribe(SubscriptionFilter::Kind(MemoryKind::Span), move |_, change| {
            if let MemoryChange::Released(MemoryValue::Span(span)) = change {
                sink.borrow_mut().push((span.label.clone(), span.outcome));
            }
        });

    stack.start(t(0));
    stack.advance(t(30));
    stack.advance(t(60));
    assert!(stack.is_finished());
    assert_eq!(
        *stored.borrow(),
        vec![
            ("Row".to_string(), Some(SpanOutcome::Completed)),
            ("Run".to_string(), Some(SpanOutcome::Completed)),
            ("workout".to_string(), Some(SpanOutcome::Completed)),
        ]
    );
}

#[test]
fn hinted_interval_runs_like_the_keyword_one() {
    let hinted = Statement::new(vec![
        Fragment::Timer(TimerValue::countdown_secs(60)),
        Fragment::Rounds(RoundsValue::fixed(3)),
    ])
    .with_hint(hints::REPEATING_INTERVAL)
    .with_children(vec![effort("Burpees")]);
    let config = DriveConfig {
        effort_secs: 40.0,
        ..DriveConfig::default()
    };
    let a = simulate(compile(&[hinted]), &config);
    let b = simulate(compile(&[emom(3)]), &config);
    assert_eq!(a.round_starts(BlockId(1)), b.round_starts(BlockId(1)));
    assert_eq!(a.end, b.end);
}
