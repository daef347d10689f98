use std::time::Duration;

use tracing::trace;
use wod::TimerDirection;

use super::{Behavior, BehaviorContext, Directive};
use crate::events::RuntimeEvent;
use crate::time::Timestamp;

/// One continuous stretch of running time. `end` is `None` while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpan {
    pub start: Timestamp,
    pub end: Option<Timestamp>,
}

impl TimerSpan {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Accumulated running time of one block's timer.
/// Spans are ordered by start and at most the last one is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerState {
    spans: Vec<TimerSpan>,
}

impl TimerState {
    pub fn spans(&self) -> &[TimerSpan] {
        &self.spans
    }

    pub fn is_running(&self) -> bool {
        self.spans.last().is_some_and(TimerSpan::is_open)
    }

    /// Open a span at `now`. No-op (returns false) if already running.
    pub fn start(&mut self, now: Timestamp) -> bool {
        if self.is_running() {
            return false;
        }
        // keep spans ordered even if the caller's clock went backwards
        let start = self
            .spans
            .last()
            .and_then(|s| s.end)
            .map_or(now, |last_end| now.max(last_end));
        self.spans.push(TimerSpan { start, end: None });
        true
    }

    /// Close the open span at `now`. No-op (returns false) if not running.
    pub fn stop(&mut self, now: Timestamp) -> bool {
        match self.spans.last_mut() {
            Some(span) if span.is_open() => {
                span.end = Some(now.max(span.start));
                true
            }
            _ => false,
        }
    }

    pub fn elapsed(&self, now: Timestamp) -> Duration {
        self.spans
            .iter()
            .map(|span| match span.end {
                Some(end) => end.saturating_since(span.start),
                None => now.saturating_since(span.start),
            })
            .sum()
    }
}

/// Per-tick reading of a timer, published for downstream behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownStatus {
    pub elapsed: Duration,
    /// Until expiry, or until the next period boundary for repeating timers.
    pub remaining: Duration,
    /// Expiry edge fired during this pass.
    pub expired: bool,
    /// Total expiries so far (period boundaries for repeating timers).
    pub expirations: u64,
    pub direction: TimerDirection,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Expires once when elapsed reaches the duration.
    Once { duration: Duration },
    /// Expires at every multiple of the period.
    Repeating { period: Duration },
}

/// When a timer with children lets its block complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCompletion {
    /// Only when the timer expires.
    Expiry,
    /// Only when the children finish.
    Children,
    /// Whichever happens first.
    First,
}

#[derive(Debug, Clone)]
pub struct TimerBehavior {
    mode: TimerMode,
    direction: TimerDirection,
    completion: TimerCompletion,
    expirations: u64,
}

impl TimerBehavior {
    pub fn new(mode: TimerMode, direction: TimerDirection, completion: TimerCompletion) -> Self {
        TimerBehavior {
            mode,
            direction,
            completion,
            expirations: 0,
        }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn completion(&self) -> TimerCompletion {
        self.completion
    }

    fn has_expired(&self) -> bool {
        matches!(self.mode, TimerMode::Once { .. }) && self.expirations > 0
    }

    /// Recompute the countdown for `now`, firing the expiry edge at most once per boundary.
    fn observe(&mut self, ctx: &mut BehaviorContext<'_>) -> CountdownStatus {
        let (elapsed, running) = match ctx.memory.get::<TimerState>(ctx.block) {
            Some(state) => (state.elapsed(ctx.now), state.is_running()),
            None => (Duration::ZERO, false),
        };

        let (remaining, expirations) = match self.mode {
            TimerMode::Once { duration } => {
                let remaining = duration.saturating_sub(elapsed);
                (remaining, u64::from(remaining.is_zero()))
            }
            TimerMode::Repeating { period } => {
                let period_ms = period.as_millis().max(1);
                let elapsed_ms = elapsed.as_millis();
                let crossed = u64::try_from(elapsed_ms / period_ms).unwrap_or(u64::MAX);
                let into = elapsed_ms % period_ms;
                let remaining = Duration::from_millis(
                    u64::try_from(period_ms - into).unwrap_or(u64::MAX),
                );
                (remaining, crossed)
            }
        };

        let expired = expirations > self.expirations;
        if expired {
            self.expirations = expirations;
            trace!(block = %ctx.block, at = %ctx.now, expirations, "timer expired");
            ctx.outbox.push_event(RuntimeEvent::TimerExpired {
                block: ctx.block,
                at: ctx.now,
            });
        }

        let status = CountdownStatus {
            elapsed,
            remaining,
            expired,
            expirations: self.expirations,
            direction: self.direction,
            running,
        };
        ctx.memory.set(ctx.block, status);
        status
    }
}

impl Behavior for TimerBehavior {
    fn name(&self) -> &'static str {
        "timer"
    }

    fn on_start(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.expirations = 0;
        let mut state = TimerState::default();
        state.start(ctx.now);
        ctx.memory.set(ctx.block, state);
        self.observe(ctx);
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        let status = self.observe(ctx);
        match self.mode {
            TimerMode::Once { .. }
                if status.expired && self.completion != TimerCompletion::Children =>
            {
                Directive::Complete
            }
            _ => Directive::Continue,
        }
    }

    fn on_children_finished(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        if let TimerMode::Repeating { .. } = self.mode {
            return Directive::Continue;
        }
        self.observe(ctx);
        match self.completion {
            TimerCompletion::Children | TimerCompletion::First => Directive::Complete,
            TimerCompletion::Expiry if self.has_expired() => Directive::Complete,
            TimerCompletion::Expiry => Directive::AwaitExpiry,
        }
    }

    fn on_complete(&mut self, ctx: &mut BehaviorContext<'_>) {
        let now = ctx.now;
        ctx.memory.update::<TimerState>(ctx.block, |t| {
            t.stop(now);
        });
    }

    fn on_cancel(&mut self, ctx: &mut BehaviorContext<'_>) {
        let now = ctx.now;
        ctx.memory.update::<TimerState>(ctx.block, |t| {
            t.stop(now);
        });
    }

    fn on_pause(&mut self, ctx: &mut BehaviorContext<'_>) {
        let now = ctx.now;
        ctx.memory.update::<TimerState>(ctx.block, |t| {
            t.stop(now);
        });
    }

    fn on_resume(&mut self, ctx: &mut BehaviorContext<'_>) {
        let now = ctx.now;
        ctx.memory.update::<TimerState>(ctx.block, |t| {
            t.start(now);
        });
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn t(secs: u64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut timer = TimerState::default();
        assert!(timer.start(t(0)));
        assert!(!timer.start(t(5)));
        assert_eq!(timer.spans().len(), 1);

        assert!(timer.stop(t(10)));
        assert!(!timer.stop(t(20)));
        assert_eq!(timer.elapsed(t(30)), Duration::from_secs(10));
    }

    #[test]
    fn elapsed_sums_closed_spans_and_the_open_one() {
        let mut timer = TimerState::default();
        timer.start(t(0));
        timer.stop(t(10));
        timer.start(t(20));
        assert!(timer.is_running());
        assert_eq!(timer.elapsed(t(25)), Duration::from_secs(15));
    }

    #[test]
    fn stop_never_closes_before_start() {
        let mut timer = TimerState::default();
        timer.start(t(10));
        timer.stop(t(5));
        assert_eq!(timer.spans()[0].end, Some(t(10)));
        assert_eq!(timer.elapsed(t(50)), Duration::ZERO);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Start,
        Stop,
        Wait(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Start),
            Just(Op::Stop),
            (0u64..5_000).prop_map(Op::Wait),
        ]
    }

    proptest! {
        #[test]
        fn elapsed_is_monotonic_while_running_and_flat_while_stopped(ops in prop::collection::vec(op(), 1..64)) {
            let mut timer = TimerState::default();
            let mut now = Timestamp::ZERO;
            let mut last = Duration::ZERO;
            for op in ops {
                match op {
                    Op::Start => { timer.start(now); }
                    Op::Stop => { timer.stop(now); }
                    Op::Wait(ms) => {
                        let before = timer.elapsed(now);
                        now = Timestamp::from_millis(now.as_millis() + ms);
                        let after = timer.elapsed(now);
                        if timer.is_running() {
                            prop_assert_eq!(after, before + Duration::from_millis(ms));
                        } else {
                            prop_assert_eq!(after, before);
                        }
                    }
                }
                let current = timer.elapsed(now);
                prop_assert!(current >= last);
                last = current;
                prop_assert!(timer.spans().iter().rev().skip(1).all(|s| !s.is_open()));
            }
        }
    }
}
