//! Round sequencing for Rounds, Interval and time-bound blocks.
//!
//! Interval rounds are gated by period boundaries on the block's own timer,
//! never by child completion alone. Boundaries sit at whole multiples of the
//! period, so an overrunning round does not push later rounds back.

use std::time::Duration;

use tracing::{debug, warn};

use super::timer::{CountdownStatus, TimerState};
use super::{Behavior, BehaviorContext, Directive};
use crate::events::{RuntimeEvent, RuntimeWarning};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopMode {
    FixedRounds { rounds: u32 },
    /// One round per entry; the entry is that round's rep target.
    RepScheme { reps: Vec<u32> },
    Interval { rounds: u32, period: Duration },
    /// Repeat until the block's own timer expires.
    TimeBound,
}

impl LoopMode {
    pub fn total_rounds(&self) -> Option<u32> {
        match self {
            LoopMode::FixedRounds { rounds } | LoopMode::Interval { rounds, .. } => Some(*rounds),
            LoopMode::RepScheme { reps } => Some(reps.len() as u32),
            LoopMode::TimeBound => None,
        }
    }

    fn rep_target(&self, round: u32) -> Option<u32> {
        match self {
            LoopMode::RepScheme { reps } => {
                let index = usize::try_from(round.checked_sub(1)?).ok()?;
                reps.get(index).copied()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    RoundRunning,
    WaitingForInterval,
    Complete,
    Cancelled,
}

/// Published under `loop:<blockId>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub phase: LoopPhase,
    /// 1-based; 0 before the first round.
    pub round: u32,
    pub total_rounds: Option<u32>,
    /// Reps for the current round under a rep scheme.
    pub rep_target: Option<u32>,
    pub round_started_at: Timestamp,
    /// Elapsed time on the block's timer at which the current interval round ends.
    pub next_boundary: Option<Duration>,
}

impl LoopState {
    fn idle(total_rounds: Option<u32>) -> Self {
        LoopState {
            phase: LoopPhase::Idle,
            round: 0,
            total_rounds,
            rep_target: None,
            round_started_at: Timestamp::ZERO,
            next_boundary: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopCoordinatorBehavior {
    mode: LoopMode,
    state: LoopState,
}

impl LoopCoordinatorBehavior {
    pub fn new(mode: LoopMode) -> Self {
        let state = LoopState::idle(mode.total_rounds());
        LoopCoordinatorBehavior { mode, state }
    }

    pub fn mode(&self) -> &LoopMode {
        &self.mode
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    fn publish(&self, ctx: &mut BehaviorContext<'_>) {
        ctx.memory.set(ctx.block, self.state.clone());
    }

    fn begin_round(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        round: u32,
        boundary: Option<Duration>,
    ) {
        self.state.phase = LoopPhase::RoundRunning;
        self.state.round = round;
        self.state.rep_target = self.mode.rep_target(round);
        self.state.round_started_at = ctx.now;
        self.state.next_boundary = boundary;
        self.publish(ctx);

        debug!(block = %ctx.block, round, total = ?self.state.total_rounds, at = %ctx.now, "round started");
        ctx.outbox.push_event(RuntimeEvent::RoundStarted {
            block: ctx.block,
            round,
            total: self.state.total_rounds,
            at: ctx.now,
        });
    }

    fn finish(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        self.state.phase = LoopPhase::Complete;
        self.publish(ctx);
        Directive::Complete
    }

    /// Elapsed time on this block's timer at `now`.
    fn timer_elapsed(ctx: &BehaviorContext<'_>) -> Duration {
        ctx.memory
            .get::<TimerState>(ctx.block)
            .map(|t| t.elapsed(ctx.now))
            .unwrap_or_default()
    }

    /// Move past an interval boundary at `elapsed`: next round, or done after the last one.
    fn cross_boundary(
        &mut self,
        ctx: &mut BehaviorContext<'_>,
        elapsed: Duration,
        period: Duration,
        rounds: u32,
    ) -> Directive {
        if self.state.round >= rounds {
            return self.finish(ctx);
        }
        let period_ms = period.as_millis().max(1);
        let next_index = elapsed.as_millis() / period_ms + 1;
        let boundary =
            Duration::from_millis(u64::try_from(next_index * period_ms).unwrap_or(u64::MAX));
        let round = self.state.round + 1;
        self.begin_round(ctx, round, Some(boundary));
        Directive::NextRound
    }
}

impl Behavior for LoopCoordinatorBehavior {
    fn name(&self) -> &'static str {
        "loop"
    }

    fn on_start(&mut self, ctx: &mut BehaviorContext<'_>) {
        let boundary = match self.mode {
            LoopMode::Interval { period, .. } => Some(period),
            _ => None,
        };
        self.begin_round(ctx, 1, boundary);
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        let LoopMode::Interval { rounds, period } = self.mode else {
            return Directive::Continue;
        };
        if self.state.phase != LoopPhase::WaitingForInterval {
            return Directive::Continue;
        }
        let elapsed = Self::timer_elapsed(ctx);
        match self.state.next_boundary {
            Some(boundary) if elapsed >= boundary => {
                self.cross_boundary(ctx, elapsed, period, rounds)
            }
            _ => Directive::Continue,
        }
    }

    fn on_children_finished(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        match self.mode.clone() {
            LoopMode::FixedRounds { .. } | LoopMode::RepScheme { .. } => {
                let total = self.mode.total_rounds().unwrap_or(0);
                if self.state.round >= total {
                    self.finish(ctx)
                } else {
                    let round = self.state.round + 1;
                    self.begin_round(ctx, round, None);
                    Directive::NextRound
                }
            }
            LoopMode::TimeBound => {
                // the cap already passed; no further rounds
                let capped = ctx
                    .memory
                    .get::<CountdownStatus>(ctx.block)
                    .is_some_and(|s| s.expirations > 0);
                if capped {
                    return self.finish(ctx);
                }
                // a round that took no time would repeat forever at this instant
                let instant_round = self.state.round > 0 && self.state.round_started_at == ctx.now;
                if ctx.child_count == 0 || instant_round {
                    return Directive::AwaitExpiry;
                }
                let round = self.state.round + 1;
                self.begin_round(ctx, round, None);
                Directive::NextRound
            }
            LoopMode::Interval { rounds, period } => {
                let elapsed = Self::timer_elapsed(ctx);
                let boundary = self.state.next_boundary.unwrap_or(period);
                if elapsed < boundary {
                    self.state.phase = LoopPhase::WaitingForInterval;
                    self.publish(ctx);
                    return Directive::AwaitInterval;
                }
                if elapsed > boundary {
                    let overrun = elapsed - boundary;
                    warn!(
                        block = %ctx.block,
                        round = self.state.round,
                        overrun_ms = overrun.as_millis() as u64,
                        "interval round overran its boundary"
                    );
                    ctx.outbox.warn(RuntimeWarning::IntervalOverrun {
                        block: ctx.block,
                        round: self.state.round,
                        overrun,
                        at: ctx.now,
                    });
                }
                self.cross_boundary(ctx, elapsed, period, rounds)
            }
        }
    }

    fn on_complete(&mut self, ctx: &mut BehaviorContext<'_>) {
        if self.state.phase != LoopPhase::Complete {
            self.state.phase = LoopPhase::Complete;
            self.publish(ctx);
        }
    }

    fn on_cancel(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.state.phase = LoopPhase::Cancelled;
        self.publish(ctx);
    }
}
