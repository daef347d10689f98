use std::time::Duration;

use super::loop_coordinator::LoopState;
use super::timer::CountdownStatus;
use super::{Behavior, BehaviorContext, Directive};
use crate::events::Cue;

/// Turns timer thresholds and round transitions into abstract cues.
/// Performs no audio I/O.
#[derive(Debug, Clone)]
pub struct SoundBehavior {
    /// Remaining-time marks, largest first.
    thresholds: Vec<Duration>,
    last_remaining: Option<Duration>,
    last_expirations: u64,
    last_round: u32,
}

impl SoundBehavior {
    pub fn new(countdown_secs: &[u32]) -> Self {
        let mut thresholds: Vec<Duration> = countdown_secs
            .iter()
            .filter(|s| **s > 0)
            .map(|s| Duration::from_secs(u64::from(*s)))
            .collect();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();
        SoundBehavior {
            thresholds,
            last_remaining: None,
            last_expirations: 0,
            last_round: 0,
        }
    }

    fn observe(&mut self, ctx: &mut BehaviorContext<'_>) {
        if let Some(status) = ctx.memory.get::<CountdownStatus>(ctx.block).copied() {
            if let Some(previous) = self.last_remaining {
                for mark in &self.thresholds {
                    if previous > *mark && status.remaining <= *mark && !status.remaining.is_zero()
                    {
                        let secs = u32::try_from(mark.as_secs()).unwrap_or(u32::MAX);
                        ctx.outbox.push_cue(Cue::Countdown(secs), ctx.block, ctx.now);
                    }
                }
            }
            if status.expirations > self.last_expirations {
                self.last_expirations = status.expirations;
                ctx.outbox.push_cue(Cue::TimerComplete, ctx.block, ctx.now);
            }
            self.last_remaining = Some(status.remaining);
        }

        if let Some(round) = ctx.memory.get::<LoopState>(ctx.block).map(|l| l.round) {
            if round > self.last_round {
                if self.last_round > 0 {
                    ctx.outbox.push_cue(Cue::RoundStart(round), ctx.block, ctx.now);
                }
                self.last_round = round;
            }
        }
    }
}

impl Behavior for SoundBehavior {
    fn name(&self) -> &'static str {
        "sound"
    }

    fn on_start(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.last_remaining = None;
        self.last_expirations = 0;
        self.last_round = 0;
        ctx.outbox.push_cue(Cue::Start, ctx.block, ctx.now);
        self.observe(ctx);
    }

    fn on_tick(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        self.observe(ctx);
        Directive::Continue
    }

    fn on_children_finished(&mut self, ctx: &mut BehaviorContext<'_>) -> Directive {
        self.observe(ctx);
        Directive::Continue
    }
}
