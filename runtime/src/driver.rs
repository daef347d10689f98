//! Deterministic simulation: a fixed-step clock plus an athlete who finishes
//! each effort after a configured amount of work.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::behavior::history::ExecutionSpan;
use crate::behavior::loop_coordinator::LoopState;
use crate::block::{BlockId, BlockKind, BlockState, BlockTree};
use crate::events::{CueEvent, RuntimeEvent, RuntimeWarning};
use crate::stack::{RuntimeStack, TickResult};
use crate::time::Timestamp;

/// Work time for efforts while the innermost loop is on `round`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EffortOverride {
    pub round: u32,
    pub secs: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    /// Clock step between ticks.
    pub tick_ms: u64,
    /// Work time for every effort leaf.
    pub effort_secs: f64,
    pub effort_overrides: Vec<EffortOverride>,
    /// Give up once the clock reaches this.
    pub max_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            tick_ms: 1000,
            effort_secs: 30.0,
            effort_overrides: Vec::new(),
            max_secs: 4 * 60 * 60,
        }
    }
}

impl DriveConfig {
    fn work_for(&self, round: Option<u32>) -> Duration {
        let secs = round
            .and_then(|r| self.effort_overrides.iter().find(|o| o.round == r))
            .map_or(self.effort_secs, |o| o.secs);
        let millis = (secs.max(0.0) * 1000.0).round() as u64;
        Duration::from_millis(millis.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub events: Vec<RuntimeEvent>,
    pub cues: Vec<CueEvent>,
    /// Clock reading when the simulation stopped.
    pub end: Timestamp,
    /// False if `max_secs` was reached first.
    pub completed: bool,
    pub ticks: u64,
}

impl SimulationReport {
    /// Closed execution spans in closing order.
    pub fn spans(&self) -> Vec<&ExecutionSpan> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::SpanClosed(span) => Some(span),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<&RuntimeWarning> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::Warning(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    /// `(round, at)` for every round start of `block`.
    pub fn round_starts(&self, block: BlockId) -> Vec<(u32, Timestamp)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::RoundStarted {
                    block: b, round, at, ..
                } if *b == block => Some((*round, *at)),
                _ => None,
            })
            .collect()
    }

    /// When `block` entered `state`, in order.
    pub fn transitions_to(&self, block: BlockId, state: BlockState) -> Vec<Timestamp> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RuntimeEvent::StateChanged { block: b, to, at, .. } if *b == block && *to == state => {
                    Some(*at)
                }
                _ => None,
            })
            .collect()
    }
}

/// Round of the innermost loop enclosing `id`, if any.
fn current_round(stack: &RuntimeStack, id: BlockId) -> Option<u32> {
    stack
        .tree()
        .ancestors(id)
        .into_iter()
        .rev()
        .find_map(|a| stack.memory().get::<LoopState>(a).map(|l| l.round))
}

/// Run `tree` to completion (or to `max_secs`) on a simulated clock.
pub fn simulate(tree: BlockTree, config: &DriveConfig) -> SimulationReport {
    let tick = Duration::from_millis(config.tick_ms.max(1));
    let limit = Timestamp::from_secs(config.max_secs);
    let mut stack = RuntimeStack::new(tree);
    let mut report = SimulationReport::default();

    let mut now = Timestamp::ZERO;
    stack.start(now);
    // the effort on top and when it became the top
    let mut entered: Option<(BlockId, Timestamp)> = None;

    while !stack.is_finished() && now < limit {
        let effort = stack.top().filter(|id| {
            stack
                .tree()
                .get(*id)
                .is_some_and(|b| b.kind == BlockKind::Effort && b.state == BlockState::Running)
        });

        let due = match effort {
            Some(id) => {
                let since = match entered {
                    Some((block, at)) if block == id => at,
                    _ => {
                        entered = Some((id, now));
                        now
                    }
                };
                Some(since + config.work_for(current_round(&stack, id)))
            }
            None => {
                entered = None;
                None
            }
        };

        if let Some(due) = due.filter(|due| *due <= now) {
            debug!(at = %now, due = %due, "effort done");
            stack.advance(now);
            entered = None;
            continue;
        }

        now = match due {
            Some(due) => (now + tick).min(due),
            None => now + tick,
        };
        if stack.tick(now) == TickResult::Advance {
            entered = None;
        }
        report.ticks += 1;
    }

    report.events = stack.drain_events();
    report.cues = stack.drain_cues();
    report.end = now;
    report.completed = stack.is_finished();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_to_their_round_only() {
        let config = DriveConfig {
            effort_secs: 45.0,
            effort_overrides: vec![EffortOverride { round: 3, secs: 70.0 }],
            ..DriveConfig::default()
        };
        assert_eq!(config.work_for(Some(2)), Duration::from_secs(45));
        assert_eq!(config.work_for(Some(3)), Duration::from_secs(70));
        assert_eq!(config.work_for(None), Duration::from_secs(45));
    }

    #[test]
    fn work_is_never_zero() {
        let config = DriveConfig {
            effort_secs: 0.0,
            ..DriveConfig::default()
        };
        assert_eq!(config.work_for(None), Duration::from_millis(1));
    }

    #[test]
    fn huge_time_limit_saturates_instead_of_overflowing() {
        let config: DriveConfig = toml::from_str("max_secs = 9223372036854775807").expect("parse");
        assert_eq!(Timestamp::from_secs(config.max_secs), Timestamp::from_millis(u64::MAX));

        let tree = crate::JitCompiler::default()
            .compile(&[wod::Statement::new(vec![wod::Fragment::Effort("Row".into())])])
            .expect("compiles");
        let report = simulate(tree, &config);
        assert!(report.completed);
        assert_eq!(report.end, Timestamp::from_secs(30));
    }
}
