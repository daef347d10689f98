//! The closed set of compilation strategies and their precedence order.
//!
//! Each strategy claims a statement either through its hint tag or through a
//! structural test of the fragment kinds. TimeBoundRounds and Interval have no
//! safe structural test; without a hint they fall back to scanning Effort and
//! Action text for the workout-format keyword.

use std::fmt;
use std::time::Duration;

use wod::fragment::{FragmentKind, format_clock};
use wod::{Statement, hints};

use crate::behavior::{
    AttachedBehavior, LoopCoordinatorBehavior, LoopMode, TimerBehavior, TimerCompletion, TimerMode,
};
use crate::block::BlockKind;
use crate::config::CompilerConfig;
use crate::error::CompileErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    TimeBoundRounds,
    Interval,
    Timer,
    Rounds,
    Group,
    Effort,
}

impl StrategyKind {
    /// Fixed precedence order: first match wins.
    pub const PRECEDENCE: [StrategyKind; 6] = [
        StrategyKind::TimeBoundRounds,
        StrategyKind::Interval,
        StrategyKind::Timer,
        StrategyKind::Rounds,
        StrategyKind::Group,
        StrategyKind::Effort,
    ];

    /// The hint tag that claims a statement for this strategy.
    pub fn hint(self) -> &'static str {
        match self {
            StrategyKind::TimeBoundRounds => hints::TIME_BOUND,
            StrategyKind::Interval => hints::REPEATING_INTERVAL,
            StrategyKind::Timer => hints::TIMER,
            StrategyKind::Rounds => hints::FIXED_ROUNDS,
            StrategyKind::Group => hints::GROUP,
            StrategyKind::Effort => hints::EFFORT,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::TimeBoundRounds => "time-bound rounds",
            StrategyKind::Interval => "interval",
            StrategyKind::Timer => "timer",
            StrategyKind::Rounds => "rounds",
            StrategyKind::Group => "group",
            StrategyKind::Effort => "effort",
        };
        f.write_str(name)
    }
}

/// Block kind and behaviors a strategy wants for one statement.
/// Sound and history are added by the compiler according to its configuration.
#[derive(Debug)]
pub struct BlockPlan {
    pub kind: BlockKind,
    pub behaviors: Vec<AttachedBehavior>,
}

pub type MatchFn = fn(&Statement, &CompilerConfig) -> bool;
pub type BuildFn = fn(&Statement) -> Result<BlockPlan, CompileErrorKind>;

/// A (predicate, builder) pair.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub kind: StrategyKind,
    structural: MatchFn,
    build: BuildFn,
}

impl Strategy {
    pub fn of(kind: StrategyKind) -> Strategy {
        let (structural, build): (MatchFn, BuildFn) = match kind {
            StrategyKind::TimeBoundRounds => (matches_time_bound, build_time_bound),
            StrategyKind::Interval => (matches_interval, build_interval),
            StrategyKind::Timer => (matches_timer, build_timer),
            StrategyKind::Rounds => (matches_rounds, build_rounds),
            StrategyKind::Group => (matches_group, build_group),
            StrategyKind::Effort => (matches_effort, build_effort),
        };
        Strategy {
            kind,
            structural,
            build,
        }
    }

    /// Hint path or structural (keyword) path.
    pub fn matches(&self, statement: &Statement, config: &CompilerConfig) -> bool {
        self.claims_by_hint(statement) || self.claims_structurally(statement, config)
    }

    pub fn claims_by_hint(&self, statement: &Statement) -> bool {
        statement.has_hint(self.kind.hint())
    }

    pub fn claims_structurally(&self, statement: &Statement, config: &CompilerConfig) -> bool {
        (self.structural)(statement, config)
    }

    pub fn build(&self, statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
        (self.build)(statement)
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy").field("kind", &self.kind).finish()
    }
}

/// Ordered list of strategies consulted by the compiler.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Strategy>,
}

impl StrategyRegistry {
    /// The standard precedence: TimeBoundRounds, Interval, Timer, Rounds, Group, Effort.
    pub fn standard() -> Self {
        Self::with_order(&StrategyKind::PRECEDENCE)
    }

    pub fn with_order(kinds: &[StrategyKind]) -> Self {
        StrategyRegistry {
            strategies: kinds.iter().copied().map(Strategy::of).collect(),
        }
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind).collect()
    }

    /// First strategy claiming `statement`. A hinted strategy is chosen over
    /// any structural match, so an explicit hint can claim any statement.
    pub fn select(&self, statement: &Statement, config: &CompilerConfig) -> Option<&Strategy> {
        self.strategies
            .iter()
            .find(|s| s.claims_by_hint(statement))
            .or_else(|| {
                self.strategies
                    .iter()
                    .find(|s| s.claims_structurally(statement, config))
            })
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

const TIME_BOUND_KEYWORD: &str = "AMRAP";
const INTERVAL_KEYWORD: &str = "EMOM";

fn matches_time_bound(statement: &Statement, config: &CompilerConfig) -> bool {
    config.legacy_keywords
        && statement.has_fragment(FragmentKind::Timer)
        && statement.mentions_keyword(TIME_BOUND_KEYWORD)
}

fn matches_interval(statement: &Statement, config: &CompilerConfig) -> bool {
    config.legacy_keywords
        && statement.has_fragment(FragmentKind::Timer)
        && statement.mentions_keyword(INTERVAL_KEYWORD)
}

fn matches_timer(statement: &Statement, _: &CompilerConfig) -> bool {
    statement.has_fragment(FragmentKind::Timer)
}

fn matches_rounds(statement: &Statement, _: &CompilerConfig) -> bool {
    statement.has_fragment(FragmentKind::Rounds)
}

fn matches_group(statement: &Statement, _: &CompilerConfig) -> bool {
    !statement.has_fragment(FragmentKind::Timer)
        && !statement.has_fragment(FragmentKind::Rounds)
        && !statement.children.is_empty()
}

fn matches_effort(statement: &Statement, _: &CompilerConfig) -> bool {
    !statement.has_fragment(FragmentKind::Timer) && !statement.has_fragment(FragmentKind::Rounds)
}

/// Positive duration of the statement's Timer fragment.
fn timer_duration(statement: &Statement, what: &'static str) -> Result<Duration, CompileErrorKind> {
    let timer = statement
        .timer()
        .ok_or(CompileErrorKind::MissingTimer(what))?;
    let millis = u64::try_from(timer.millis)
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| CompileErrorKind::NonPositiveDuration(format_clock(timer.millis)))?;
    Ok(Duration::from_millis(millis))
}

/// Validated rounds count and rep scheme of the statement's Rounds fragment.
fn rounds_of(statement: &Statement, what: &'static str) -> Result<(u32, Vec<u32>), CompileErrorKind> {
    let rounds = statement
        .rounds()
        .ok_or(CompileErrorKind::MissingRounds(what))?;
    if rounds.count == 0 {
        return Err(CompileErrorKind::ZeroRounds);
    }
    if rounds.is_rep_scheme() {
        if rounds.scheme.len() != rounds.count as usize {
            return Err(CompileErrorKind::RepSchemeMismatch {
                count: rounds.count,
                scheme: rounds.scheme.len(),
            });
        }
        if rounds.scheme.contains(&0) {
            return Err(CompileErrorKind::ZeroReps);
        }
    }
    Ok((rounds.count, rounds.scheme.clone()))
}

fn timer_direction(statement: &Statement) -> wod::TimerDirection {
    statement.timer().map(|t| t.direction).unwrap_or_default()
}

fn build_time_bound(statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    let duration = timer_duration(statement, "time-bound")?;
    Ok(BlockPlan {
        kind: BlockKind::Timer,
        behaviors: vec![
            AttachedBehavior::Timer(TimerBehavior::new(
                TimerMode::Once { duration },
                timer_direction(statement),
                TimerCompletion::Expiry,
            )),
            AttachedBehavior::LoopCoordinator(LoopCoordinatorBehavior::new(LoopMode::TimeBound)),
        ],
    })
}

fn build_interval(statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    let period = timer_duration(statement, "interval")?;
    let (rounds, _) = rounds_of(statement, "interval")?;
    Ok(BlockPlan {
        kind: BlockKind::Interval,
        behaviors: vec![
            AttachedBehavior::Timer(TimerBehavior::new(
                TimerMode::Repeating { period },
                timer_direction(statement),
                TimerCompletion::Children,
            )),
            AttachedBehavior::LoopCoordinator(LoopCoordinatorBehavior::new(LoopMode::Interval {
                rounds,
                period,
            })),
        ],
    })
}

fn build_timer(statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    let duration = timer_duration(statement, "timer")?;
    let completion = if statement.children.is_empty() {
        TimerCompletion::Expiry
    } else {
        TimerCompletion::First
    };
    Ok(BlockPlan {
        kind: BlockKind::Timer,
        behaviors: vec![AttachedBehavior::Timer(TimerBehavior::new(
            TimerMode::Once { duration },
            timer_direction(statement),
            completion,
        ))],
    })
}

fn build_rounds(statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    let (rounds, scheme) = rounds_of(statement, "rounds")?;
    if statement.children.is_empty() {
        return Err(CompileErrorKind::EmptyRounds);
    }
    let mode = if scheme.is_empty() {
        LoopMode::FixedRounds { rounds }
    } else {
        LoopMode::RepScheme { reps: scheme }
    };
    Ok(BlockPlan {
        kind: BlockKind::Rounds,
        behaviors: vec![AttachedBehavior::LoopCoordinator(
            LoopCoordinatorBehavior::new(mode),
        )],
    })
}

fn build_group(_: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    Ok(BlockPlan {
        kind: BlockKind::Group,
        behaviors: Vec::new(),
    })
}

fn build_effort(statement: &Statement) -> Result<BlockPlan, CompileErrorKind> {
    if !statement.children.is_empty() {
        return Err(CompileErrorKind::EffortWithChildren);
    }
    Ok(BlockPlan {
        kind: BlockKind::Effort,
        behaviors: Vec::new(),
    })
}
