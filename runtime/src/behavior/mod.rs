//! Cross-cutting units attached to blocks.
//!
//! Within one hook pass a block's behaviors run in a fixed order: timer, loop
//! coordinator, sound, history. Each one reads what earlier behaviors published
//! to [`SharedMemory`] during the same pass.

pub mod history;
pub mod loop_coordinator;
pub mod sound;
pub mod timer;

use crate::block::BlockId;
use crate::events::Outbox;
use crate::memory::SharedMemory;
use crate::time::Timestamp;

pub use history::HistoryBehavior;
pub use loop_coordinator::{LoopCoordinatorBehavior, LoopMode};
pub use sound::SoundBehavior;
pub use timer::{TimerBehavior, TimerCompletion, TimerMode};

/// Everything a behavior may touch during a hook.
pub struct BehaviorContext<'a> {
    pub now: Timestamp,
    pub block: BlockId,
    pub child_count: usize,
    /// Ancestors of `block`, root first.
    pub ancestors: &'a [BlockId],
    pub metrics: &'a history::Metrics,
    pub label: &'a str,
    pub memory: &'a mut SharedMemory,
    pub outbox: &'a mut Outbox,
}

/// What a behavior asks the stack to do with its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// No opinion.
    Continue,
    /// Hold the block open until the interval boundary.
    AwaitInterval,
    /// Hold the block open until its timer expires.
    AwaitExpiry,
    /// Reset the children and run them again.
    NextRound,
    Complete,
}

impl Directive {
    /// Later behaviors see newer state, so their opinion wins.
    pub fn then(self, later: Directive) -> Directive {
        match later {
            Directive::Continue => self,
            other => other,
        }
    }
}

pub trait Behavior {
    fn name(&self) -> &'static str;

    fn on_start(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_tick(&mut self, _ctx: &mut BehaviorContext<'_>) -> Directive {
        Directive::Continue
    }

    /// Every child of the current round has finished.
    fn on_children_finished(&mut self, _ctx: &mut BehaviorContext<'_>) -> Directive {
        Directive::Continue
    }

    fn on_complete(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_cancel(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_pause(&mut self, _ctx: &mut BehaviorContext<'_>) {}

    fn on_resume(&mut self, _ctx: &mut BehaviorContext<'_>) {}
}

/// The closed set of behaviors a block can carry.
#[derive(Debug, Clone)]
pub enum AttachedBehavior {
    Timer(TimerBehavior),
    LoopCoordinator(LoopCoordinatorBehavior),
    Sound(SoundBehavior),
    History(HistoryBehavior),
}

impl AttachedBehavior {
    /// Position in the per-block execution order.
    pub fn order(&self) -> u8 {
        match self {
            AttachedBehavior::Timer(_) => 0,
            AttachedBehavior::LoopCoordinator(_) => 1,
            AttachedBehavior::Sound(_) => 2,
            AttachedBehavior::History(_) => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AttachedBehavior::Timer(b) => b.name(),
            AttachedBehavior::LoopCoordinator(b) => b.name(),
            AttachedBehavior::Sound(b) => b.name(),
            AttachedBehavior::History(b) => b.name(),
        }
    }

    pub fn as_behavior_mut(&mut self) -> &mut dyn Behavior {
        match self {
            AttachedBehavior::Timer(b) => b,
            AttachedBehavior::LoopCoordinator(b) => b,
            AttachedBehavior::Sound(b) => b,
            AttachedBehavior::History(b) => b,
        }
    }

    pub fn as_timer(&self) -> Option<&TimerBehavior> {
        match self {
            AttachedBehavior::Timer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_loop(&self) -> Option<&LoopCoordinatorBehavior> {
        match self {
            AttachedBehavior::LoopCoordinator(b) => Some(b),
            _ => None,
        }
    }
}
