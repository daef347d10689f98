//! The live execution cursor over a compiled [`BlockTree`].
//!
//! The stack holds the ids of the active root-to-leaf path. Every public
//! operation takes the caller's logical `now`; nothing here sleeps or waits.
//! Waiting is a block state, re-evaluated on the next tick.

use tracing::{debug, info, trace, warn};

use crate::behavior::history::SpanOutcome;
use crate::behavior::{BehaviorContext, Directive};
use crate::block::{BlockId, BlockState, BlockTree, RuntimeBlock};
use crate::error::RuntimeError;
use crate::events::{CueEvent, Outbox, RuntimeEvent, RuntimeWarning};
use crate::memory::SharedMemory;
use crate::time::Timestamp;

/// What one stack operation did, as seen by the driving caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Nothing was pushed or popped.
    Continue,
    /// The active path changed.
    Advance,
    /// The root block has finished.
    Complete,
}

/// One move of `RuntimeStack::settle`.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Push the block and descend into its first child.
    Enter(BlockId),
    /// The current child of the block has finished.
    NextChild(BlockId),
    /// Every child of the block has finished.
    ChildrenDone(BlockId),
    /// Start the block's next round.
    Restart(BlockId),
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    Start,
    Tick,
    ChildrenFinished,
    Complete,
    Cancel,
    Pause,
    Resume,
}

#[derive(Debug)]
pub struct RuntimeStack {
    tree: BlockTree,
    stack: Vec<BlockId>,
    memory: SharedMemory,
    outbox: Outbox,
    last_now: Option<Timestamp>,
    started: bool,
    finished: bool,
    paused: bool,
    /// Set whenever the active path changes during the current operation.
    changed: bool,
}

impl RuntimeStack {
    pub fn new(tree: BlockTree) -> Self {
        RuntimeStack {
            tree,
            stack: Vec::new(),
            memory: SharedMemory::new(),
            outbox: Outbox::default(),
            last_now: None,
            started: false,
            finished: false,
            paused: false,
            changed: false,
        }
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    /// Active path, root first.
    pub fn active_path(&self) -> &[BlockId] {
        &self.stack
    }

    pub fn top(&self) -> Option<BlockId> {
        self.stack.last().copied()
    }

    pub fn state(&self, id: BlockId) -> Option<BlockState> {
        self.tree.get(id).map(|b| b.state)
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Mutable access for subscribing collaborators.
    pub fn memory_mut(&mut self) -> &mut SharedMemory {
        &mut self.memory
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        self.outbox.drain_events()
    }

    pub fn drain_cues(&mut self) -> Vec<CueEvent> {
        self.outbox.drain_cues()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Latest timestamp the stack accepted.
    pub fn now(&self) -> Option<Timestamp> {
        self.last_now
    }

    /// Push the root and descend to the first leaf. A second call is a no-op.
    pub fn start(&mut self, now: Timestamp) -> TickResult {
        if self.started {
            self.changed = false;
            return self.status();
        }
        let now = self.observe_clock(now);
        self.started = true;
        self.changed = false;
        info!(blocks = self.tree.len(), at = %now, "workout started");
        self.enter(self.tree.root(), now);
        self.status()
    }

    /// Deliver `now` to every block on the active path, root first.
    pub fn tick(&mut self, now: Timestamp) -> TickResult {
        if !self.started {
            return self.start(now);
        }
        let now = self.observe_clock(now);
        self.changed = false;
        if self.finished || self.paused {
            return self.status();
        }
        self.resume_after_abort(now);

        let path = self.stack.clone();
        for id in path {
            if !self.stack.contains(&id) {
                break;
            }
            match self.run_hooks(id, Hook::Tick, now) {
                Directive::Complete => {
                    trace!(block = %id, at = %now, "block asked to complete");
                    self.unwind_through(id, SpanOutcome::Completed, now);
                    self.propagate_from(id, now);
                    break;
                }
                Directive::NextRound => {
                    self.restart_round(id, now);
                    break;
                }
                Directive::Continue | Directive::AwaitInterval | Directive::AwaitExpiry => {}
            }
        }
        self.status()
    }

    /// Complete the leaf on top of the stack. A holding container ignores it.
    pub fn advance(&mut self, now: Timestamp) -> TickResult {
        if !self.started {
            return self.start(now);
        }
        let now = self.observe_clock(now);
        self.changed = false;
        if self.finished || self.paused {
            return self.status();
        }
        self.resume_after_abort(now);

        let Some(top) = self.top() else {
            return self.status();
        };
        let is_running_leaf = self
            .tree
            .get(top)
            .is_some_and(|b| b.is_leaf() && b.state == BlockState::Running);
        if is_running_leaf {
            debug!(block = %top, at = %now, "advance");
            self.unwind_through(top, SpanOutcome::Completed, now);
            self.propagate_from(top, now);
        } else {
            trace!(block = %top, "advance ignored by holding block");
        }
        self.status()
    }

    /// Cancel every block from the top of the stack down to and including `id`.
    /// The stack is left pointing at `id`'s parent.
    pub fn abort(&mut self, id: BlockId, now: Timestamp) -> Result<(), RuntimeError> {
        if self.tree.get(id).is_none() {
            return Err(RuntimeError::UnknownBlock(id));
        }
        if !self.stack.contains(&id) {
            return Err(RuntimeError::NotActive(id));
        }
        let now = self.observe_clock(now);
        info!(block = %id, depth = self.tree.depth(id), at = %now, "abort");
        self.unwind_through(id, SpanOutcome::Cancelled, now);
        if self.stack.is_empty() {
            self.finished = true;
        }
        Ok(())
    }

    /// Stop every timer on the active path. Idempotent.
    pub fn pause(&mut self, now: Timestamp) {
        if !self.started || self.finished || self.paused {
            return;
        }
        let now = self.observe_clock(now);
        for id in self.stack.clone() {
            self.run_hooks(id, Hook::Pause, now);
        }
        self.paused = true;
        debug!(at = %now, "paused");
    }

    /// Restart every timer on the active path. Idempotent.
    pub fn resume(&mut self, now: Timestamp) {
        if !self.paused {
            return;
        }
        let now = self.observe_clock(now);
        for id in self.stack.clone() {
            self.run_hooks(id, Hook::Resume, now);
        }
        self.paused = false;
        debug!(at = %now, "resumed");
    }

    fn status(&self) -> TickResult {
        if self.finished {
            TickResult::Complete
        } else if self.changed {
            TickResult::Advance
        } else {
            TickResult::Continue
        }
    }

    /// Clamp a backwards clock to the previous reading.
    fn observe_clock(&mut self, now: Timestamp) -> Timestamp {
        match self.last_now {
            Some(previous) if now < previous => {
                warn!(previous = %previous, received = %now, "clock went backwards; clamping");
                self.outbox.warn(RuntimeWarning::ClockSkew {
                    previous,
                    received: now,
                });
                previous
            }
            _ => {
                self.last_now = Some(now);
                now
            }
        }
    }

    fn set_state(&mut self, id: BlockId, to: BlockState, now: Timestamp) {
        let Some(block) = self.tree.get_mut(id) else {
            return;
        };
        let from = block.state;
        if from == to {
            return;
        }
        block.state = to;
        self.outbox.push_event(RuntimeEvent::StateChanged {
            block: id,
            from,
            to,
            at: now,
        });
    }

    /// Run one hook on every behavior of `id`, in order, merging their directives.
    fn run_hooks(&mut self, id: BlockId, hook: Hook, now: Timestamp) -> Directive {
        let ancestors = self.tree.ancestors(id);
        let Some(block) = self.tree.get_mut(id) else {
            return Directive::Continue;
        };
        let RuntimeBlock {
            behaviors,
            metrics,
            label,
            children,
            ..
        } = block;
        let mut ctx = BehaviorContext {
            now,
            block: id,
            child_count: children.len(),
            ancestors: &ancestors,
            metrics: &*metrics,
            label: label.as_str(),
            memory: &mut self.memory,
            outbox: &mut self.outbox,
        };

        let mut directive = Directive::Continue;
        for attached in behaviors.iter_mut() {
            let behavior = attached.as_behavior_mut();
            let said = match hook {
                Hook::Start => {
                    behavior.on_start(&mut ctx);
                    Directive::Continue
                }
                Hook::Tick => behavior.on_tick(&mut ctx),
                Hook::ChildrenFinished => behavior.on_children_finished(&mut ctx),
                Hook::Complete => {
                    behavior.on_complete(&mut ctx);
                    Directive::Continue
                }
                Hook::Cancel => {
                    behavior.on_cancel(&mut ctx);
                    Directive::Continue
                }
                Hook::Pause => {
                    behavior.on_pause(&mut ctx);
                    Directive::Continue
                }
                Hook::Resume => {
                    behavior.on_resume(&mut ctx);
                    Directive::Continue
                }
            };
            directive = directive.then(said);
        }
        directive
    }

    /// Push `id` and keep descending into first children until a leaf
    /// (or a container with nothing to run) is on top.
    fn enter(&mut self, id: BlockId, now: Timestamp) {
        self.settle(Step::Enter(id), now);
    }

    /// Pop the top block, closing it with `outcome`.
    fn close_top(&mut self, outcome: SpanOutcome, now: Timestamp) -> Option<BlockId> {
        let id = *self.stack.last()?;
        let (state, hook) = match outcome {
            SpanOutcome::Completed => (BlockState::Complete, Hook::Complete),
            SpanOutcome::Cancelled => (BlockState::Cancelled, Hook::Cancel),
        };
        self.set_state(id, state, now);
        self.run_hooks(id, hook, now);
        self.stack.pop();
        self.memory.release(id);
        self.changed = true;
        debug!(block = %id, ?outcome, at = %now, "pop");
        Some(id)
    }

    /// Close blocks from the top down to and including `target`.
    fn unwind_through(&mut self, target: BlockId, outcome: SpanOutcome, now: Timestamp) {
        while let Some(closed) = self.close_top(outcome, now) {
            if closed == target {
                break;
            }
        }
    }

    /// `finished` just left the stack; let its parent react.
    fn propagate_from(&mut self, finished: BlockId, now: Timestamp) {
        match self.tree.get(finished).and_then(|b| b.parent) {
            Some(parent) => self.propagate_from_parent(parent, now),
            None => self.finish_workout(now),
        }
    }

    /// Move `parent` to its next child, or settle it once all children are done.
    fn propagate_from_parent(&mut self, parent: BlockId, now: Timestamp) {
        self.settle(Step::NextChild(parent), now);
    }

    /// Return the subtree under `id` to Pending and run its first child again.
    fn restart_round(&mut self, id: BlockId, now: Timestamp) {
        self.settle(Step::Restart(id), now);
    }

    /// Drive pushes, pops and round restarts until the active path is stable:
    /// a running leaf on top, a holding container, or an empty stack.
    /// Rounds that take no time repeat here without growing the call stack.
    fn settle(&mut self, first: Step, now: Timestamp) {
        let mut step = first;
        loop {
            step = match step {
                Step::Enter(id) => {
                    self.stack.push(id);
                    self.changed = true;
                    self.set_state(id, BlockState::Running, now);
                    debug!(block = %id, depth = self.stack.len() - 1, at = %now, "push");
                    self.run_hooks(id, Hook::Start, now);

                    let Some(block) = self.tree.get_mut(id) else {
                        return;
                    };
                    block.cursor = 0;
                    match (block.current_child(), block.is_leaf()) {
                        (Some(child), _) => Step::Enter(child),
                        (None, true) => return,
                        (None, false) => Step::ChildrenDone(id),
                    }
                }
                Step::NextChild(parent) => {
                    let Some(block) = self.tree.get_mut(parent) else {
                        return;
                    };
                    block.cursor += 1;
                    match block.current_child() {
                        Some(next) => Step::Enter(next),
                        None => Step::ChildrenDone(parent),
                    }
                }
                Step::ChildrenDone(id) => match self.run_hooks(id, Hook::ChildrenFinished, now) {
                    Directive::Continue | Directive::Complete => {
                        self.unwind_through(id, SpanOutcome::Completed, now);
                        match self.tree.get(id).and_then(|b| b.parent) {
                            Some(parent) => Step::NextChild(parent),
                            None => {
                                self.finish_workout(now);
                                return;
                            }
                        }
                    }
                    Directive::AwaitInterval => {
                        trace!(block = %id, at = %now, "waiting for interval boundary");
                        self.set_state(id, BlockState::WaitingForInterval, now);
                        return;
                    }
                    Directive::AwaitExpiry => return,
                    Directive::NextRound => Step::Restart(id),
                },
                Step::Restart(id) => {
                    for descendant in self.tree.descendants(id) {
                        self.set_state(descendant, BlockState::Pending, now);
                        if let Some(block) = self.tree.get_mut(descendant) {
                            block.cursor = 0;
                        }
                    }
                    self.set_state(id, BlockState::Running, now);
                    self.changed = true;

                    let first = self.tree.get_mut(id).and_then(|block| {
                        block.cursor = 0;
                        block.current_child()
                    });
                    match first {
                        Some(child) => Step::Enter(child),
                        None => Step::ChildrenDone(id),
                    }
                }
            };
        }
    }

    /// After an abort the parent is on top with a cancelled current child;
    /// carry on as if that child had finished.
    fn resume_after_abort(&mut self, now: Timestamp) {
        let Some(top) = self.top() else {
            return;
        };
        let resumable = self.tree.get(top).is_some_and(|block| {
            block.state == BlockState::Running
                && block
                    .current_child()
                    .and_then(|child| self.state(child))
                    .is_some_and(|state| state == BlockState::Cancelled)
        });
        if resumable {
            debug!(block = %top, at = %now, "resuming after abort");
            self.propagate_from_parent(top, now);
        }
    }

    fn finish_workout(&mut self, now: Timestamp) {
        if !self.finished {
            self.finished = true;
            info!(at = %now, "workout complete");
        }
    }
}
