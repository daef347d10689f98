use std::fmt;
use std::ops::Range;

use crate::behavior::AttachedBehavior;
use crate::behavior::history::Metrics;
use crate::compiler::StrategyKind;

/// Index of a block in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Timer,
    Interval,
    Rounds,
    Group,
    Effort,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Timer => "timer",
            BlockKind::Interval => "interval",
            BlockKind::Rounds => "rounds",
            BlockKind::Group => "group",
            BlockKind::Effort => "effort",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    Pending,
    Running,
    WaitingForInterval,
    Complete,
    Cancelled,
}

impl BlockState {
    pub fn is_finished(self) -> bool {
        matches!(self, BlockState::Complete | BlockState::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, BlockState::Running | BlockState::WaitingForInterval)
    }
}

/// A compiled node of the execution tree.
#[derive(Debug, Clone)]
pub struct RuntimeBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    /// Strategy that produced the block; `None` for the synthetic root.
    pub strategy: Option<StrategyKind>,
    /// Display text of the source statement.
    pub label: String,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    /// Attached behaviors, sorted in execution order.
    pub behaviors: Vec<AttachedBehavior>,
    pub state: BlockState,
    /// Domain metrics captured from the statement's fragments.
    pub metrics: Metrics,
    /// Byte span of the source statement.
    pub span: Option<Range<usize>>,
    /// Index of the child currently running (or last run).
    pub(crate) cursor: usize,
}

impl RuntimeBlock {
    /// Leaves wait for an advance signal or their own timer; everything else
    /// is a container driven by its children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && matches!(self.kind, BlockKind::Effort | BlockKind::Timer)
    }

    pub fn behavior_names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(AttachedBehavior::name).collect()
    }

    pub(crate) fn current_child(&self) -> Option<BlockId> {
        self.children.get(self.cursor).copied()
    }
}

/// Arena holding a compiled block hierarchy. Its shape never changes after compilation.
#[derive(Debug, Clone)]
pub struct BlockTree {
    blocks: Vec<RuntimeBlock>,
    root: BlockId,
}

/// One row of [`BlockTree::shape`]: depth, kind, strategy and behavior names.
pub type ShapeRow = (usize, BlockKind, Option<StrategyKind>, Vec<&'static str>);

impl BlockTree {
    pub(crate) fn new(blocks: Vec<RuntimeBlock>, root: BlockId) -> Self {
        BlockTree { blocks, root }
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn get(&self, id: BlockId) -> Option<&RuntimeBlock> {
        self.blocks.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut RuntimeBlock> {
        self.blocks.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeBlock> {
        self.blocks.iter()
    }

    /// Ancestors of `id`, root first, excluding `id` itself.
    pub fn ancestors(&self, id: BlockId) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|b| b.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.get(parent).and_then(|b| b.parent);
        }
        chain.reverse();
        chain
    }

    /// All descendants of `id` in depth-first order.
    pub fn descendants(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut pending: Vec<BlockId> = match self.get(id) {
            Some(b) => b.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = pending.pop() {
            out.push(next);
            if let Some(b) = self.get(next) {
                pending.extend(b.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn depth(&self, id: BlockId) -> usize {
        self.ancestors(id).len()
    }

    /// Depth-first structural summary, for comparing two compilations.
    pub fn shape(&self) -> Vec<ShapeRow> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .filter_map(|id| self.get(id))
            .map(|b| (self.depth(b.id), b.kind, b.strategy, b.behavior_names()))
            .collect()
    }

    /// First block whose label matches exactly, in depth-first order.
    pub fn find_by_label(&self, label: &str) -> Option<BlockId> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .find(|id| self.get(*id).is_some_and(|b| b.label == label))
    }

    /// Render the tree as an indented outline.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for (id, depth) in std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .map(|id| (id, self.depth(id)))
        {
            let Some(block) = self.get(id) else { continue };
            let strategy = block
                .strategy
                .map(|s| s.to_string())
                .unwrap_or_else(|| "root".to_string());
            out.push_str(&format!(
                "{}[{}] {} ({}; {}) [{}]\n",
                "  ".repeat(depth),
                block.id,
                block.label,
                block.kind,
                strategy,
                block.behavior_names().join(", ")
            ));
        }
        out
    }
}
