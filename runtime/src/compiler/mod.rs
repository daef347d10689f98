//! Statement tree → block tree.
//!
//! The compiler walks the registry in precedence order for every statement,
//! builds the block the first claiming strategy asks for, then recurses into
//! the children. Blocks are laid out in an arena in pre-order, so a block's id
//! is always smaller than its children's.

mod strategy;

pub use strategy::{BlockPlan, Strategy, StrategyKind, StrategyRegistry};

use tracing::debug;
use wod::{Fragment, Statement, Workout};

use crate::behavior::history::{MetricValue, Metrics};
use crate::behavior::{AttachedBehavior, HistoryBehavior, SoundBehavior};
use crate::block::{BlockId, BlockKind, BlockState, BlockTree, RuntimeBlock};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind};

const ROOT_LABEL: &str = "workout";

#[derive(Debug, Clone, Default)]
pub struct JitCompiler {
    registry: StrategyRegistry,
    config: CompilerConfig,
}

impl JitCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        JitCompiler {
            registry: StrategyRegistry::standard(),
            config,
        }
    }

    pub fn with_registry(registry: StrategyRegistry, config: CompilerConfig) -> Self {
        JitCompiler { registry, config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// The strategy that would claim `statement`, without building anything.
    pub fn select(&self, statement: &Statement) -> Option<StrategyKind> {
        self.registry
            .select(statement, &self.config)
            .map(|s| s.kind)
    }

    /// Compile top-level statements under a synthetic root group.
    pub fn compile(&self, statements: &[Statement]) -> Result<BlockTree, CompileError> {
        self.compile_rooted(ROOT_LABEL, statements)
    }

    pub fn compile_workout(&self, workout: &Workout) -> Result<BlockTree, CompileError> {
        let label = workout.title.as_deref().unwrap_or(ROOT_LABEL);
        self.compile_rooted(label, &workout.statements)
    }

    fn compile_rooted(&self, label: &str, statements: &[Statement]) -> Result<BlockTree, CompileError> {
        let root = BlockId(0);
        let mut blocks = vec![RuntimeBlock {
            id: root,
            kind: BlockKind::Group,
            strategy: None,
            label: label.to_string(),
            parent: None,
            children: Vec::new(),
            behaviors: self.ambient_behaviors(false),
            state: BlockState::Pending,
            metrics: Metrics::new(),
            span: None,
            cursor: 0,
        }];

        let mut path = Vec::new();
        let mut children = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            path.push(index);
            children.push(self.compile_statement(statement, root, &mut path, &mut blocks)?);
            path.pop();
        }
        blocks[0].children = children;

        debug!(blocks = blocks.len(), root = label, "compiled workout");
        Ok(BlockTree::new(blocks, root))
    }

    fn compile_statement(
        &self,
        statement: &Statement,
        parent: BlockId,
        path: &mut Vec<usize>,
        blocks: &mut Vec<RuntimeBlock>,
    ) -> Result<BlockId, CompileError> {
        let Some(strategy) = self.registry.select(statement, &self.config) else {
            return Err(compile_error(CompileErrorKind::NoStrategy, statement, path, None));
        };
        let plan = strategy
            .build(statement)
            .map_err(|kind| compile_error(kind, statement, path, Some(strategy.kind)))?;

        let timed = plan.behaviors.iter().any(|b| b.as_timer().is_some());
        let mut behaviors = plan.behaviors;
        behaviors.extend(self.ambient_behaviors(timed));
        behaviors.sort_by_key(AttachedBehavior::order);

        let id = BlockId(blocks.len());
        blocks.push(RuntimeBlock {
            id,
            kind: plan.kind,
            strategy: Some(strategy.kind),
            label: statement.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            behaviors,
            state: BlockState::Pending,
            metrics: capture_metrics(statement),
            span: statement.span.clone(),
            cursor: 0,
        });

        let mut children = Vec::with_capacity(statement.children.len());
        for (index, child) in statement.children.iter().enumerate() {
            path.push(index);
            children.push(self.compile_statement(child, id, path, blocks)?);
            path.pop();
        }
        blocks[id.0].children = children;
        Ok(id)
    }

    /// Sound and history, as configured.
    fn ambient_behaviors(&self, timed: bool) -> Vec<AttachedBehavior> {
        let mut behaviors = Vec::new();
        if timed && self.config.sound {
            behaviors.push(AttachedBehavior::Sound(SoundBehavior::new(
                &self.config.countdown_cues,
            )));
        }
        if self.config.history {
            behaviors.push(AttachedBehavior::History(HistoryBehavior));
        }
        behaviors
    }
}

fn compile_error(
    kind: CompileErrorKind,
    statement: &Statement,
    path: &[usize],
    strategy: Option<StrategyKind>,
) -> CompileError {
    CompileError {
        kind,
        statement: statement.to_string(),
        path: path.to_vec(),
        span: statement.span.clone(),
        strategy,
    }
}

/// Domain measurements carried by a statement's fragments.
fn capture_metrics(statement: &Statement) -> Metrics {
    let mut metrics = Metrics::new();
    let mut effort: Vec<&str> = Vec::new();
    for fragment in &statement.fragments {
        match fragment {
            Fragment::Rep(count) => {
                metrics
                    .entry("reps".to_string())
                    .or_insert(MetricValue::Count(*count));
            }
            Fragment::Resistance { amount, unit } => {
                metrics.entry("load".to_string()).or_insert(MetricValue::Quantity {
                    amount: *amount,
                    unit: unit.clone(),
                });
            }
            Fragment::Distance { amount, unit } => {
                metrics
                    .entry("distance".to_string())
                    .or_insert(MetricValue::Quantity {
                        amount: *amount,
                        unit: unit.clone(),
                    });
            }
            Fragment::Effort(text) => effort.push(text),
            Fragment::Timer(_) | Fragment::Rounds(_) | Fragment::Action(_) => {}
        }
    }
    if !effort.is_empty() {
        metrics.insert("effort".to_string(), MetricValue::Text(effort.join(" ")));
    }
    metrics
}
