use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::loop_coordinator::LoopState;
use super::{Behavior, BehaviorContext};
use crate::block::BlockId;
use crate::events::RuntimeEvent;
use crate::time::Timestamp;

/// A domain measurement captured from a statement's fragments.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Count(u32),
    Quantity { amount: f64, unit: String },
    Text(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{}", n),
            MetricValue::Quantity { amount, unit } => write!(f, "{}{}", amount, unit),
            MetricValue::Text(s) => write!(f, "{}", s),
        }
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanOutcome {
    Completed,
    Cancelled,
}

/// One run of one block, from push to pop.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSpan {
    pub block: BlockId,
    pub label: String,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub metrics: Metrics,
    /// `None` while the span is open.
    pub outcome: Option<SpanOutcome>,
}

impl ExecutionSpan {
    pub fn open(block: BlockId, label: impl Into<String>, start: Timestamp) -> Self {
        ExecutionSpan {
            block,
            label: label.into(),
            start,
            end: None,
            metrics: Metrics::new(),
            outcome: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end.saturating_since(self.start))
    }
}

/// Records an ExecutionSpan for each run of its block.
#[derive(Debug, Clone, Default)]
pub struct HistoryBehavior;

impl HistoryBehavior {
    fn close(&mut self, ctx: &mut BehaviorContext<'_>, outcome: SpanOutcome) {
        let Some(mut span) = ctx.memory.get::<ExecutionSpan>(ctx.block).cloned() else {
            return;
        };
        if !span.is_open() {
            return;
        }
        span.end = Some(ctx.now.max(span.start));
        span.outcome = Some(outcome);
        span.metrics = ctx.metrics.clone();

        // the innermost enclosing loop supplies round context
        if let Some(state) = ctx
            .ancestors
            .iter()
            .rev()
            .find_map(|a| ctx.memory.get::<LoopState>(*a))
        {
            span.metrics
                .insert("round".to_string(), MetricValue::Count(state.round));
            if let Some(reps) = state.rep_target {
                span.metrics
                    .entry("reps".to_string())
                    .or_insert(MetricValue::Count(reps));
            }
        }

        ctx.memory.set(ctx.block, span.clone());
        ctx.outbox.push_event(RuntimeEvent::SpanClosed(span));
    }
}

impl Behavior for HistoryBehavior {
    fn name(&self) -> &'static str {
        "history"
    }

    fn on_start(&mut self, ctx: &mut BehaviorContext<'_>) {
        ctx.memory
            .set(ctx.block, ExecutionSpan::open(ctx.block, ctx.label, ctx.now));
        ctx.outbox.push_event(RuntimeEvent::SpanOpened {
            block: ctx.block,
            at: ctx.now,
        });
    }

    fn on_complete(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.close(ctx, SpanOutcome::Completed);
    }

    fn on_cancel(&mut self, ctx: &mut BehaviorContext<'_>) {
        self.close(ctx, SpanOutcome::Cancelled);
    }
}
