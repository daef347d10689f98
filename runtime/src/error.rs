use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use thiserror::Error;

use crate::block::BlockId;
use crate::compiler::StrategyKind;

/// Why a statement could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("no strategy matches this statement")]
    NoStrategy,
    #[error("timer duration must be positive, got {0}")]
    NonPositiveDuration(String),
    #[error("rounds count must be positive")]
    ZeroRounds,
    #[error("rep scheme has {scheme} entries but the statement declares {count} rounds")]
    RepSchemeMismatch { count: u32, scheme: usize },
    #[error("rep scheme entries must be positive")]
    ZeroReps,
    #[error("{0} statement requires a timer fragment")]
    MissingTimer(&'static str),
    #[error("{0} statement requires a rounds fragment")]
    MissingRounds(&'static str),
    #[error("rounds statement has no children to repeat")]
    EmptyRounds,
    #[error("effort statement cannot have children")]
    EffortWithChildren,
}

/// A compile failure naming the offending statement.
#[derive(Debug, Clone, Error)]
#[error("cannot compile `{statement}`: {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Display text of the statement.
    pub statement: String,
    /// Child indices from the top-level statement list down to the offender.
    pub path: Vec<usize>,
    /// Byte span in source, when the statement came from a document.
    pub span: Option<Range<usize>>,
    /// Strategy that claimed the statement, if any did.
    pub strategy: Option<StrategyKind>,
}

impl CompileError {
    /// Convert to a codespan-reporting Diagnostic for display.
    pub fn to_diagnostic(&self, file_id: usize) -> Diagnostic<usize> {
        let mut notes = Vec::new();
        if let Some(strategy) = self.strategy {
            notes.push(format!("claimed by the {} strategy", strategy));
        }
        let path: Vec<String> = self.path.iter().map(|i| i.to_string()).collect();
        notes.push(format!("statement path: [{}]", path.join(", ")));

        let labels = match &self.span {
            Some(span) => vec![Label::primary(file_id, span.clone()).with_message(&self.statement)],
            None => Vec::new(),
        };
        Diagnostic::error()
            .with_message(self.to_string())
            .with_labels(labels)
            .with_notes(notes)
    }
}

/// Failures reported by runtime stack operations. None of them disturb the stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("block {0} does not exist")]
    UnknownBlock(BlockId),
    #[error("block {0} is not on the active stack")]
    NotActive(BlockId),
}
