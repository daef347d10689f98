pub mod fragment;
pub mod hints;
pub mod loader;
pub mod statement;

pub use fragment::{Fragment, RoundsValue, TimerDirection, TimerValue};
pub use statement::Statement;

/// A loaded workout: the ordered top-level statements of one document.
#[derive(Debug, Clone)]
pub struct Workout {
    /// Optional title from the document header.
    pub title: Option<String>,
    /// Top-level statements in document order.
    pub statements: Vec<Statement>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}
