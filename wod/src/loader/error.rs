use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};

/// A problem found while turning a TOML document into statements.
///
/// Errors stop the load; warnings ride along with the loaded workout.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
    /// Where in the document the offending value lives, e.g.
    /// `statement[0].children[2].fragments[1]`.
    pub key_path: Option<String>,
    /// Byte range of the enclosing statement. `None` if the file was never read.
    pub span: Option<Range<usize>>,
    pub file_id: usize,
    pub severity: Severity,
    /// Suggested fix, rendered as a diagnostic note.
    pub help: Option<String>,
}

impl LoadError {
    fn new(severity: Severity, message: String, file_id: usize) -> Self {
        LoadError {
            message,
            key_path: None,
            span: None,
            file_id,
            severity,
            help: None,
        }
    }

    pub(crate) fn invalid(key_path: &str, span: Range<usize>, file_id: usize, message: String) -> Self {
        LoadError::new(Severity::Error, message, file_id).at(key_path, span)
    }

    pub(crate) fn suspicious(key_path: &str, span: Range<usize>, file_id: usize, message: String) -> Self {
        LoadError::new(Severity::Warning, message, file_id).at(key_path, span)
    }

    /// The document is not valid TOML, or does not have the statement shape.
    pub(crate) fn malformed(err: &toml::de::Error, file_id: usize) -> Self {
        let mut error = LoadError::new(Severity::Error, err.message().to_string(), file_id);
        error.span = err.span();
        error
    }

    pub(crate) fn unreadable(path: &std::path::Path, err: &std::io::Error, file_id: usize) -> Self {
        LoadError::new(
            Severity::Error,
            format!("cannot read '{}': {}", path.display(), err),
            file_id,
        )
    }

    fn at(mut self, key_path: &str, span: Range<usize>) -> Self {
        self.key_path = Some(key_path.to_string());
        self.span = Some(span);
        self
    }

    pub(crate) fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    pub fn to_diagnostic(&self) -> Diagnostic<usize> {
        let mut diagnostic = Diagnostic::new(self.severity).with_message(&self.message);
        if let Some(span) = &self.span {
            let label = Label::primary(self.file_id, span.clone());
            let label = match &self.key_path {
                Some(path) => label.with_message(format!("in `{}`", path)),
                None => label,
            };
            diagnostic = diagnostic.with_labels(vec![label]);
        }
        if let Some(help) = &self.help {
            diagnostic = diagnostic.with_notes(vec![format!("help: {}", help)]);
        }
        diagnostic
    }
}
