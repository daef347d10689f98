pub mod error;
mod raw;

use std::ops::Range;
use std::path::Path;

pub use error::LoadError;

use crate::fragment::{Fragment, RoundsValue, TimerDirection, TimerValue};
use crate::hints;
use crate::statement::Statement;
use crate::Workout;

use raw::{RawDirection, RawDocument, RawDuration, RawFragment, RawStatement};

/// Loader entry point: turns a TOML workout document into a statement tree.
pub struct Loader {
    source: String,
    file_id: usize,
}

/// A successfully loaded workout together with non-fatal warnings.
#[derive(Debug)]
pub struct Loaded {
    pub workout: Workout,
    pub warnings: Vec<LoadError>,
}

impl Loader {
    pub fn new(source: String, file_id: usize) -> Self {
        Loader { source, file_id }
    }

    /// Load the source into a complete Workout.
    pub fn load(&self) -> Result<Loaded, Vec<LoadError>> {
        let document: RawDocument = toml::from_str(&self.source)
            .map_err(|e| vec![LoadError::malformed(&e, self.file_id)])?;

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let statements = document
            .statements
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                let span = raw.span();
                let key_path = format!("statement[{}]", index);
                self.convert_statement(raw.into_inner(), span, &key_path, &mut errors, &mut warnings)
            })
            .collect();

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Loaded {
            workout: Workout {
                title: document.title,
                statements,
                source_id: self.file_id,
            },
            warnings,
        })
    }

    fn convert_statement(
        &self,
        raw: RawStatement,
        span: Range<usize>,
        key_path: &str,
        errors: &mut Vec<LoadError>,
        warnings: &mut Vec<LoadError>,
    ) -> Option<Statement> {
        let mut statement = Statement::default().with_span(span.clone());
        let mut failed = false;

        for (index, tag) in raw.hints.into_iter().enumerate() {
            if !hints::is_known(&tag) {
                warnings.push(
                    LoadError::suspicious(
                        &format!("{}.hints[{}]", key_path, index),
                        span.clone(),
                        self.file_id,
                        format!("unknown hint '{}'", tag),
                    )
                    .with_help(format!("known hints: {}", hints::ALL.join(", "))),
                );
            }
            statement.hints.insert(tag);
        }

        for (index, fragment) in raw.fragments.into_iter().enumerate() {
            let fragment_path = format!("{}.fragments[{}]", key_path, index);
            match self.convert_fragment(fragment, &span, &fragment_path) {
                Ok(f) => statement.fragments.push(f),
                Err(e) => {
                    errors.push(e);
                    failed = true;
                }
            }
        }

        for (index, child) in raw.children.into_iter().enumerate() {
            let child_span = child.span();
            let child_path = format!("{}.children[{}]", key_path, index);
            match self.convert_statement(child.into_inner(), child_span, &child_path, errors, warnings) {
                Some(c) => statement.children.push(c),
                None => failed = true,
            }
        }

        if failed { None } else { Some(statement) }
    }

    fn convert_fragment(
        &self,
        raw: RawFragment,
        span: &Range<usize>,
        key_path: &str,
    ) -> Result<Fragment, LoadError> {
        let fragment = match raw {
            RawFragment::Timer {
                duration,
                direction,
            } => {
                let millis = match duration {
                    RawDuration::Seconds(secs) => secs.saturating_mul(1000),
                    RawDuration::Clock(text) => raw::parse_clock(&text).ok_or_else(|| {
                        LoadError::invalid(
                            key_path,
                            span.clone(),
                            self.file_id,
                            format!("invalid timer duration '{}'", text),
                        )
                        .with_help("use seconds or clock text like \"1:30\" or \":45\"")
                    })?,
                };
                let direction = match direction {
                    RawDirection::Down => TimerDirection::Down,
                    RawDirection::Up => TimerDirection::Up,
                };
                Fragment::Timer(TimerValue { millis, direction })
            }
            RawFragment::Rounds { count, scheme } => match (count, scheme.is_empty()) {
                (None, true) => {
                    return Err(LoadError::invalid(
                        key_path,
                        span.clone(),
                        self.file_id,
                        "rounds fragment needs `count` or `scheme`".to_string(),
                    ));
                }
                (None, false) => Fragment::Rounds(RoundsValue::scheme(scheme)),
                (Some(count), _) => Fragment::Rounds(RoundsValue { count, scheme }),
            },
            RawFragment::Effort { value } => Fragment::Effort(value),
            RawFragment::Action { value } => Fragment::Action(value),
            RawFragment::Rep { value } => Fragment::Rep(value),
            RawFragment::Resistance { amount, unit } => Fragment::Resistance { amount, unit },
            RawFragment::Distance { amount, unit } => Fragment::Distance { amount, unit },
        };
        Ok(fragment)
    }
}

impl Workout {
    /// Read and load a workout document from disk.
    pub fn load_file(path: impl AsRef<Path>, file_id: usize) -> Result<Loaded, Vec<LoadError>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| vec![LoadError::unreadable(path, &e, file_id)])?;
        Loader::new(source, file_id).load()
    }
}
