use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use crate::fragment::{Fragment, FragmentKind, RoundsValue, TimerValue};

/// One parsed unit of workout description.
/// Statements form a tree owned by the loader; the compiler only reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    /// Ordered fragments as they appeared in the source.
    pub fragments: Vec<Fragment>,
    /// Semantic hint tags (`behavior.*`). Empty when the dialect layer attached none.
    pub hints: BTreeSet<String>,
    /// Nested statements executed inside this one.
    pub children: Vec<Statement>,
    /// Byte span in source for error reporting.
    pub span: Option<Range<usize>>,
}

impl Statement {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Statement {
            fragments,
            ..Statement::default()
        }
    }

    pub fn with_hint(mut self, tag: impl Into<String>) -> Self {
        self.hints.insert(tag.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Statement>) -> Self {
        self.children = children;
        self
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }

    pub fn has_hint(&self, tag: &str) -> bool {
        self.hints.contains(tag)
    }

    pub fn has_fragment(&self, kind: FragmentKind) -> bool {
        self.fragments.iter().any(|f| f.kind() == kind)
    }

    /// First Timer fragment, if any.
    pub fn timer(&self) -> Option<&TimerValue> {
        self.fragments.iter().find_map(|f| match f {
            Fragment::Timer(t) => Some(t),
            _ => None,
        })
    }

    /// First Rounds fragment, if any.
    pub fn rounds(&self) -> Option<&RoundsValue> {
        self.fragments.iter().find_map(|f| match f {
            Fragment::Rounds(r) => Some(r),
            _ => None,
        })
    }

    /// Free text of all Effort and Action fragments, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().filter_map(Fragment::text)
    }

    /// Whether any Effort/Action fragment contains `keyword` as a whole word
    /// (ASCII case-insensitive).
    pub fn mentions_keyword(&self, keyword: &str) -> bool {
        self.texts().any(|text| {
            text.split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word.eq_ignore_ascii_case(keyword))
        })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fragments.is_empty() {
            return write!(f, "(empty statement)");
        }
        let parts: Vec<String> = self.fragments.iter().map(|frag| frag.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_matching_is_whole_word_and_case_insensitive() {
        let st = Statement::new(vec![Fragment::Action("amrap".into())]);
        assert!(st.mentions_keyword("AMRAP"));

        let st = Statement::new(vec![Fragment::Effort("20 min AMRAP!".into())]);
        assert!(st.mentions_keyword("AMRAP"));

        let st = Statement::new(vec![Fragment::Effort("AMRAPish".into())]);
        assert!(!st.mentions_keyword("AMRAP"));
    }

    #[test]
    fn display_joins_fragments() {
        let st = Statement::new(vec![
            Fragment::Timer(TimerValue::countdown_secs(1200)),
            Fragment::Action("AMRAP".into()),
        ]);
        assert_eq!(st.to_string(), "20:00 AMRAP");

        let st = Statement::new(vec![Fragment::Rounds(RoundsValue::scheme(vec![21, 15, 9]))]);
        assert_eq!(st.to_string(), "(21-15-9)");
    }
}
