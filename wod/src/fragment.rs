use std::fmt;

/// Which way a timer is presented: counting down from its duration or up to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerDirection {
    #[default]
    Down,
    Up,
}

/// Duration carried by a Timer fragment.
/// Stored signed so malformed durations reach the compiler and get reported there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerValue {
    pub millis: i64,
    pub direction: TimerDirection,
}

impl TimerValue {
    pub fn countdown_secs(secs: i64) -> Self {
        TimerValue {
            millis: secs * 1000,
            direction: TimerDirection::Down,
        }
    }

    pub fn count_up_secs(secs: i64) -> Self {
        TimerValue {
            millis: secs * 1000,
            direction: TimerDirection::Up,
        }
    }
}

/// Round count, optionally with an explicit per-round rep scheme (21-15-9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundsValue {
    pub count: u32,
    /// Empty for fixed rounds; one entry per round for a rep scheme.
    pub scheme: Vec<u32>,
}

impl RoundsValue {
    pub fn fixed(count: u32) -> Self {
        RoundsValue {
            count,
            scheme: Vec::new(),
        }
    }

    pub fn scheme(reps: Vec<u32>) -> Self {
        RoundsValue {
            count: reps.len() as u32,
            scheme: reps,
        }
    }

    pub fn is_rep_scheme(&self) -> bool {
        !self.scheme.is_empty()
    }
}

/// A typed piece of a statement's meaning. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Timer(TimerValue),
    Rounds(RoundsValue),
    /// Movement or exercise name.
    Effort(String),
    /// Free-form action text ("AMRAP", "Rest", "For Time", ...).
    Action(String),
    /// Repetition count for a single effort.
    Rep(u32),
    Resistance { amount: f64, unit: String },
    Distance { amount: f64, unit: String },
}

/// Discriminant of a [`Fragment`], for structural matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Timer,
    Rounds,
    Effort,
    Action,
    Rep,
    Resistance,
    Distance,
}

impl Fragment {
    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::Timer(_) => FragmentKind::Timer,
            Fragment::Rounds(_) => FragmentKind::Rounds,
            Fragment::Effort(_) => FragmentKind::Effort,
            Fragment::Action(_) => FragmentKind::Action,
            Fragment::Rep(_) => FragmentKind::Rep,
            Fragment::Resistance { .. } => FragmentKind::Resistance,
            Fragment::Distance { .. } => FragmentKind::Distance,
        }
    }

    /// Free text of Effort and Action fragments.
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Effort(s) | Fragment::Action(s) => Some(s),
            _ => None,
        }
    }
}

/// Render milliseconds as `m:ss`, or `h:mm:ss` past the hour.
pub fn format_clock(millis: i64) -> String {
    let sign = if millis < 0 { "-" } else { "" };
    let total = millis.unsigned_abs() / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}{}:{:02}:{:02}", sign, h, m, s)
    } else {
        format!("{}{}:{:02}", sign, m, s)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Timer(t) => {
                let arrow = match t.direction {
                    TimerDirection::Down => "",
                    TimerDirection::Up => "^",
                };
                write!(f, "{}{}", arrow, format_clock(t.millis))
            }
            Fragment::Rounds(r) if r.is_rep_scheme() => {
                let parts: Vec<String> = r.scheme.iter().map(|n| n.to_string()).collect();
                write!(f, "({})", parts.join("-"))
            }
            Fragment::Rounds(r) => write!(f, "({})", r.count),
            Fragment::Effort(s) | Fragment::Action(s) => write!(f, "{}", s),
            Fragment::Rep(n) => write!(f, "{}", n),
            Fragment::Resistance { amount, unit } | Fragment::Distance { amount, unit } => {
                write!(f, "{}{}", amount, unit)
            }
        }
    }
}
