//! Outbound notifications consumed by external collaborators
//! (audio rendering, history storage, presentation).

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::behavior::history::ExecutionSpan;
use crate::block::{BlockId, BlockState};
use crate::time::Timestamp;

/// Abstract sound cue. Rendering is someone else's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cue {
    Start,
    Countdown(u32),
    RoundStart(u32),
    TimerComplete,
}

impl Cue {
    /// Stable identifier used by renderers and scenario files.
    pub fn id(&self) -> String {
        match self {
            Cue::Start => "start".to_string(),
            Cue::Countdown(secs) => format!("countdown-{}", secs),
            Cue::RoundStart(_) => "round-start".to_string(),
            Cue::TimerComplete => "timer-complete".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueEvent {
    pub cue: Cue,
    pub block: BlockId,
    pub at: Timestamp,
}

/// Non-fatal conditions surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeWarning {
    /// Children of an interval round finished after the round's boundary.
    IntervalOverrun {
        block: BlockId,
        round: u32,
        overrun: Duration,
        at: Timestamp,
    },
    /// A tick arrived with a timestamp earlier than the previous one.
    ClockSkew {
        previous: Timestamp,
        received: Timestamp,
    },
}

impl fmt::Display for RuntimeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeWarning::IntervalOverrun {
                block,
                round,
                overrun,
                at,
            } => write!(
                f,
                "interval overrun: block {} round {} finished {}ms past its boundary at {}",
                block,
                round,
                overrun.as_millis(),
                at
            ),
            RuntimeWarning::ClockSkew { previous, received } => write!(
                f,
                "clock skew: received {} after {}; delta clamped to zero",
                received, previous
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    StateChanged {
        block: BlockId,
        from: BlockState,
        to: BlockState,
        at: Timestamp,
    },
    RoundStarted {
        block: BlockId,
        round: u32,
        total: Option<u32>,
        at: Timestamp,
    },
    TimerExpired {
        block: BlockId,
        at: Timestamp,
    },
    SpanOpened {
        block: BlockId,
        at: Timestamp,
    },
    SpanClosed(ExecutionSpan),
    Warning(RuntimeWarning),
}

/// Ordered queues of everything the engine emits.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<RuntimeEvent>,
    cues: VecDeque<CueEvent>,
}

impl Outbox {
    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push(event);
    }

    pub fn push_cue(&mut self, cue: Cue, block: BlockId, at: Timestamp) {
        self.cues.push_back(CueEvent { cue, block, at });
    }

    pub fn warn(&mut self, warning: RuntimeWarning) {
        self.events.push(RuntimeEvent::Warning(warning));
    }

    pub fn events(&self) -> &[RuntimeEvent] {
        &self.events
    }

    pub fn cues(&self) -> impl Iterator<Item = &CueEvent> {
        self.cues.iter()
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_cues(&mut self) -> Vec<CueEvent> {
        self.cues.drain(..).collect()
    }
}
