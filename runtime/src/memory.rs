//! Kind-qualified key/value store shared by every behavior.
//!
//! Behaviors never hold references to one another; they publish state under
//! `<kind>:<blockId>` and read what upstream behaviors published in the same
//! tick. Entries appear on first write and are released when their block
//! leaves the stack.

use std::collections::BTreeMap;
use std::fmt;

use crate::behavior::history::ExecutionSpan;
use crate::behavior::loop_coordinator::LoopState;
use crate::behavior::timer::{CountdownStatus, TimerState};
use crate::block::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryKind {
    Timer,
    Countdown,
    Loop,
    Span,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryKind::Timer => "timer",
            MemoryKind::Countdown => "countdown",
            MemoryKind::Loop => "loop",
            MemoryKind::Span => "span",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryKey {
    pub kind: MemoryKind,
    pub block: BlockId,
}

impl MemoryKey {
    pub fn new(kind: MemoryKind, block: BlockId) -> Self {
        MemoryKey { kind, block }
    }
}

impl fmt::Display for MemoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.block)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    Timer(TimerState),
    Countdown(CountdownStatus),
    Loop(LoopState),
    Span(ExecutionSpan),
}

impl MemoryValue {
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryValue::Timer(_) => MemoryKind::Timer,
            MemoryValue::Countdown(_) => MemoryKind::Countdown,
            MemoryValue::Loop(_) => MemoryKind::Loop,
            MemoryValue::Span(_) => MemoryKind::Span,
        }
    }
}

/// A value type that lives under exactly one [`MemoryKind`].
pub trait MemoryEntry: Sized {
    const KIND: MemoryKind;

    fn into_value(self) -> MemoryValue;

    fn from_value(value: &MemoryValue) -> Option<&Self>;
}

macro_rules! memory_entry {
    ($ty:ty, $kind:ident) => {
        impl MemoryEntry for $ty {
            const KIND: MemoryKind = MemoryKind::$kind;

            fn into_value(self) -> MemoryValue {
                MemoryValue::$kind(self)
            }

            fn from_value(value: &MemoryValue) -> Option<&Self> {
                match value {
                    MemoryValue::$kind(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

memory_entry!(TimerState, Timer);
memory_entry!(CountdownStatus, Countdown);
memory_entry!(LoopState, Loop);
memory_entry!(ExecutionSpan, Span);

/// What happened to an entry, as seen by a subscriber.
#[derive(Debug, Clone, Copy)]
pub enum MemoryChange<'a> {
    Set(&'a MemoryValue),
    /// The owning block left the stack; this is the entry's final value.
    Released(&'a MemoryValue),
}

/// Which keys a subscription observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    Kind(MemoryKind),
    Block(BlockId),
}

impl SubscriptionFilter {
    fn matches(&self, key: &MemoryKey) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Kind(kind) => key.kind == *kind,
            SubscriptionFilter::Block(block) => key.block == *block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&MemoryKey, MemoryChange<'_>)>;

struct Subscriber {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    callback: Callback,
}

#[derive(Default)]
pub struct SharedMemory {
    entries: BTreeMap<MemoryKey, MemoryValue>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: MemoryEntry>(&self, block: BlockId) -> Option<&T> {
        self.entries
            .get(&MemoryKey::new(T::KIND, block))
            .and_then(T::from_value)
    }

    pub fn get_value(&self, key: &MemoryKey) -> Option<&MemoryValue> {
        self.entries.get(key)
    }

    /// Overwrite the entry for `block` and notify matching subscribers.
    pub fn set<T: MemoryEntry>(&mut self, block: BlockId, value: T) {
        let key = MemoryKey::new(T::KIND, block);
        self.entries.insert(key, value.into_value());
        if let Some(stored) = self.entries.get(&key) {
            for sub in self.subscribers.iter_mut() {
                if sub.filter.matches(&key) {
                    (sub.callback)(&key, MemoryChange::Set(stored));
                }
            }
        }
    }

    /// Read-modify-write of an existing entry. Returns false if there was none.
    pub fn update<T: MemoryEntry + Clone>(&mut self, block: BlockId, f: impl FnOnce(&mut T)) -> bool {
        let Some(mut value) = self.get::<T>(block).cloned() else {
            return false;
        };
        f(&mut value);
        self.set(block, value);
        true
    }

    pub fn subscribe(
        &mut self,
        filter: SubscriptionFilter,
        callback: impl FnMut(&MemoryKey, MemoryChange<'_>) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Drop every entry owned by `block`, notifying subscribers with the final values.
    pub fn release(&mut self, block: BlockId) -> usize {
        let keys: Vec<MemoryKey> = self
            .entries
            .keys()
            .filter(|k| k.block == block)
            .copied()
            .collect();
        for key in &keys {
            if let Some(value) = self.entries.remove(key) {
                for sub in self.subscribers.iter_mut() {
                    if sub.filter.matches(key) {
                        (sub.callback)(key, MemoryChange::Released(&value));
                    }
                }
            }
        }
        keys.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MemoryKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("entries", &self.entries)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::time::Timestamp;

    #[test]
    fn kinds_do_not_collide_on_one_block() {
        let mut memory = SharedMemory::new();
        let block = BlockId(4);
        let mut timer = TimerState::default();
        timer.start(Timestamp::from_secs(1));
        memory.set(block, timer.clone());
        memory.set(block, ExecutionSpan::open(block, "Pullups", Timestamp::from_secs(1)));

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.get::<TimerState>(block), Some(&timer));
        assert_eq!(
            memory.get::<ExecutionSpan>(block).map(|s| s.label.as_str()),
            Some("Pullups")
        );
        assert!(memory.get::<LoopState>(block).is_none());
    }

    #[test]
    fn keys_render_kind_then_block() {
        assert_eq!(MemoryKey::new(MemoryKind::Span, BlockId(7)).to_string(), "span:7");
    }

    #[test]
    fn subscribers_see_sets_and_releases() {
        let mut memory = SharedMemory::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        memory.subscribe(SubscriptionFilter::Kind(MemoryKind::Span), move |key, change| {
            let tag = match change {
                MemoryChange::Set(_) => "set",
                MemoryChange::Released(_) => "released",
            };
            sink.borrow_mut().push(format!("{} {}", tag, key));
        });

        let block = BlockId(2);
        memory.set(block, ExecutionSpan::open(block, "Row", Timestamp::ZERO));
        memory.set(block, TimerState::default());
        assert_eq!(memory.release(block), 2);

        assert_eq!(*seen.borrow(), vec!["set span:2", "released span:2"]);
        assert!(memory.is_empty());
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let mut memory = SharedMemory::new();
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let id = memory.subscribe(SubscriptionFilter::Block(BlockId(1)), move |_, _| {
            *sink.borrow_mut() += 1;
        });
        memory.set(BlockId(1), TimerState::default());
        assert!(memory.unsubscribe(id));
        memory.set(BlockId(1), TimerState::default());
        assert_eq!(*count.borrow(), 1);
        assert!(!memory.unsubscribe(id));
    }

    #[test]
    fn update_requires_existing_entry() {
        let mut memory = SharedMemory::new();
        let block = BlockId(0);
        assert!(!memory.update::<TimerState>(block, |t| {
            t.start(Timestamp::ZERO);
        }));
        memory.set(block, TimerState::default());
        assert!(memory.update::<TimerState>(block, |t| {
            t.start(Timestamp::ZERO);
        }));
        assert!(memory.get::<TimerState>(block).is_some_and(|t| t.is_running()));
    }
}
