//! Semantic hint tags attached to statements by the dialect layer.
//!
//! Tags share the fixed `behavior.<name>` namespace.

pub const TIME_BOUND: &str = "behavior.time_bound";
pub const REPEATING_INTERVAL: &str = "behavior.repeating_interval";
pub const TIMER: &str = "behavior.timer";
pub const FIXED_ROUNDS: &str = "behavior.fixed_rounds";
pub const GROUP: &str = "behavior.group";
pub const EFFORT: &str = "behavior.effort";

/// Every tag the compiler understands, in strategy precedence order.
pub const ALL: &[&str] = &[
    TIME_BOUND,
    REPEATING_INTERVAL,
    TIMER,
    FIXED_ROUNDS,
    GROUP,
    EFFORT,
];

/// Whether `tag` belongs to the known hint namespace.
pub fn is_known(tag: &str) -> bool {
    ALL.contains(&tag)
}
