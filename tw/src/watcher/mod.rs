//! Watcher module: detect new records and debounce them into passes
//!
//! A TriggerSource produces `Trigger`s from inotify or timers, the
//! Debouncer folds bursts of them into one deadline, and the Collector runs
//! the resulting pass against the store.

mod collector;
mod config;
mod debounce;
mod source;

pub use collector::{Collected, Collector};
pub use config::{WatchMode, WatcherConfig};
pub use debounce::{DebounceState, Debouncer};
pub use source::{Trigger, TriggerSource, WatchTargets};
