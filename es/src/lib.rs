//! EventStore - durable incident queue shared between processes
//!
//! Producers append incidents; a single consumer drains them with
//! exactly-once claim semantics. Two interchangeable backends exist:
//!
//! ```text
//! .tripwire/
//! ├── events/                                  # files backend
//! │   ├── 1718000000123-error-9f3a1c2e.json
//! │   └── .1718000000456-crash-0b1d2e3f.json.4242.9a8b7c6d5e4f.tmp   # in-flight write
//! └── events.db                                # sqlite backend (WAL)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use eventstore::{Event, EventKind, EventQueue, StoreConfig};
//!
//! let queue = EventQueue::open(&StoreConfig::default(), Path::new(".tripwire"));
//! queue.emit(Event::new(EventKind::Error, "trace-1", r#"{"msg":"boom"}"#));
//! for event in queue.drain() {
//!     println!("{} {}", event.kind, event.trace_id);
//! }
//! ```

pub mod atomic;
pub mod cli;
pub mod config;
mod error;
mod event;
mod files;
mod queue;
mod sqlite;
mod store;

pub use config::{Config, DEFAULT_STATE_DIR, RetentionConfig, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use event::{AccessLog, Event, EventKind, MAX_PAYLOAD_BYTES, MAX_USER_AGENT_BYTES, truncate_utf8};
pub use files::FileEventStore;
pub use queue::EventQueue;
pub use sqlite::SqliteEventStore;
pub use store::{Backend, EventStore, RetentionPolicy, RetentionReport, StoreStats};
