//! Shared observability primitives for `ratethrottle`.
//!
//! This crate carries the event/listener system used by the engine to report
//! violations, blocks, and suspicious-traffic findings to whatever the host
//! application wants to do with them (logs, metrics, alerting). It has no
//! dependency on rate-limiting semantics itself — `ratethrottle` depends on
//! this crate, never the other way around.

pub mod events;

pub use events::{BoxedEventListener, EventListener, EventListeners, FnListener, ResilienceEvent};
