//! A pluggable rate-limiting and request-admission engine.
//!
//! [`Engine`] evaluates named [`Rule`]s against a request identifier and
//! optional [`Metadata`], consulting allow/deny lists, any active hold
//! block, and finally one of four admission-decision [`Strategy`]
//! algorithms, returning a [`Verdict`]. State lives behind the pluggable
//! [`Backend`] trait — in-process via [`backend::MemoryBackend`], or shared
//! across instances via the `redis-backend`-gated [`backend::RedisBackend`].
//!
//! A background [`TrafficAnalyzer`] watches per-identifier request shape and
//! can auto-escalate sustained abuse into a deny-list entry, independent of
//! any single rule's limit.
//!
//! # Examples
//!
//! ```
//! use ratethrottle::backend::MemoryBackend;
//! use ratethrottle::{Engine, EngineConfig, Rule};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(MemoryBackend::new(), EngineConfig::default());
//! engine.add_rule(Rule::builder("api", 100, Duration::from_secs(60)).build()?)?;
//!
//! let verdict = engine.check("203.0.113.7", "api", None).await?;
//! if verdict.allowed {
//!     println!("{} requests remaining", verdict.remaining);
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod analyzer;
pub mod backend;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod rate_format;
pub mod registry;
pub mod rule;
mod strategies;
pub mod verdict;
pub mod violation;

pub use access::{AccessControl, BackendAccessControl, InProcessAccessControl};
pub use analyzer::{AnalyzerConfig, TrafficAnalyzer, TrafficPattern};
pub use backend::{Backend, BackendError, BackendResult};
pub use engine::{Engine, EngineConfig, FailPolicy};
pub use error::{RateThrottleError, Result};
pub use metadata::Metadata;
pub use metrics::{Metrics, MetricsSnapshot};
pub use rate_format::{format_rate, parse_rate};
pub use registry::RuleRegistry;
pub use rule::{Condition, Rule, RuleBuilder, Scope, Strategy};
pub use verdict::Verdict;
pub use violation::{Violation, ViolationKind, ViolationLog};
