//! Proxy Grader - bulk proxy checking and residential quality scoring
//!
//! Takes raw proxy lists, normalizes them, probes every proxy through an IP
//! echo endpoint and, in residential mode, grades the exit IP with an
//! IP-intelligence lookup.

pub mod engine;
pub mod error;
pub mod proxy;
pub mod report;
pub mod session;

pub use engine::{Engine, EngineConfig, Job, JobOutcome};
pub use error::CheckerError;
pub use proxy::*;
pub use report::{FinalReport, Summary};
pub use session::{ClientId, NoopNotifier, ProgressNotifier, ProgressSnapshot, Session, SessionStore};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
