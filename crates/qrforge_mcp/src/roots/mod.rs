//! Roots Subsystem
//!
//! Orchestrates the path between the protocol peer's roots announcements and
//! the configuration provider: rate-limit gate, candidate validation,
//! deterministic selection, commit, and operation metrics.

mod manager;

pub use manager::{OperationMetric, RootsChangeResult, RootsManager, RootsValidationResult};
