//! anamnesa-hybrid
//!
//! Hybrid retrieval over an immutable index snapshot: vector and keyword
//! search run concurrently, their scores are normalized and fused, and the
//! facade wraps the whole pipeline with retries, a timeout and a degraded
//! response.
pub mod builder;
pub mod engine;
pub mod facade;
pub mod fusion;
pub mod service;
pub mod snapshot;

pub use builder::{BuildReport, IndexBuilder};
pub use engine::{EngineStats, HybridSearchEngine};
pub use facade::{RetrievalFacade, RetrievalRequest, RetrievalResponse, RetrievedDocument};
pub use service::{RebuildOutcome, RetrievalService};
pub use snapshot::{IndexSnapshot, SnapshotStore};
