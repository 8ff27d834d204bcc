//! # agent-memory-core
//!
//! Hybrid recall-and-lifecycle engine for persistent, local-first agent
//! memory. One SQLite file per agent holds the relational memory table, an
//! FTS5 lexical index, an HNSW-backed vector index, and a persistent
//! embedding cache; [`engine::CoreContext`] wires storage, embedding,
//! ranking, and lifecycle maintenance into a single handle.
//!
//! ## Pipeline
//!
//! - **Recall**: semantic + lexical candidate generation, reciprocal-rank
//!   fusion blended with recency/strength/importance, a primary cross-encoder
//!   rerank pass (with a confidence-gated secondary pass backgrounded via
//!   `tokio::spawn`), and an MMR diversity pass.
//! - **Capture**: write-time semantic dedup against existing memories —
//!   reinforce a near-duplicate, supersede a conflicting exclusive-slot
//!   memory (rule/preference/fact), or insert fresh.
//! - **Maintenance**: Ebbinghaus-style strength decay, consolidation of
//!   near-duplicate clusters, soft-delete/hard-purge garbage collection, and
//!   pin/unpin for memories that should never decay.
//!
//! HTTP auth, rate limiting, and audit logging live in the `agent-memory-server`
//! binary crate; this crate only implements the engine itself.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use agent_memory_core::{CoreContext, AppConfig, StoreInput, RecallInput};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = std::sync::Arc::new(CoreContext::new(AppConfig::default()));
//!
//! ctx.store_single(StoreInput {
//!     text: "User prefers dark mode".to_string(),
//!     agent: "main".to_string(),
//!     category: None,
//!     importance: None,
//!     pinned: false,
//!     namespace: None,
//!     session: None,
//!     source: None,
//! }).await?;
//!
//! let response = ctx.recall(RecallInput {
//!     query: "what theme does the user like".to_string(),
//!     agent: "main".to_string(),
//!     limit: Some(5),
//!     namespace: None,
//!     filter: None,
//!     max_tokens: None,
//!     min_score: None,
//! }).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod normalize;
pub mod search;
pub mod storage;
pub mod trigger;
pub mod write_merge;

pub use config::AppConfig;
pub use embed::{cosine_similarity, Embedder, NullEmbedder, RemoteEmbedder};
pub use engine::{CaptureAction, CaptureRecord, CoreContext, MaintenancePhase, RecallResponse};
pub use error::{CoreError, EmbedError, RecallError, Result, StoreError, ValidationError};
pub use lifecycle::{Lifecycle, LifecycleRunResult};
pub use memory::{
    Category, CaptureInput, CaptureMessage, ConfidenceTier, EmbeddingStatus, Filter, LayerScores,
    Memory, RecallInput, RecallResult, SearchMode, StoreInput,
};
pub use storage::{Store, StoragePool};

/// Crate version, surfaced on `/v1/health` and `/v1/stats`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        AppConfig, CaptureAction, CaptureInput, CaptureMessage, CaptureRecord, Category,
        ConfidenceTier, CoreContext, CoreError, Filter, Memory, RecallInput, RecallResponse,
        RecallResult, SearchMode, StoreInput,
    };
}
