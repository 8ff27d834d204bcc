//! Core data model.
//!
//! `Memory` is the durable unit; `RecallResult` is what callers actually see
//! back from a recall. See spec §3 for the full field-level contract.

mod model;

pub use model::{
    Category, CaptureInput, CaptureMessage, ConfidenceTier, EmbeddingStatus, Filter, LayerScores,
    Memory, RecallInput, RecallResult, SearchMode, StoreInput,
};
