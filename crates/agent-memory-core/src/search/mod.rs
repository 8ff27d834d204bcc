//! Search layer: `CandidateGen` → `Fuser` → `Reranker` → MMR → `RecallCache`
//! (spec §4.4–§4.9). The vector index itself lives in `storage::vector`
//! since it is physically part of the store, not a transient search
//! structure.

pub mod cache;
pub mod candidate;
pub mod fuse;
pub mod reranker;

pub use cache::RecallCache;
pub use candidate::{generate as generate_candidates, CandidateSet};
pub use fuse::{combine_scores, linear_combination, reciprocal_rank_fusion, recency_score, Fuser};
pub use reranker::{mmr_select, Reranker, RerankedResult, RerankerError};
