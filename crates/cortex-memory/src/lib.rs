pub mod db;
pub mod decay;
pub mod embedder;
pub mod error;
pub mod fusion;
pub mod manager;
pub mod reranker;
pub mod relation;
pub mod types;

pub use embedder::{cosine_similarity, Embedder, HashEmbedder};
pub use error::{MemoryError, Result};
pub use fusion::{FusionSummarizer, LlmFusionSummarizer};
pub use manager::{FullDecayResult, FusionResult, MemoryStore};
pub use reranker::{LlmReranker, MemoryReranker};
pub use relation::{InferredRelation, LlmRelationInferrer, RelationInferrer};
pub use types::{Memory, MemoryCategory, MemoryType, Relation, RelationType, SearchResult};
