//! Multi-modal sign search.
//!
//! Provides vector-based label matching using:
//! - FastEmbed for appearance embeddings (ONNX CLIP image tower)
//! - Qdrant for vector storage and similarity search
//! - Score fusion combining appearance and landmark similarity
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │  Image / frame  │────▶│ EmbeddingService│
//! │    (bytes)      │     │   (FastEmbed)   │
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!  ┌─────────────────┐             ▼
//!  │ Landmark vector │     ┌──────────────┐
//!  │ (client-side)   │     │  Embedding   │
//!  └────────┬────────┘     │  [f32; 512]  │
//!           │              └──────┬───────┘
//!           ▼                     ▼
//!    ┌──────────────┐      ┌──────────────┐
//!    │   Qdrant     │      │   Qdrant     │
//!    │ landmarks    │      │ appearance   │
//!    └──────┬───────┘      └──────┬───────┘
//!           │                     │
//!           └──────────┬──────────┘
//!                      ▼
//!              ┌──────────────┐
//!              │ Score fusion │
//!              │ ranked labels│
//!              └──────────────┘
//! ```

mod embedding;
mod fusion;
mod hybrid;
mod preprocess;
mod store;

pub use embedding::{
    l2_normalize, Embedding, EmbeddingService, EmbeddingServiceConfig, FastEmbedEncoder,
    ImageEncoder, ImageModel,
};
pub use fusion::{fuse, FusedMatch, FusionConfig, LabelScore};
pub use hybrid::{CollectionStats, HybridSearch, HybridSearchConfig, SearchOutcome, SearchParams};
pub use preprocess::{preprocess_image, PreprocessOptions};
pub use store::{
    cosine_similarity, point_id, MemoryStore, QdrantStore, ScoredLabel, VectorPoint, VectorStore,
};

/// Default image model (CLIP ViT-B/32 - 512 dimensions)
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 512;
