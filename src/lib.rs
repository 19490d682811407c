//! SignLens - sign recognition over multi-modal vector search.
//!
//! An image is embedded by a CLIP-family model and searched against a
//! collection of labelled reference embeddings; a landmark vector from a
//! client-side hand/pose detector is searched against a second collection.
//! The two hit lists are fused into one ranked label list. Live sessions
//! smooth predictions across a stream of camera frames.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod landmarks;
pub mod live;
pub mod search;
pub mod telemetry;

pub use api::{ApiConfig, ApiServer, AppState, HealthResponse, RateLimitService};
pub use config::{
    ApiSection, EmbeddingConfig, LiveConfig, MetricsConfig, NodeConfig, QdrantConfig,
    RateLimitConfig, SearchConfig,
};
pub use error::{Error, Result};
pub use ingest::{IngestConfig, IngestReport, Ingestor};
pub use landmarks::{LandmarkFrame, LandmarkVector};
pub use live::{LiveSession, LiveSessions, LiveSnapshot, LiveStatus};
pub use search::{
    EmbeddingService, EmbeddingServiceConfig, HybridSearch, HybridSearchConfig, MemoryStore,
    QdrantStore, VectorStore,
};
pub use telemetry::MetricsService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
