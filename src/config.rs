//! Node configuration.
//!
//! Loaded from a TOML file (see `signlens init`), with a couple of
//! environment overrides for the vector database connection.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding [`QdrantConfig::url`].
pub const ENV_QDRANT_URL: &str = "QDRANT_URL";

/// Environment variable overriding [`QdrantConfig::api_key`].
pub const ENV_QDRANT_API_KEY: &str = "QDRANT_API_KEY";

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP API settings
    pub api: ApiSection,
    /// Vector database connection
    pub qdrant: QdrantConfig,
    /// Image embedding model
    pub embedding: EmbeddingConfig,
    /// Single-image search and fusion
    pub search: SearchConfig,
    /// Live (multi-frame) recognition
    pub live: LiveConfig,
    /// Per-client request limits
    pub rate_limit: RateLimitConfig,
    /// Prometheus metrics
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `QDRANT_URL` / `QDRANT_API_KEY` overrides and normalise the URL.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_QDRANT_URL) {
            if !url.trim().is_empty() {
                self.qdrant.url = url;
            }
        }
        if let Ok(key) = std::env::var(ENV_QDRANT_API_KEY) {
            self.qdrant.api_key = if key.is_empty() { None } else { Some(key) };
        }
        self.qdrant.url = normalize_qdrant_url(&self.qdrant.url);
    }

    /// Check value ranges. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        let s = &self.search;
        check_unit("search.image_weight", s.image_weight)?;
        check_unit("search.landmark_weight", s.landmark_weight)?;
        check_unit("search.batch_image_weight", s.batch_image_weight)?;
        check_unit("search.batch_landmark_weight", s.batch_landmark_weight)?;
        if s.image_weight + s.landmark_weight <= 0.0 {
            return Err(invalid("search", "image and landmark weights are both zero"));
        }
        check_unit("search.score_threshold", s.score_threshold)?;
        check_unit("search.min_score", s.min_score)?;
        if s.dual_boost < 1.0 {
            return Err(invalid("search.dual_boost", "must be >= 1.0"));
        }
        if s.top_k == 0 || s.candidate_multiplier == 0 {
            return Err(invalid("search.top_k", "top_k and candidate_multiplier must be > 0"));
        }

        let l = &self.live;
        if !(l.alpha > 0.0 && l.alpha <= 1.0) {
            return Err(invalid("live.alpha", "must be in (0, 1]"));
        }
        if !(l.decay > 0.0 && l.decay <= 1.0) {
            return Err(invalid("live.decay", "must be in (0, 1]"));
        }
        check_unit("live.raw_cutoff", l.raw_cutoff)?;
        check_unit("live.display_threshold", l.display_threshold)?;
        if l.min_frames == 0 || l.buffer_capacity() < l.min_frames {
            return Err(invalid(
                "live.min_frames",
                "must be >= 1 and fit in buffer_seconds * fps",
            ));
        }
        if l.frame_stride == 0 {
            return Err(invalid("live.frame_stride", "must be > 0"));
        }
        if l.search_interval_ms == 0 {
            return Err(invalid("live.search_interval_ms", "must be > 0"));
        }

        if self.embedding.landmark_dim == 0 {
            return Err(invalid("embedding.landmark_dim", "must be > 0"));
        }
        if self.qdrant.image_collection == self.qdrant.landmark_collection {
            return Err(invalid(
                "qdrant",
                "image and landmark collections must differ",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> Error {
    Error::Config(format!("{field}: {message}"))
}

fn check_unit(field: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, "must be between 0.0 and 1.0"))
    }
}

/// Normalise a Qdrant URL: hosted cloud endpoints need an explicit https scheme.
pub fn normalize_qdrant_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("cloud.qdrant.io") && !trimmed.starts_with("http") {
        format!("https://{trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Listen address, e.g. `0.0.0.0:8000`
    pub listen_address: String,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed origins; empty means any
    pub cors_origins: Vec<String>,
    /// Maximum request body (uploads) in bytes
    pub max_body_bytes: usize,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Vector database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// gRPC endpoint
    pub url: String,
    /// API key for hosted clusters
    pub api_key: Option<String>,
    /// Collection of appearance embeddings
    pub image_collection: String,
    /// Collection of landmark vectors
    pub landmark_collection: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl QdrantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            image_collection: "clip_videos".to_string(),
            landmark_collection: "hand_landmarks".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Image embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier, see [`crate::search::EmbeddingServiceConfig`]
    pub model: String,
    /// Where model files are cached
    pub cache_dir: Option<String>,
    /// Show a progress bar while downloading the model
    pub show_download_progress: bool,
    /// Dimension of landmark vectors
    pub landmark_dim: usize,
    /// Fraction of rows kept by the centre crop (1.0 disables cropping)
    pub crop_fraction: f32,
    /// Equalise the luma histogram before encoding
    pub equalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: crate::search::DEFAULT_MODEL.to_string(),
            cache_dir: None,
            show_download_progress: true,
            landmark_dim: crate::landmarks::DEFAULT_LANDMARK_DIM,
            crop_fraction: 0.6,
            equalize: true,
        }
    }
}

/// Single-image search and score fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned by `/search`
    pub top_k: usize,
    /// Results returned by `/search/batch`
    pub batch_top_k: usize,
    /// Results returned by `/recognize/landmarks`
    pub landmark_top_k: usize,
    /// Appearance weight
    pub image_weight: f32,
    /// Landmark weight
    pub landmark_weight: f32,
    /// Appearance weight for batch search
    pub batch_image_weight: f32,
    /// Landmark weight for batch search
    pub batch_landmark_weight: f32,
    /// Per-hit similarity floor sent to the vector store
    pub score_threshold: f32,
    /// Each modality fetches `top_k * candidate_multiplier` hits
    pub candidate_multiplier: usize,
    /// Multiplier for labels found by both modalities
    pub dual_boost: f32,
    /// Fused scores must exceed this
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            batch_top_k: 5,
            landmark_top_k: 5,
            image_weight: 0.35,
            landmark_weight: 0.65,
            batch_image_weight: 0.4,
            batch_landmark_weight: 0.6,
            score_threshold: 0.3,
            candidate_multiplier: 2,
            dual_boost: 1.15,
            min_score: 0.35,
        }
    }
}

/// Live recognition (frame buffer + EMA smoothing).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Seconds of frames kept in the buffer
    pub buffer_seconds: usize,
    /// Frames per second the buffer is sized for
    pub fps: usize,
    /// Frames required before searching
    pub min_frames: usize,
    /// Delay between background searches
    pub search_interval_ms: u64,
    /// Encode every n-th pushed frame
    pub frame_stride: u64,
    /// Mirror frames horizontally before encoding
    pub mirror: bool,
    /// Hits requested per background search
    pub search_top_k: usize,
    /// Per-hit score floor (strict)
    pub raw_cutoff: f32,
    /// EMA smoothing factor
    pub alpha: f32,
    /// Per-search multiplicative decay
    pub decay: f32,
    /// Factor applied to a label's first observation
    pub new_label_factor: f32,
    /// Rank-position weight is `exp(-rank * rank_decay)`
    pub rank_decay: f32,
    /// Prune threshold when more than `crowded_labels` labels are tracked
    pub prune_threshold_crowded: f32,
    /// Prune threshold otherwise
    pub prune_threshold_sparse: f32,
    /// Label count above which the crowded threshold applies
    pub crowded_labels: usize,
    /// Published predictions must exceed this
    pub display_threshold: f32,
    /// Maximum published predictions
    pub display_top: usize,
    /// Sessions idle longer than this are dropped
    pub session_ttl_secs: u64,
    /// Maximum concurrent sessions
    pub max_sessions: u64,
}

impl LiveConfig {
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_seconds * self.fps
    }

    pub fn search_interval(&self) -> Duration {
        Duration::from_millis(self.search_interval_ms)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: 3,
            fps: 10,
            min_frames: 5,
            search_interval_ms: 200,
            frame_stride: 2,
            mirror: true,
            search_top_k: 15,
            raw_cutoff: 0.35,
            alpha: 0.25,
            decay: 0.97,
            new_label_factor: 0.8,
            rank_decay: 0.2,
            prune_threshold_crowded: 0.08,
            prune_threshold_sparse: 0.05,
            crowded_labels: 3,
            display_threshold: 0.25,
            display_top: 3,
            session_ttl_secs: 300,
            max_sessions: 64,
        }
    }
}

/// Per-client rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the limiter
    pub enabled: bool,
    /// Sustained requests per second per client
    pub requests_per_second: u32,
    /// Burst allowance
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Live clients push ~10 frames/s plus polling.
            requests_per_second: 30,
            burst_size: 60,
        }
    }
}

/// Prometheus metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record and expose metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
