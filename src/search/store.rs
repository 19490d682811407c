//! Vector storage backends.
//!
//! [`QdrantStore`] talks to a Qdrant cluster over gRPC. [`MemoryStore`] is a
//! brute-force cosine index used for local development and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QdrantConfig;
use crate::error::{Error, Result};

/// A labelled reference vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Point id (UUID string)
    pub id: String,
    pub vector: Vec<f32>,
    pub label: String,
    /// Originating file
    pub source: String,
    /// Number of frames aggregated into this vector
    pub frames: u32,
}

impl VectorPoint {
    /// Build a point whose id is derived from `source` and `label`.
    pub fn new(vector: Vec<f32>, label: impl Into<String>, source: impl Into<String>) -> Self {
        let label = label.into();
        let source = source.into();
        Self {
            id: point_id(&source, &label),
            vector,
            label,
            source,
            frames: 1,
        }
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }
}

/// A search hit reduced to what label matching needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLabel {
    pub label: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ScoredLabel {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
            source: None,
        }
    }
}

/// Deterministic point id, shared by the appearance and landmark collections.
pub fn point_id(source: &str, label: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{source}_{label}").as_bytes()).to_string()
}

/// Nearest-neighbour storage for labelled vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top `limit` hits by cosine similarity, optionally only those scoring
    /// at least `score_threshold`. Hits are ordered by descending score.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredLabel>>;

    /// Insert or replace points. Returns the number written.
    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<usize>;

    /// Create a cosine collection of dimension `dim` if missing.
    /// Returns `true` when it was created.
    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<bool>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Number of stored points.
    async fn count(&self, collection: &str) -> Result<u64>;
}

/// Qdrant-backed store.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Build a client. No request is made until first use.
    pub fn connect(config: &QdrantConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).timeout(config.timeout());
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder.build()?;
        info!("Qdrant client configured for {}", config.url);
        Ok(Self { client })
    }
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

fn to_scored_label(point: ScoredPoint) -> Option<ScoredLabel> {
    let label = payload_string(&point.payload, "label")?;
    Some(ScoredLabel {
        label,
        score: point.score,
        source: payload_string(&point.payload, "source"),
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredLabel>> {
        let mut request =
            SearchPointsBuilder::new(collection, vector, limit as u64).with_payload(true);
        if let Some(threshold) = score_threshold {
            request = request.score_threshold(threshold);
        }

        let response = self.client.search_points(request).await?;
        let total = response.result.len();
        let hits: Vec<ScoredLabel> = response
            .result
            .into_iter()
            .filter_map(to_scored_label)
            .collect();
        if hits.len() < total {
            debug!(
                collection,
                dropped = total - hits.len(),
                "search hits without a label payload"
            );
        }
        Ok(hits)
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let count = points.len();
        let structs = points
            .into_iter()
            .map(|p| {
                let payload: Payload = serde_json::json!({
                    "label": p.label,
                    "source": p.source,
                    "frames": p.frames,
                })
                .try_into()?;
                Ok(PointStruct::new(p.id, p.vector, payload))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, structs).wait(true))
            .await?;
        Ok(count)
    }

    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<bool> {
        if self.client.collection_exists(collection).await? {
            return Ok(false);
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
            )
            .await?;
        info!("Created collection {} ({}D, cosine)", collection, dim);
        Ok(true)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.client.collection_exists(collection).await?)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

/// Cosine similarity; `0.0` when either vector has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Default)]
struct MemoryCollection {
    dim: usize,
    points: HashMap<String, VectorPoint>,
}

/// In-process brute-force store.
#[derive(Default, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stored point by id.
    pub async fn point(&self, collection: &str, id: &str) -> Option<VectorPoint> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.points.get(id).cloned())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredLabel>> {
        let collections = self.collections.read().await;
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::Store(format!("collection '{}' not found", collection)))?;
        if vector.len() != coll.dim {
            return Err(Error::Store(format!(
                "wrong vector dimension for '{}': expected {}, got {}",
                collection,
                coll.dim,
                vector.len()
            )));
        }

        let mut hits: Vec<ScoredLabel> = coll
            .points
            .values()
            .map(|p| ScoredLabel {
                label: p.label.clone(),
                score: cosine_similarity(&vector, &p.vector),
                source: Some(p.source.clone()),
            })
            .filter(|h| score_threshold.map_or(true, |t| h.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> Result<usize> {
        let mut collections = self.collections.write().await;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::Store(format!("collection '{}' not found", collection)))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != coll.dim) {
            return Err(Error::Store(format!(
                "point {} has dimension {}, collection '{}' expects {}",
                bad.id,
                bad.vector.len(),
                collection,
                coll.dim
            )));
        }
        let count = points.len();
        for point in points {
            coll.points.insert(point.id.clone(), point);
        }
        Ok(count)
    }

    async fn ensure_collection(&self, collection: &str, dim: usize) -> Result<bool> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(collection) {
            return Ok(false);
        }
        collections.insert(
            collection.to_string(),
            MemoryCollection {
                dim,
                points: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.points.len() as u64)
            .ok_or_else(|| Error::Store(format!("collection '{}' not found", collection)))
    }
}
