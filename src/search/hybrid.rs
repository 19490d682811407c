//! Hybrid (appearance + landmark) search orchestration.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::embedding::{Embedding, EmbeddingService};
use super::fusion::{fuse, FusedMatch, FusionConfig, LabelScore};
use super::store::{ScoredLabel, VectorStore};
use crate::config::{NodeConfig, SearchConfig};
use crate::error::{Error, Result};
use crate::landmarks::LandmarkVector;
use crate::telemetry;

/// Collections and tuning used by [`HybridSearch`].
#[derive(Debug, Clone)]
pub struct HybridSearchConfig {
    pub image_collection: String,
    pub landmark_collection: String,
    pub landmark_dim: usize,
    pub search: SearchConfig,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self::from_node(&NodeConfig::default())
    }
}

impl HybridSearchConfig {
    pub fn from_node(config: &NodeConfig) -> Self {
        Self {
            image_collection: config.qdrant.image_collection.clone(),
            landmark_collection: config.qdrant.landmark_collection.clone(),
            landmark_dim: config.embedding.landmark_dim,
            search: config.search.clone(),
        }
    }
}

/// Per-request search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub top_k: usize,
    pub image_weight: f32,
    pub landmark_weight: f32,
}

impl SearchParams {
    /// Defaults for single-image search.
    pub fn single(config: &SearchConfig) -> Self {
        Self {
            top_k: config.top_k,
            image_weight: config.image_weight,
            landmark_weight: config.landmark_weight,
        }
    }

    /// Defaults for batch search.
    pub fn batch(config: &SearchConfig) -> Self {
        Self {
            top_k: config.batch_top_k,
            image_weight: config.batch_image_weight,
            landmark_weight: config.batch_landmark_weight,
        }
    }
}

/// Ranked labels plus wall-clock time spent producing them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<FusedMatch>,
    pub processing_time_ms: f64,
}

/// Point counts for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    /// `None` when the collection could not be queried
    pub points: Option<u64>,
}

/// Encoder + vector store + fusion.
pub struct HybridSearch {
    embedding: Option<EmbeddingService>,
    store: Arc<dyn VectorStore>,
    config: HybridSearchConfig,
    available: AtomicBool,
}

/// Milliseconds since `start`, rounded to two decimals.
fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

impl HybridSearch {
    /// `embedding` is `None` when the service runs without an image model;
    /// image endpoints then fail with [`Error::ModelUnavailable`].
    pub fn new(
        embedding: Option<EmbeddingService>,
        store: Arc<dyn VectorStore>,
        config: HybridSearchConfig,
    ) -> Self {
        Self {
            embedding,
            store,
            config,
            available: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &HybridSearchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedding(&self) -> Result<&EmbeddingService> {
        self.embedding.as_ref().ok_or(Error::ModelUnavailable)
    }

    pub fn model_loaded(&self) -> bool {
        self.embedding.is_some()
    }

    /// Whether the last [`probe`](Self::probe) found the image collection.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Re-check that the appearance collection exists.
    pub async fn probe(&self) -> bool {
        let available = match self
            .store
            .collection_exists(&self.config.image_collection)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                debug!("vector store probe failed: {}", e);
                false
            }
        };
        let was = self.available.swap(available, Ordering::Relaxed);
        if was != available {
            if available {
                info!("Vector store available ({})", self.config.image_collection);
            } else {
                warn!(
                    "Vector store unavailable: collection '{}' not reachable",
                    self.config.image_collection
                );
            }
        }
        available
    }

    /// Encode an image and fuse appearance and landmark hits.
    pub async fn search_image(
        &self,
        image: Vec<u8>,
        landmarks: Option<LandmarkVector>,
        params: SearchParams,
    ) -> Result<SearchOutcome> {
        let start = Instant::now();
        let embedding = self.embedding()?.embed_image(image, false).await?;
        let results = self.search_vectors(embedding, landmarks, params).await?;
        Ok(SearchOutcome {
            results,
            processing_time_ms: elapsed_ms(start),
        })
    }

    /// Search both collections concurrently and fuse the hits.
    ///
    /// A blank or missing landmark vector skips the landmark search. When one
    /// modality fails its hits are treated as empty; if every attempted
    /// search fails the first error is returned.
    pub async fn search_vectors(
        &self,
        embedding: Embedding,
        landmarks: Option<LandmarkVector>,
        params: SearchParams,
    ) -> Result<Vec<FusedMatch>> {
        let s = &self.config.search;
        let limit = params.top_k.max(1).saturating_mul(s.candidate_multiplier);
        let threshold = Some(s.score_threshold);

        let landmarks = landmarks.filter(|l| !l.is_blank());
        let image_search = self.store.search(
            &self.config.image_collection,
            embedding,
            limit,
            threshold,
        );
        let landmark_search = async {
            match landmarks {
                Some(l) => Some(
                    self.store
                        .search(
                            &self.config.landmark_collection,
                            l.into_inner(),
                            limit,
                            threshold,
                        )
                        .await,
                ),
                None => None,
            }
        };
        let (image_hits, landmark_hits) = tokio::join!(image_search, landmark_search);

        let (image_hits, landmark_hits) = match (image_hits, landmark_hits) {
            (Ok(i), Some(Ok(l))) => (i, l),
            (Ok(i), None) => (i, Vec::new()),
            (Ok(i), Some(Err(e))) => {
                warn!("Landmark search failed, using appearance only: {}", e);
                telemetry::record_search_failure("landmark");
                (i, Vec::new())
            }
            (Err(e), Some(Ok(l))) => {
                warn!("Appearance search failed, using landmarks only: {}", e);
                telemetry::record_search_failure("image");
                (Vec::new(), l)
            }
            (Err(e), _) => return Err(e),
        };

        debug!(
            image_hits = image_hits.len(),
            landmark_hits = landmark_hits.len(),
            "fusing hits"
        );

        let fusion = FusionConfig::from_search(s)
            .with_weights(params.image_weight, params.landmark_weight);
        Ok(fuse(&image_hits, &landmark_hits, &fusion, params.top_k))
    }

    /// Search each image independently. A failing image yields an empty
    /// outcome in its slot instead of failing the batch.
    pub async fn search_batch(
        &self,
        images: Vec<Vec<u8>>,
        params: SearchParams,
    ) -> Result<Vec<SearchOutcome>> {
        self.embedding()?;
        let searches = images
            .into_iter()
            .enumerate()
            .map(|(idx, image)| async move {
                self.search_image(image, None, params)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Batch item {} failed: {}", idx, e);
                        SearchOutcome::default()
                    })
            });
        // join_all keeps input order
        Ok(futures::future::join_all(searches).await)
    }

    /// Landmark-only recognition.
    pub async fn search_landmarks(
        &self,
        vector: LandmarkVector,
        top_k: usize,
    ) -> Result<Vec<LabelScore>> {
        if vector.dim() != self.config.landmark_dim {
            return Err(Error::InvalidInput(format!(
                "Expected {}D landmark vector, got {}D",
                self.config.landmark_dim,
                vector.dim()
            )));
        }
        if vector.is_blank() {
            return Ok(Vec::new());
        }
        let hits = self
            .store
            .search(
                &self.config.landmark_collection,
                vector.into_inner(),
                top_k,
                None,
            )
            .await?;
        Ok(hits.into_iter().map(LabelScore::from).collect())
    }

    /// Raw appearance hits scoring strictly above `cutoff`, in rank order.
    pub async fn search_appearance(
        &self,
        embedding: Embedding,
        top_k: usize,
        cutoff: f32,
    ) -> Result<Vec<(String, f32)>> {
        let hits: Vec<ScoredLabel> = self
            .store
            .search(
                &self.config.image_collection,
                embedding,
                top_k,
                Some(self.config.search.score_threshold),
            )
            .await?;
        Ok(hits
            .into_iter()
            .filter(|h| h.score > cutoff)
            .map(|h| (h.label, h.score))
            .collect())
    }

    /// Point counts of both collections.
    pub async fn collection_stats(&self) -> Vec<CollectionStats> {
        let mut stats = Vec::with_capacity(2);
        for name in [
            &self.config.image_collection,
            &self.config.landmark_collection,
        ] {
            let points = self.store.count(name).await.ok();
            stats.push(CollectionStats {
                name: name.clone(),
                points,
            });
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ImageEncoder, MemoryStore, PreprocessOptions, VectorPoint};

    const IMG: &str = "img";
    const LM: &str = "lm";

    fn config() -> HybridSearchConfig {
        HybridSearchConfig {
            image_collection: IMG.into(),
            landmark_collection: LM.into(),
            landmark_dim: 3,
            search: SearchConfig::default(),
        }
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.ensure_collection(IMG, 2).await.unwrap();
        store.ensure_collection(LM, 3).await.unwrap();
        store
            .upsert(
                IMG,
                vec![
                    VectorPoint::new(vec![1.0, 0.0], "hello", "hello.jpg"),
                    VectorPoint::new(vec![0.0, 1.0], "thanks", "thanks.jpg"),
                ],
            )
            .await
            .unwrap();
        store
            .upsert(
                LM,
                vec![
                    VectorPoint::new(vec![1.0, 0.0, 0.0], "hello", "hello.json"),
                    VectorPoint::new(vec![0.0, 0.0, 1.0], "yes", "yes.json"),
                ],
            )
            .await
            .unwrap();
        store
    }

    struct Fixed;

    impl ImageEncoder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn encode_batch(&self, images: &[Vec<u8>]) -> Result<Vec<Embedding>> {
            Ok(images.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_vectors_fuse_both_modalities() {
        let search = HybridSearch::new(None, seeded_store().await, config());
        let landmarks = LandmarkVector::new(vec![1.0, 0.0, 0.0], 3).unwrap();
        let params = SearchParams::single(&SearchConfig::default());

        let out = search
            .search_vectors(vec![1.0, 0.0], Some(landmarks), params)
            .await
            .unwrap();
        assert_eq!(out[0].label, "hello");
        assert_eq!(out[0].score, 1.0);
        assert!(out.iter().all(|m| m.label != "thanks"));
    }

    #[tokio::test]
    async fn test_blank_landmarks_skip_landmark_search() {
        let search = HybridSearch::new(None, seeded_store().await, config());
        let blank = LandmarkVector::new(vec![0.0; 3], 3).unwrap();
        let params = SearchParams::single(&SearchConfig::default());
        let params = SearchParams {
            image_weight: 1.0,
            ..params
        };

        let out = search
            .search_vectors(vec![1.0, 0.0], Some(blank), params)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].landmark_score.is_none());
    }

    #[tokio::test]
    async fn test_missing_landmark_collection_degrades() {
        let store = Arc::new(MemoryStore::new());
        store.ensure_collection(IMG, 2).await.unwrap();
        store
            .upsert(IMG, vec![VectorPoint::new(vec![1.0, 0.0], "hello", "h.jpg")])
            .await
            .unwrap();
        let search = HybridSearch::new(None, store, config());
        let params = SearchParams {
            top_k: 5,
            image_weight: 1.0,
            landmark_weight: 0.0,
        };
        let landmarks = LandmarkVector::new(vec![1.0, 0.0, 0.0], 3).unwrap();

        let out = search
            .search_vectors(vec![1.0, 0.0], Some(landmarks), params)
            .await
            .unwrap();
        assert_eq!(out[0].label, "hello");
    }

    #[tokio::test]
    async fn test_all_modalities_failing_is_error() {
        let search = HybridSearch::new(None, Arc::new(MemoryStore::new()), config());
        let params = SearchParams::single(&SearchConfig::default());
        assert!(search
            .search_vectors(vec![1.0, 0.0], None, params)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_image_search_without_model() {
        let search = HybridSearch::new(None, seeded_store().await, config());
        let params = SearchParams::single(&SearchConfig::default());
        let err = search.search_image(vec![1, 2, 3], None, params).await.unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable));
    }

    #[tokio::test]
    async fn test_batch_keeps_slot_for_bad_image() {
        let embedding =
            EmbeddingService::with_encoder(Arc::new(Fixed), PreprocessOptions::default());
        let search = HybridSearch::new(Some(embedding), seeded_store().await, config());
        let params = SearchParams {
            top_k: 5,
            image_weight: 1.0,
            landmark_weight: 0.0,
        };

        let out = search
            .search_batch(vec![b"junk".to_vec()], params)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].results.is_empty());
        assert_eq!(out[0].processing_time_ms, 0.0);
    }

    #[tokio::test]
    async fn test_landmark_recognition() {
        let search = HybridSearch::new(None, seeded_store().await, config());
        let vector = LandmarkVector::new(vec![0.0, 0.1, 1.0], 3).unwrap();
        let out = search.search_landmarks(vector, 5).await.unwrap();
        assert_eq!(out[0].label, "yes");

        let wrong = LandmarkVector::new(vec![1.0; 4], 4).unwrap();
        assert!(matches!(
            search.search_landmarks(wrong, 5).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_appearance_cutoff_and_probe() {
        let search = HybridSearch::new(None, seeded_store().await, config());
        assert!(!search.is_available());
        assert!(search.probe().await);
        assert!(search.is_available());

        let hits = search
            .search_appearance(vec![0.6, 0.8], 15, 0.7)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "thanks");

        let stats = search.collection_stats().await;
        assert_eq!(stats[0].points, Some(2));
    }
}
