use moka::future::Cache;
use moka::notification::RemovalCause;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::buffer::FrameBuffer;
use super::smoothing::{EmaSmoother, Prediction, SmoothingConfig};
use crate::config::LiveConfig;
use crate::error::{Error, Result};
use crate::search::{EmbeddingService, HybridSearch};
use crate::telemetry;

/// Where a live session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    /// Vector store unreachable
    Offline,
    /// Waiting for enough frames
    Buffering,
    /// A search is running
    Searching,
    /// Predictions are being published
    Ready,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub session_id: String,
    pub status: LiveStatus,
    pub buffered: usize,
    pub capacity: usize,
    pub frames_received: u64,
    pub frames_encoded: u64,
    pub searches: u64,
    pub predictions: Vec<Prediction>,
}

/// One live recognition stream.
pub struct LiveSession {
    id: String,
    config: LiveConfig,
    buffer: Mutex<FrameBuffer>,
    smoother: Mutex<EmaSmoother>,
    predictions: RwLock<Vec<Prediction>>,
    frames_received: AtomicU64,
    frames_encoded: AtomicU64,
    stride_position: AtomicU64,
    searches: AtomicU64,
    search_in_progress: AtomicBool,
    store_available: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl LiveSession {
    pub fn new(id: impl Into<String>, config: LiveConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            buffer: Mutex::new(FrameBuffer::new(config.buffer_capacity())),
            smoother: Mutex::new(EmaSmoother::new(SmoothingConfig::from_live(&config))),
            predictions: RwLock::new(Vec::new()),
            frames_received: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            stride_position: AtomicU64::new(0),
            searches: AtomicU64::new(0),
            search_in_progress: AtomicBool::new(false),
            store_available: AtomicBool::new(true),
            shutdown_tx,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop the background worker. Idempotent.
    pub fn close(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!(session_id = %self.id, "live session closed");
        }
    }

    /// Accept a camera frame. Every `frame_stride`-th frame (starting with
    /// the first) is encoded into the buffer; returns whether this one was.
    ///
    /// A frame that fails to decode does not use up its stride slot: the
    /// next frame is encoded in its place.
    pub async fn push_frame(&self, frame: Vec<u8>, embedding: &EmbeddingService) -> Result<bool> {
        if self.is_closed() {
            return Err(Error::NotFound(format!("Live session {} is closed", self.id)));
        }
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let position = self.stride_position.load(Ordering::Relaxed);
        if position % self.config.frame_stride.max(1) != 0 {
            self.stride_position.fetch_add(1, Ordering::Relaxed);
            telemetry::record_live_frame(false);
            return Ok(false);
        }

        let vector = embedding.embed_image(frame, self.config.mirror).await?;
        self.stride_position.fetch_add(1, Ordering::Relaxed);
        self.buffer.lock().await.push(vector);
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
        telemetry::record_live_frame(true);
        Ok(true)
    }

    /// One background step: search with the weighted buffer query and fold
    /// the hits into the smoother. Returns whether a search ran.
    pub async fn run_search_cycle(&self, search: &HybridSearch) -> Result<bool> {
        let available = search.is_available() || search.probe().await;
        self.store_available.store(available, Ordering::Relaxed);
        if !available {
            return Ok(false);
        }

        let query = {
            let buffer = self.buffer.lock().await;
            if buffer.len() < self.config.min_frames {
                return Ok(false);
            }
            buffer.weighted_query()
        };
        let Some(query) = query else {
            return Ok(false);
        };

        self.search_in_progress.store(true, Ordering::Relaxed);
        let hits = search
            .search_appearance(query, self.config.search_top_k, self.config.raw_cutoff)
            .await;
        self.search_in_progress.store(false, Ordering::Relaxed);

        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                telemetry::record_live_search(false);
                // Force a re-probe on the next tick.
                search.probe().await;
                return Err(e);
            }
        };

        let predictions = {
            let mut smoother = self.smoother.lock().await;
            smoother.update(&hits);
            smoother.predictions()
        };
        *self.predictions.write().await = predictions;
        self.searches.fetch_add(1, Ordering::Relaxed);
        telemetry::record_live_search(true);
        Ok(true)
    }

    pub async fn predictions(&self) -> Vec<Prediction> {
        self.predictions.read().await.clone()
    }

    pub async fn snapshot(&self) -> LiveSnapshot {
        let (buffered, capacity) = {
            let buffer = self.buffer.lock().await;
            (buffer.len(), buffer.capacity())
        };
        let status = if !self.store_available.load(Ordering::Relaxed) {
            LiveStatus::Offline
        } else if self.search_in_progress.load(Ordering::Relaxed) {
            LiveStatus::Searching
        } else if buffered >= self.config.min_frames {
            LiveStatus::Ready
        } else {
            LiveStatus::Buffering
        };

        LiveSnapshot {
            session_id: self.id.clone(),
            status,
            buffered,
            capacity,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            searches: self.searches.load(Ordering::Relaxed),
            predictions: self.predictions().await,
        }
    }
}

/// Start the polling worker for `session`.
///
/// The worker holds only a weak reference, so it ends when the session is
/// closed or dropped.
pub fn spawn_worker(session: &Arc<LiveSession>, search: Arc<HybridSearch>) -> JoinHandle<()> {
    let weak = Arc::downgrade(session);
    let mut shutdown = session.shutdown_tx.subscribe();
    let period = session.config.search_interval();
    let session_id = session.id.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(session) = weak.upgrade() else { break };
                    if session.is_closed() {
                        break;
                    }
                    if let Err(e) = session.run_search_cycle(&search).await {
                        debug!(session_id = %session_id, "live search failed: {}", e);
                    }
                }
            }
        }
        debug!(session_id = %session_id, "live worker stopped");
    })
}

/// Registry of live sessions with idle expiry.
pub struct LiveSessions {
    cache: Cache<String, Arc<LiveSession>>,
    search: Arc<HybridSearch>,
    config: LiveConfig,
}

impl LiveSessions {
    pub fn new(search: Arc<HybridSearch>, config: LiveConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_sessions)
            .time_to_idle(Duration::from_secs(config.session_ttl_secs))
            .eviction_listener(|id: Arc<String>, session: Arc<LiveSession>, cause| {
                if cause != RemovalCause::Explicit {
                    info!("Live session {} evicted ({:?})", id, cause);
                }
                session.close();
            })
            .build();
        Self {
            cache,
            search,
            config,
        }
    }

    /// Open a session and start its worker. Requires the image model.
    ///
    /// Fails with [`Error::Capacity`] when `max_sessions` are open; the cache
    /// would otherwise be free to evict the new session straight away.
    pub async fn create(&self) -> Result<Arc<LiveSession>> {
        self.search.embedding()?;
        self.cache.run_pending_tasks().await;
        if self.count() >= self.config.max_sessions {
            return Err(self.full());
        }

        let id = Uuid::new_v4().to_string();
        let session = Arc::new(LiveSession::new(id.clone(), self.config.clone()));
        self.cache.insert(id.clone(), Arc::clone(&session)).await;
        self.cache.run_pending_tasks().await;
        // A concurrent create can still win the last slot.
        if !self.cache.contains_key(&id) {
            session.close();
            return Err(self.full());
        }

        spawn_worker(&session, Arc::clone(&self.search));
        info!("Live session {} opened", id);
        telemetry::set_live_sessions(self.count());
        Ok(session)
    }

    fn full(&self) -> Error {
        Error::Capacity(format!(
            "{} live sessions are open",
            self.config.max_sessions
        ))
    }

    pub async fn get(&self, id: &str) -> Result<Arc<LiveSession>> {
        self.cache
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Live session {}", id)))
    }

    /// Push a frame to session `id` and return its state afterwards.
    pub async fn push_frame(&self, id: &str, frame: Vec<u8>) -> Result<LiveSnapshot> {
        let session = self.get(id).await?;
        let embedding = self.search.embedding()?;
        session.push_frame(frame, embedding).await?;
        Ok(session.snapshot().await)
    }

    pub async fn close(&self, id: &str) -> Result<()> {
        match self.cache.remove(id).await {
            Some(session) => {
                session.close();
                info!("Live session {} closed", id);
                telemetry::set_live_sessions(self.count());
                Ok(())
            }
            None => Err(Error::NotFound(format!("Live session {}", id))),
        }
    }

    /// Approximate number of open sessions.
    pub fn count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Close every session (shutdown).
    pub async fn close_all(&self) {
        for (_, session) in self.cache.iter() {
            session.close();
        }
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        if self.count() > 0 {
            warn!("{} live sessions still registered after shutdown", self.count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{
        Embedding, HybridSearchConfig, ImageEncoder, MemoryStore, PreprocessOptions, VectorPoint,
        VectorStore,
    };
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

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

    fn png() -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([50, 60, 70])))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn live_config() -> LiveConfig {
        LiveConfig {
            min_frames: 2,
            frame_stride: 1,
            search_interval_ms: 10,
            ..LiveConfig::default()
        }
    }

    async fn search() -> Arc<HybridSearch> {
        let config = HybridSearchConfig::default();
        let store = Arc::new(MemoryStore::new());
        store.ensure_collection(&config.image_collection, 2).await.unwrap();
        store
            .upsert(
                &config.image_collection,
                vec![VectorPoint::new(vec![1.0, 0.0], "hello", "hello.jpg")],
            )
            .await
            .unwrap();
        let embedding = EmbeddingService::with_encoder(Arc::new(Fixed), PreprocessOptions::default());
        Arc::new(HybridSearch::new(Some(embedding), store, config))
    }

    #[tokio::test]
    async fn test_frame_stride() {
        let search = search().await;
        let config = LiveConfig {
            frame_stride: 2,
            ..live_config()
        };
        let session = LiveSession::new("s", config);
        let embedding = search.embedding().unwrap();

        assert!(session.push_frame(png(), embedding).await.unwrap());
        assert!(!session.push_frame(png(), embedding).await.unwrap());
        assert!(session.push_frame(png(), embedding).await.unwrap());

        let snap = session.snapshot().await;
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.frames_encoded, 2);
        assert_eq!(snap.status, LiveStatus::Ready);
    }

    #[tokio::test]
    async fn test_undecodable_frame_keeps_stride_slot() {
        let search = search().await;
        let config = LiveConfig {
            frame_stride: 2,
            ..live_config()
        };
        let session = LiveSession::new("s", config);
        let embedding = search.embedding().unwrap();

        assert!(session.push_frame(b"junk".to_vec(), embedding).await.is_err());
        assert!(session.push_frame(png(), embedding).await.unwrap());
        assert!(!session.push_frame(png(), embedding).await.unwrap());

        let snap = session.snapshot().await;
        assert_eq!(snap.frames_received, 3);
        assert_eq!(snap.frames_encoded, 1);
    }

    #[tokio::test]
    async fn test_search_cycle_waits_for_min_frames() {
        let search = search().await;
        let session = LiveSession::new("s", live_config());
        let embedding = search.embedding().unwrap();

        session.push_frame(png(), embedding).await.unwrap();
        assert!(!session.run_search_cycle(&search).await.unwrap());
        assert_eq!(session.snapshot().await.status, LiveStatus::Buffering);

        session.push_frame(png(), embedding).await.unwrap();
        assert!(session.run_search_cycle(&search).await.unwrap());

        let predictions = session.predictions().await;
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, "hello");
        // first observation: 1.0 * 0.8
        assert!((predictions[0].score - 0.8).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_offline_when_collection_missing() {
        let store = Arc::new(MemoryStore::new());
        let embedding = EmbeddingService::with_encoder(Arc::new(Fixed), PreprocessOptions::default());
        let search = HybridSearch::new(Some(embedding), store, HybridSearchConfig::default());
        let session = LiveSession::new("s", live_config());

        assert!(!session.run_search_cycle(&search).await.unwrap());
        assert_eq!(session.snapshot().await.status, LiveStatus::Offline);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_frames() {
        let search = search().await;
        let session = LiveSession::new("s", live_config());
        session.close();
        session.close();
        assert!(session
            .push_frame(png(), search.embedding().unwrap())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_worker_publishes_predictions() {
        let sessions = LiveSessions::new(search().await, live_config());
        let session = sessions.create().await.unwrap();
        let id = session.id().to_string();

        sessions.push_frame(&id, png()).await.unwrap();
        sessions.push_frame(&id, png()).await.unwrap();

        let mut published = false;
        for _ in 0..100 {
            if !session.predictions().await.is_empty() {
                published = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(published, "worker never published predictions");

        sessions.close(&id).await.unwrap();
        assert!(session.is_closed());
        assert!(matches!(sessions.get(&id).await, Err(Error::NotFound(_))));
        assert!(matches!(sessions.close(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_worker_stops_when_session_closed() {
        let search = search().await;
        let session = Arc::new(LiveSession::new("s", live_config()));
        let handle = spawn_worker(&session, search);

        session.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker still running after close")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_session_dropped() {
        let search = search().await;
        let session = Arc::new(LiveSession::new("s", live_config()));
        let handle = spawn_worker(&session, search);

        drop(session);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker still running after drop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let config = LiveConfig {
            session_ttl_secs: 1,
            ..live_config()
        };
        let sessions = LiveSessions::new(search().await, config);
        let session = sessions.create().await.unwrap();
        let id = session.id().to_string();
        assert!(sessions.get(&id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(matches!(sessions.get(&id).await, Err(Error::NotFound(_))));
        sessions.cache.run_pending_tasks().await;
        assert!(session.is_closed());
        assert_eq!(sessions.count(), 0);
    }

    #[tokio::test]
    async fn test_create_refuses_past_max_sessions() {
        let config = LiveConfig {
            max_sessions: 1,
            ..live_config()
        };
        let sessions = LiveSessions::new(search().await, config);

        let first = sessions.create().await.unwrap();
        sessions.push_frame(first.id(), png()).await.unwrap();
        assert!(matches!(sessions.create().await, Err(Error::Capacity(_))));

        // The open session is untouched.
        assert!(!first.is_closed());
        assert!(sessions.push_frame(first.id(), png()).await.is_ok());

        sessions.close(first.id()).await.unwrap();
        let second = sessions.create().await.unwrap();
        assert!(sessions.get(second.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_requires_model() {
        let search = Arc::new(HybridSearch::new(
            None,
            Arc::new(MemoryStore::new()),
            HybridSearchConfig::default(),
        ));
        let sessions = LiveSessions::new(search, live_config());
        assert!(matches!(sessions.create().await, Err(Error::ModelUnavailable)));
    }
}
