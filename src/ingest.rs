//! Reference data ingestion.
//!
//! Fills the appearance collection from a directory of labelled images or
//! of pre-extracted clip frames, and the landmark collection from landmark
//! extractor output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::landmarks::{mean_vector, LandmarkFrame};
use crate::search::{l2_normalize, Embedding, HybridSearch, VectorPoint};
use crate::telemetry;

/// Image extensions picked up by directory ingestion.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Landmark points per upsert request.
const LANDMARK_UPLOAD_CHUNK: usize = 256;

/// Ingestion limits.
#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Images encoded per model call
    pub batch_size: usize,
    /// Images used per label directory, or frames per clip
    pub max_per_label: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            max_per_label: 1200,
        }
    }
}

/// Summary of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Distinct labels seen
    pub labels: usize,
    /// Inputs attempted
    pub processed: usize,
    /// Points written
    pub uploaded: usize,
    /// Inputs that failed to read, decode, encode or upload
    pub failed: usize,
    /// Inputs ignored (over the per-label cap, blank vectors, ...)
    pub skipped: usize,
}

/// Extractor files hold either one frame record or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum FrameFile {
    One(LandmarkFrame),
    Many(Vec<LandmarkFrame>),
}

/// Writes reference vectors through a [`HybridSearch`]'s encoder and store.
pub struct Ingestor {
    search: Arc<HybridSearch>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(search: Arc<HybridSearch>, config: IngestConfig) -> Self {
        Self { search, config }
    }

    /// Create both collections (cosine distance) when missing.
    ///
    /// Returns which of (image, landmark) were created.
    pub async fn init_collections(&self, image_dim: usize) -> Result<(bool, bool)> {
        let cfg = self.search.config();
        let store = self.search.store();
        let image = store
            .ensure_collection(&cfg.image_collection, image_dim)
            .await?;
        let landmark = store
            .ensure_collection(&cfg.landmark_collection, cfg.landmark_dim)
            .await?;
        if !image && !landmark {
            info!("Collections already exist");
        }
        Ok((image, landmark))
    }

    /// Ingest `dir/<label>/<image>` into the appearance collection.
    pub async fn ingest_image_dir(&self, dir: &Path) -> Result<IngestReport> {
        let label_dirs = sub_dirs(dir).await?;
        if label_dirs.is_empty() {
            return Err(Error::InvalidInput(format!(
                "{} has no label sub-directories",
                dir.display()
            )));
        }

        let mut report = IngestReport::default();
        for label_dir in label_dirs {
            let Some(label) = dir_label(&label_dir) else {
                continue;
            };
            let mut images = image_files(&label_dir).await?;
            if images.len() > self.config.max_per_label {
                report.skipped += images.len() - self.config.max_per_label;
                images.truncate(self.config.max_per_label);
            }
            if images.is_empty() {
                warn!("No images for label '{}' in {}", label, label_dir.display());
                continue;
            }

            info!("Processing '{}' ({} images)", label, images.len());
            report.labels += 1;
            let before = report.uploaded;
            for chunk in images.chunks(self.config.batch_size.max(1)) {
                self.ingest_image_batch(chunk, &label, &mut report).await;
            }
            info!("'{}': uploaded {}", label, report.uploaded - before);
        }

        info!(
            "Image ingestion complete: {} labels, {} uploaded, {} failed",
            report.labels, report.uploaded, report.failed
        );
        Ok(report)
    }

    /// Ingest one image. The label defaults to the parent directory name.
    pub async fn ingest_image(&self, path: &Path, label: Option<String>) -> Result<IngestReport> {
        let label = match label {
            Some(l) => l.trim().to_lowercase(),
            None => path.parent().and_then(dir_label).ok_or_else(|| {
                Error::InvalidInput(format!("cannot derive a label for {}", path.display()))
            })?,
        };

        let mut report = IngestReport {
            labels: 1,
            ..Default::default()
        };
        self.ingest_image_batch(&[path.to_path_buf()], &label, &mut report)
            .await;
        if report.uploaded == 0 {
            return Err(Error::InvalidInput(format!(
                "failed to ingest {}",
                path.display()
            )));
        }
        Ok(report)
    }

    async fn ingest_image_batch(&self, paths: &[PathBuf], label: &str, report: &mut IngestReport) {
        let points = self
            .encode_files(paths, report)
            .await
            .into_iter()
            .map(|(source, vector)| VectorPoint::new(vector, label, source))
            .collect();
        self.upload(&self.search.config().image_collection, points, report)
            .await;
    }

    /// Read and encode image files, counting the ones that fail.
    ///
    /// Returns `(source, embedding)` for every file that encoded.
    async fn encode_files(
        &self,
        paths: &[PathBuf],
        report: &mut IngestReport,
    ) -> Vec<(String, Embedding)> {
        report.processed += paths.len();

        let mut sources = Vec::with_capacity(paths.len());
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    sources.push(path.display().to_string());
                    images.push(bytes);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }
        if images.is_empty() {
            return Vec::new();
        }

        let embedding = match self.search.embedding() {
            Ok(e) => e,
            Err(e) => {
                warn!("Cannot encode images: {}", e);
                report.failed += images.len();
                return Vec::new();
            }
        };

        // One bad file fails the whole model call; retry that batch one by one.
        let vectors = match embedding.embed_images(images.clone(), false).await {
            Ok(v) => v.into_iter().map(Some).collect::<Vec<_>>(),
            Err(e) => {
                debug!("Batch encode failed ({}), encoding individually", e);
                let mut out = Vec::with_capacity(images.len());
                for (image, source) in images.into_iter().zip(&sources) {
                    match embedding.embed_image(image, false).await {
                        Ok(v) => out.push(Some(v)),
                        Err(e) => {
                            warn!("Failed to encode {}: {}", source, e);
                            out.push(None);
                        }
                    }
                }
                out
            }
        };

        let mut encoded = Vec::with_capacity(vectors.len());
        for (vector, source) in vectors.into_iter().zip(sources) {
            match vector {
                Some(v) => encoded.push((source, v)),
                None => report.failed += 1,
            }
        }
        encoded
    }

    /// Ingest clips of pre-extracted frames into the appearance collection.
    ///
    /// Without `label` the layout is `dir/<label>/<clip>/<frame>`; with it,
    /// every sub-directory of `dir` is a clip of that label. The frames of a
    /// clip are averaged into one point that records how many were used.
    pub async fn ingest_clip_frames(
        &self,
        dir: &Path,
        label: Option<String>,
    ) -> Result<IngestReport> {
        let mut clips: Vec<(String, PathBuf)> = Vec::new();
        match label {
            Some(label) => {
                let label = label.trim().to_lowercase();
                for clip in sub_dirs(dir).await? {
                    clips.push((label.clone(), clip));
                }
            }
            None => {
                for label_dir in sub_dirs(dir).await? {
                    let Some(label) = dir_label(&label_dir) else {
                        continue;
                    };
                    for clip in sub_dirs(&label_dir).await? {
                        clips.push((label.clone(), clip));
                    }
                }
            }
        }
        if clips.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no clip directories under {}",
                dir.display()
            )));
        }

        let mut report = IngestReport::default();
        let mut labels: Vec<&str> = Vec::new();
        for (label, clip) in &clips {
            let mut frames = image_files(clip).await?;
            if frames.len() > self.config.max_per_label {
                report.skipped += frames.len() - self.config.max_per_label;
                frames.truncate(self.config.max_per_label);
            }
            if frames.is_empty() {
                warn!("No frames in clip {}", clip.display());
                continue;
            }

            let mut vectors = Vec::with_capacity(frames.len());
            for chunk in frames.chunks(self.config.batch_size.max(1)) {
                vectors.extend(
                    self.encode_files(chunk, &mut report)
                        .await
                        .into_iter()
                        .map(|(_, v)| v),
                );
            }
            let Some(mut mean) = mean_vector(&vectors) else {
                warn!("No frame of clip {} could be encoded", clip.display());
                continue;
            };
            if !l2_normalize(&mut mean) {
                warn!("Clip {} averaged to a zero vector", clip.display());
                report.failed += 1;
                continue;
            }

            debug!("Clip {} ('{}'): {} frames", clip.display(), label, vectors.len());
            let point = VectorPoint::new(mean, label.as_str(), clip.display().to_string())
                .with_frames(vectors.len() as u32);
            self.upload(&self.search.config().image_collection, vec![point], &mut report)
                .await;
            labels.push(label.as_str());
        }
        labels.sort_unstable();
        labels.dedup();
        report.labels = labels.len();

        info!(
            "Clip ingestion complete: {} clips, {} labels, {} uploaded, {} failed",
            clips.len(),
            report.labels,
            report.uploaded,
            report.failed
        );
        Ok(report)
    }

    /// Ingest landmark extractor JSON files found under `dir` (recursively).
    ///
    /// With `aggregate`, frames sharing a source file, augmentation and
    /// label are averaged into one point.
    pub async fn ingest_landmark_frames(&self, dir: &Path, aggregate: bool) -> Result<IngestReport> {
        let dim = self.search.config().landmark_dim;
        let files = json_files(dir).await?;
        if files.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no landmark JSON files under {}",
                dir.display()
            )));
        }

        let mut report = IngestReport::default();
        let mut frames: Vec<(LandmarkFrame, Vec<f32>)> = Vec::new();
        for file in &files {
            let parsed = tokio::fs::read_to_string(file)
                .await
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<FrameFile>(&raw).map_err(Error::from));
            let records = match parsed {
                Ok(FrameFile::One(frame)) => vec![frame],
                Ok(FrameFile::Many(frames)) => frames,
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            for frame in records {
                report.processed += 1;
                match frame.validated_vector(dim) {
                    Ok(v) if v.is_blank() => report.skipped += 1,
                    Ok(v) => frames.push((frame, v.into_inner())),
                    Err(e) => {
                        warn!("Skipping {}: {}", file.display(), e);
                        report.failed += 1;
                    }
                }
            }
        }

        let points: Vec<VectorPoint> = if aggregate {
            let mut groups: BTreeMap<(String, String, String), Vec<Vec<f32>>> = BTreeMap::new();
            for (frame, vector) in frames {
                groups
                    .entry((
                        frame.file,
                        frame.augmentation,
                        frame.label.trim().to_lowercase(),
                    ))
                    .or_default()
                    .push(vector);
            }
            groups
                .into_iter()
                .filter_map(|((file, augmentation, label), vectors)| {
                    let mean = mean_vector(&vectors)?;
                    Some(
                        VectorPoint::new(mean, label, format!("{file}:{augmentation}"))
                            .with_frames(vectors.len() as u32),
                    )
                })
                .collect()
        } else {
            frames
                .into_iter()
                .map(|(frame, vector)| {
                    let source = frame.source_key();
                    VectorPoint::new(vector, frame.label.trim().to_lowercase(), source)
                })
                .collect()
        };

        let mut labels: Vec<&str> = points.iter().map(|p| p.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        report.labels = labels.len();

        for chunk in points.chunks(LANDMARK_UPLOAD_CHUNK) {
            self.upload(
                &self.search.config().landmark_collection,
                chunk.to_vec(),
                &mut report,
            )
            .await;
        }

        info!(
            "Landmark ingestion complete: {} labels, {} uploaded, {} failed, {} skipped",
            report.labels, report.uploaded, report.failed, report.skipped
        );
        Ok(report)
    }

    async fn upload(&self, collection: &str, points: Vec<VectorPoint>, report: &mut IngestReport) {
        if points.is_empty() {
            return;
        }
        let count = points.len();
        match self.search.store().upsert(collection, points).await {
            Ok(n) => {
                report.uploaded += n;
                telemetry::record_ingested(collection, n);
            }
            Err(e) => {
                warn!("Upload to {} failed: {}", collection, e);
                report.failed += count;
            }
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn dir_label(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
}

/// Entries of `dir` as `(path, is_dir)`, sorted by path. Symlinks are followed.
async fn list_dir(dir: &Path) -> Result<Vec<(PathBuf, bool)>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let is_dir = tokio::fs::metadata(&path).await?.is_dir();
        entries.push((path, is_dir));
    }
    entries.sort();
    Ok(entries)
}

async fn sub_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_dir(dir)
        .await?
        .into_iter()
        .filter_map(|(path, is_dir)| is_dir.then_some(path))
        .collect())
}

async fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(list_dir(dir)
        .await?
        .into_iter()
        .filter_map(|(path, is_dir)| (!is_dir && has_image_extension(&path)).then_some(path))
        .collect())
}

/// All `.json` files under `dir`, recursively, sorted.
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(next) = pending.pop() {
        for (path, is_dir) in list_dir(&next).await? {
            if is_dir {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{
        point_id, EmbeddingService, HybridSearchConfig, ImageEncoder, MemoryStore,
        PreprocessOptions, VectorStore,
    };
    use image::{DynamicImage, ImageFormat, RgbImage};
    use tempfile::tempdir;

    struct Fixed;

    impl ImageEncoder for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimension(&self) -> usize {
            2
        }
        fn encode_batch(&self, images: &[Vec<u8>]) -> Result<Vec<Embedding>> {
            Ok(images.iter().map(|_| vec![0.0, 1.0]).collect())
        }
    }

    fn write_png(path: &Path) {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 6, image::Rgb([10, 20, 30])))
            .save_with_format(path, ImageFormat::Png)
            .unwrap();
    }

    fn ingestor(store: Arc<MemoryStore>, config: IngestConfig) -> Ingestor {
        let embedding = EmbeddingService::with_encoder(Arc::new(Fixed), PreprocessOptions::default());
        let search_config = HybridSearchConfig {
            landmark_dim: 3,
            ..HybridSearchConfig::default()
        };
        let search = HybridSearch::new(Some(embedding), store, search_config);
        Ingestor::new(Arc::new(search), config)
    }

    #[tokio::test]
    async fn test_image_dir_labels_and_limits() {
        let dir = tempdir().unwrap();
        let hello = dir.path().join("Hello");
        std::fs::create_dir(&hello).unwrap();
        for i in 0..3 {
            write_png(&hello.join(format!("{i}.png")));
        }
        std::fs::write(hello.join("notes.txt"), "x").unwrap();
        std::fs::write(hello.join("broken.jpg"), "not an image").unwrap();

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(
            store.clone(),
            IngestConfig {
                batch_size: 2,
                max_per_label: 10,
            },
        );
        ingestor.init_collections(2).await.unwrap();

        let report = ingestor.ingest_image_dir(dir.path()).await.unwrap();
        assert_eq!(report.labels, 1);
        assert_eq!(report.processed, 4);
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.failed, 1);

        let hits = store.search("clip_videos", vec![0.0, 1.0], 10, None).await.unwrap();
        assert!(hits.iter().all(|h| h.label == "hello"));
    }

    #[tokio::test]
    async fn test_image_dir_cap_per_label() {
        let dir = tempdir().unwrap();
        let label = dir.path().join("yes");
        std::fs::create_dir(&label).unwrap();
        for i in 0..5 {
            write_png(&label.join(format!("{i}.png")));
        }

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(
            store.clone(),
            IngestConfig {
                batch_size: 16,
                max_per_label: 2,
            },
        );
        ingestor.init_collections(2).await.unwrap();
        let report = ingestor.ingest_image_dir(dir.path()).await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn test_single_image_label_from_parent() {
        let dir = tempdir().unwrap();
        let label = dir.path().join("Thanks");
        std::fs::create_dir(&label).unwrap();
        let file = label.join("a.png");
        write_png(&file);

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), IngestConfig::default());
        ingestor.init_collections(2).await.unwrap();
        ingestor.ingest_image(&file, None).await.unwrap();

        let hits = store.search("clip_videos", vec![0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].label, "thanks");
    }

    #[tokio::test]
    async fn test_clip_frames_average_into_one_point() {
        let dir = tempdir().unwrap();
        let hello = dir.path().join("Hello");
        let clip_a = hello.join("clip_a");
        let clip_b = hello.join("clip_b");
        std::fs::create_dir_all(&clip_a).unwrap();
        std::fs::create_dir_all(&clip_b).unwrap();
        std::fs::create_dir_all(hello.join("empty")).unwrap();
        for i in 0..3 {
            write_png(&clip_a.join(format!("{i:04}.png")));
        }
        std::fs::write(clip_a.join("broken.jpg"), "not an image").unwrap();
        write_png(&clip_b.join("0000.png"));
        write_png(&hello.join("loose.png"));

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(
            store.clone(),
            IngestConfig {
                batch_size: 2,
                max_per_label: 100,
            },
        );
        ingestor.init_collections(2).await.unwrap();

        let report = ingestor.ingest_clip_frames(dir.path(), None).await.unwrap();
        assert_eq!(report.labels, 1);
        assert_eq!(report.processed, 5);
        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 2);
        assert_eq!(store.count("clip_videos").await.unwrap(), 2);

        let source = clip_a.display().to_string();
        let point = store
            .point("clip_videos", &point_id(&source, "hello"))
            .await
            .unwrap();
        assert_eq!(point.label, "hello");
        assert_eq!(point.frames, 3);
        assert!((point.vector[1] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_clip_frames_with_explicit_label() {
        let dir = tempdir().unwrap();
        for clip in ["take1", "take2"] {
            let clip = dir.path().join(clip);
            std::fs::create_dir(&clip).unwrap();
            write_png(&clip.join("0000.png"));
        }

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), IngestConfig::default());
        ingestor.init_collections(2).await.unwrap();

        let report = ingestor
            .ingest_clip_frames(dir.path(), Some("Wave ".to_string()))
            .await
            .unwrap();
        assert_eq!(report.labels, 1);
        assert_eq!(report.uploaded, 2);

        let hits = store.search("clip_videos", vec![0.0, 1.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.label == "wave"));

        let empty = tempdir().unwrap();
        assert!(ingestor.ingest_clip_frames(empty.path(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_landmark_frames_aggregate() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("hello");
        std::fs::create_dir(&video).unwrap();
        for (i, v) in [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]].iter().enumerate() {
            let frame = serde_json::json!({
                "file": "hello.mp4", "frame": i, "timestamp": i as f64 * 0.1,
                "label": "Hello", "vector": v, "dimension": 3, "augmentation": "original"
            });
            std::fs::write(video.join(format!("frame_{i:04}.json")), frame.to_string()).unwrap();
        }
        let blank = serde_json::json!({
            "file": "hello.mp4", "frame": 9, "label": "hello", "vector": [0.0, 0.0, 0.0]
        });
        std::fs::write(video.join("frame_0009.json"), blank.to_string()).unwrap();
        std::fs::write(video.join("frame_0010.json"), r#"{"file": "x"}"#).unwrap();

        let store = Arc::new(MemoryStore::new());
        let ingestor = ingestor(store.clone(), IngestConfig::default());
        ingestor.init_collections(2).await.unwrap();

        let report = ingestor.ingest_landmark_frames(dir.path(), true).await.unwrap();
        assert_eq!(report.labels, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);

        let hits = store
            .search("hand_landmarks", vec![1.0, 1.0, 0.0], 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-5);

        let report = ingestor.ingest_landmark_frames(dir.path(), false).await.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(store.count("hand_landmarks").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_directory_walk_is_sorted_and_recursive() {
        let dir = tempdir().unwrap();
        let deep = dir.path().join("b").join("c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("2.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b").join("1.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("z.PNG"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = json_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.json"),
                PathBuf::from("b/1.json"),
                PathBuf::from("b/c/2.json"),
            ]
        );

        assert_eq!(sub_dirs(dir.path()).await.unwrap(), vec![dir.path().join("b")]);
        assert_eq!(image_files(dir.path()).await.unwrap(), vec![dir.path().join("z.PNG")]);
    }

    #[tokio::test]
    async fn test_empty_dirs_are_errors() {
        let dir = tempdir().unwrap();
        let ingestor = ingestor(Arc::new(MemoryStore::new()), IngestConfig::default());
        assert!(ingestor.ingest_image_dir(dir.path()).await.is_err());
        assert!(ingestor.ingest_landmark_frames(dir.path(), false).await.is_err());
    }
}
