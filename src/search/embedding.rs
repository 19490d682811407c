//! Appearance embeddings.
//!
//! Inference is CPU bound and synchronous; [`EmbeddingService`] moves it onto
//! the blocking pool so request handlers and live workers stay responsive.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use tracing::{debug, info};

use super::preprocess::{preprocess_image, PreprocessOptions};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// A dense vector produced by the image model.
pub type Embedding = Vec<f32>;

/// Something that turns (preprocessed) image bytes into embeddings.
pub trait ImageEncoder: Send + Sync {
    /// Model identifier
    fn model_name(&self) -> &str;

    /// Output dimension
    fn dimension(&self) -> usize;

    /// Encode a batch of encoded images (PNG/JPEG bytes). One embedding per input.
    fn encode_batch(&self, images: &[Vec<u8>]) -> Result<Vec<Embedding>>;
}

/// Supported image models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageModel {
    ClipVitB32,
    Resnet50,
    UnicomVitB16,
    UnicomVitB32,
    NomicEmbedVisionV15,
}

impl ImageModel {
    pub const ALL: [ImageModel; 5] = [
        Self::ClipVitB32,
        Self::Resnet50,
        Self::UnicomVitB16,
        Self::UnicomVitB32,
        Self::NomicEmbedVisionV15,
    ];

    /// Parse a config identifier such as `clip-vit-b-32`.
    pub fn parse(name: &str) -> Result<Self> {
        let normalized = name.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unknown image model '{}', expected one of: {}",
                    name,
                    Self::ALL.map(|m| m.as_str()).join(", ")
                ))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClipVitB32 => "clip-vit-b-32",
            Self::Resnet50 => "resnet50",
            Self::UnicomVitB16 => "unicom-vit-b-16",
            Self::UnicomVitB32 => "unicom-vit-b-32",
            Self::NomicEmbedVisionV15 => "nomic-embed-vision-v1.5",
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::ClipVitB32 | Self::UnicomVitB32 => 512,
            Self::UnicomVitB16 | Self::NomicEmbedVisionV15 => 768,
            Self::Resnet50 => 2048,
        }
    }

    fn to_fastembed(self) -> ImageEmbeddingModel {
        match self {
            Self::ClipVitB32 => ImageEmbeddingModel::ClipVitB32,
            Self::Resnet50 => ImageEmbeddingModel::Resnet50,
            Self::UnicomVitB16 => ImageEmbeddingModel::UnicomVitB16,
            Self::UnicomVitB32 => ImageEmbeddingModel::UnicomVitB32,
            Self::NomicEmbedVisionV15 => ImageEmbeddingModel::NomicEmbedVisionV15,
        }
    }
}

/// Configuration for [`EmbeddingService`].
#[derive(Debug, Clone)]
pub struct EmbeddingServiceConfig {
    pub model: ImageModel,
    pub cache_dir: Option<PathBuf>,
    pub show_download_progress: bool,
    pub preprocess: PreprocessOptions,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            model: ImageModel::ClipVitB32,
            cache_dir: None,
            show_download_progress: true,
            preprocess: PreprocessOptions::default(),
        }
    }
}

impl EmbeddingServiceConfig {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: ImageModel::parse(&config.model)?,
            cache_dir: config.cache_dir.as_ref().map(PathBuf::from),
            show_download_progress: config.show_download_progress,
            preprocess: PreprocessOptions {
                mirror: false,
                crop_fraction: config.crop_fraction,
                equalize: config.equalize,
            },
        })
    }
}

/// fastembed-backed encoder.
pub struct FastEmbedEncoder {
    model: Mutex<ImageEmbedding>,
    kind: ImageModel,
}

impl FastEmbedEncoder {
    /// Load the model, downloading it on first use.
    pub fn new(config: &EmbeddingServiceConfig) -> Result<Self> {
        let mut options = ImageInitOptions::new(config.model.to_fastembed())
            .with_show_download_progress(config.show_download_progress);
        if let Some(dir) = &config.cache_dir {
            options = options.with_cache_dir(dir.clone());
        }

        let model = ImageEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("failed to load {}: {}", config.model.as_str(), e)))?;
        info!("Loaded image model {}", config.model.as_str());

        Ok(Self {
            model: Mutex::new(model),
            kind: config.model,
        })
    }
}

impl ImageEncoder for FastEmbedEncoder {
    fn model_name(&self) -> &str {
        self.kind.as_str()
    }

    fn dimension(&self) -> usize {
        self.kind.dimension()
    }

    fn encode_batch(&self, images: &[Vec<u8>]) -> Result<Vec<Embedding>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&[u8]> = images.iter().map(Vec::as_slice).collect();
        let model = self
            .model
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".to_string()))?;
        model
            .embed_bytes(&refs, None)
            .map_err(|e| Error::Embedding(e.to_string()))
    }
}

/// Normalise `v` to unit length in place. Returns `false` for a zero vector.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON || !norm.is_finite() {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

/// Preprocessing + inference + normalisation.
#[derive(Clone)]
pub struct EmbeddingService {
    encoder: Arc<dyn ImageEncoder>,
    preprocess: PreprocessOptions,
}

impl EmbeddingService {
    /// Load the configured fastembed model. Blocks while the model downloads.
    pub fn new(config: EmbeddingServiceConfig) -> Result<Self> {
        let encoder = FastEmbedEncoder::new(&config)?;
        Ok(Self::with_encoder(Arc::new(encoder), config.preprocess))
    }

    /// Wrap an arbitrary encoder.
    pub fn with_encoder(encoder: Arc<dyn ImageEncoder>, preprocess: PreprocessOptions) -> Self {
        Self {
            encoder,
            preprocess,
        }
    }

    pub fn model_name(&self) -> &str {
        self.encoder.model_name()
    }

    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    /// Embed one image.
    pub async fn embed_image(&self, image: Vec<u8>, mirror: bool) -> Result<Embedding> {
        self.embed_images(vec![image], mirror)
            .await?
            .pop()
            .ok_or_else(|| Error::Embedding("model returned no embedding".to_string()))
    }

    /// Embed a batch of images, returning unit-length vectors in input order.
    pub async fn embed_images(&self, images: Vec<Vec<u8>>, mirror: bool) -> Result<Vec<Embedding>> {
        let encoder = Arc::clone(&self.encoder);
        let options = self.preprocess.with_mirror(mirror);
        let count = images.len();

        let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Embedding>> {
            let prepared = images
                .iter()
                .map(|bytes| preprocess_image(bytes, &options))
                .collect::<Result<Vec<_>>>()?;
            encoder.encode_batch(&prepared)
        })
        .await
        .map_err(|e| Error::Embedding(format!("encoder task failed: {}", e)))??;

        if embeddings.len() != count {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, model returned {}",
                count,
                embeddings.len()
            )));
        }

        debug!(count, "encoded images");
        Ok(embeddings
            .into_iter()
            .map(|mut e| {
                l2_normalize(&mut e);
                e
            })
            .collect())
    }
}
