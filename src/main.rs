//! SignLens CLI
//!
//! Command-line interface for running the recognition service and loading
//! reference data.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signlens::search::EMBEDDING_DIM;
use signlens::{
    ApiConfig, ApiServer, AppState, EmbeddingService, EmbeddingServiceConfig, Error,
    HealthResponse, HybridSearch, HybridSearchConfig, IngestConfig, IngestReport, Ingestor,
    LiveSessions, MemoryStore, MetricsService, NodeConfig, QdrantStore, RateLimitService, Result,
    VectorStore,
};

#[derive(Parser)]
#[command(name = "signlens")]
#[command(author, version, about = "Sign recognition service", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Start the HTTP API
    Start {
        /// HTTP API listen address (overrides the config file)
        #[arg(long)]
        api_addr: Option<String>,

        /// Use an in-process vector store instead of Qdrant
        #[arg(long)]
        memory_store: bool,

        /// Do not load the image model (landmark recognition only)
        #[arg(long)]
        no_model: bool,
    },

    /// Create the appearance and landmark collections
    InitCollections,

    /// Encode a directory of labelled images (or one image) into the appearance collection
    IngestImages {
        /// Directory with one sub-directory per label, or a single image
        #[arg(short, long)]
        input: PathBuf,

        /// Label for a single image (defaults to its parent directory)
        #[arg(short, long)]
        label: Option<String>,

        /// Images per model call
        #[arg(long, default_value = "16")]
        batch_size: usize,
    },

    /// Encode clips of extracted frames, one averaged point per clip
    IngestClips {
        /// Directory laid out as <label>/<clip>/<frame>, or <clip>/<frame> with --label
        #[arg(short, long)]
        input: PathBuf,

        /// Label for every clip under the input directory
        #[arg(short, long)]
        label: Option<String>,

        /// Frames per model call
        #[arg(long, default_value = "16")]
        batch_size: usize,
    },

    /// Upload landmark extractor output into the landmark collection
    IngestLandmarks {
        /// Directory of extractor JSON files
        #[arg(short, long)]
        input: PathBuf,

        /// Average the frames of each source file into one vector
        #[arg(long)]
        aggregate: bool,
    },

    /// Check service health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8000")]
        endpoint: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: &str) -> Result<NodeConfig> {
    let mut config = if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        NodeConfig::load(path)?
    } else {
        info!("Using default configuration");
        NodeConfig::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn open_store(config: &NodeConfig, memory: bool) -> Result<Arc<dyn VectorStore>> {
    if memory {
        warn!("Using in-memory vector store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }
    Ok(Arc::new(QdrantStore::connect(&config.qdrant)?))
}

async fn load_model(config: &NodeConfig) -> Result<EmbeddingService> {
    let service_config = EmbeddingServiceConfig::from_config(&config.embedding)?;
    info!(
        "Loading image model {} (downloads on first use)...",
        service_config.model.as_str()
    );
    tokio::task::spawn_blocking(move || EmbeddingService::new(service_config))
        .await
        .map_err(|e| Error::Embedding(format!("model loader failed: {}", e)))?
}

/// Ingestor with the image model loaded and both collections present.
async fn image_ingestor(config: &NodeConfig, batch_size: usize) -> Result<Ingestor> {
    let store = open_store(config, false)?;
    let embedding = load_model(config).await?;
    let dim = embedding.dimension();
    let search = Arc::new(HybridSearch::new(
        Some(embedding),
        store,
        HybridSearchConfig::from_node(config),
    ));
    let ingestor = Ingestor::new(
        search,
        IngestConfig {
            batch_size,
            ..IngestConfig::default()
        },
    );
    ingestor.init_collections(dim).await?;
    Ok(ingestor)
}

fn log_report(report: &IngestReport) {
    info!(
        "Done: {} labels, {} processed, {} uploaded, {} failed, {} skipped",
        report.labels, report.processed, report.uploaded, report.failed, report.skipped
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Initializing new configuration at: {}", output);
            let config = NodeConfig::default();
            config.save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start {
            api_addr,
            memory_store,
            no_model,
        } => {
            info!("Starting SignLens...");

            // 1. Configuration
            let config = load_config(&cli.config)?;
            let mut api_config = ApiConfig::from(&config.api);
            if let Some(addr) = api_addr {
                api_config.listen_address = addr;
            }
            info!("API address: {}", api_config.listen_address);
            info!("Qdrant: {}", config.qdrant.url);

            // 2. Vector store
            let store = open_store(&config, memory_store)?;

            // 3. Image model; without it only landmark recognition works
            let embedding = if no_model {
                warn!("Image model disabled, image search will return 503");
                None
            } else {
                match load_model(&config).await {
                    Ok(service) => {
                        info!("Image model {} loaded", service.model_name());
                        Some(service)
                    }
                    Err(e) => {
                        warn!("Failed to load image model: {}", e);
                        warn!("Image search will be disabled");
                        None
                    }
                }
            };

            if memory_store {
                let dim = embedding
                    .as_ref()
                    .map(|e| e.dimension())
                    .unwrap_or(EMBEDDING_DIM);
                store
                    .ensure_collection(&config.qdrant.image_collection, dim)
                    .await?;
                store
                    .ensure_collection(
                        &config.qdrant.landmark_collection,
                        config.embedding.landmark_dim,
                    )
                    .await?;
            }

            let search = Arc::new(HybridSearch::new(
                embedding,
                store,
                HybridSearchConfig::from_node(&config),
            ));
            if !search.probe().await {
                warn!("Vector store not ready; live sessions will report offline");
            }

            // 4. Shared state
            let live = Arc::new(LiveSessions::new(
                Arc::clone(&search),
                config.live.clone(),
            ));
            let metrics = if config.metrics.enabled {
                MetricsService::install()
            } else {
                MetricsService::disabled()
            };
            let app_state = AppState {
                search,
                live: Arc::clone(&live),
                start_time: Instant::now(),
                rate_limiter: Arc::new(RateLimitService::new(&config.rate_limit)),
                metrics: Arc::new(metrics),
            };

            // 5. HTTP API in background
            let listen = api_config.listen_address.clone();
            let api_server = ApiServer::with_state(api_config, app_state);
            let mut server = tokio::spawn(async move { api_server.run(&listen).await });

            info!("SignLens started successfully");
            info!("Press Ctrl+C to stop");

            tokio::select! {
                result = &mut server => {
                    match result {
                        Ok(Err(e)) => error!("API server error: {}", e),
                        Err(e) => error!("API server task failed: {}", e),
                        Ok(Ok(())) => {}
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    server.abort();
                }
            }

            live.close_all().await;
            info!("SignLens stopped");
        }

        Commands::InitCollections => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config, false)?;
            let dim = EmbeddingServiceConfig::from_config(&config.embedding)?
                .model
                .dimension();
            let search = Arc::new(HybridSearch::new(
                None,
                store,
                HybridSearchConfig::from_node(&config),
            ));
            let ingestor = Ingestor::new(search, IngestConfig::default());
            let (image, landmark) = ingestor.init_collections(dim).await?;
            info!(
                "{}: {}, {}: {}",
                config.qdrant.image_collection,
                if image { "created" } else { "exists" },
                config.qdrant.landmark_collection,
                if landmark { "created" } else { "exists" },
            );
        }

        Commands::IngestImages {
            input,
            label,
            batch_size,
        } => {
            let config = load_config(&cli.config)?;
            let ingestor = image_ingestor(&config, batch_size).await?;

            let report = if input.is_dir() {
                ingestor.ingest_image_dir(&input).await?
            } else {
                ingestor.ingest_image(&input, label).await?
            };
            log_report(&report);
        }

        Commands::IngestClips {
            input,
            label,
            batch_size,
        } => {
            let config = load_config(&cli.config)?;
            let ingestor = image_ingestor(&config, batch_size).await?;
            let report = ingestor.ingest_clip_frames(&input, label).await?;
            log_report(&report);
        }

        Commands::IngestLandmarks { input, aggregate } => {
            let config = load_config(&cli.config)?;
            let store = open_store(&config, false)?;
            let search = Arc::new(HybridSearch::new(
                None,
                store,
                HybridSearchConfig::from_node(&config),
            ));
            let ingestor = Ingestor::new(search, IngestConfig::default());
            let report = ingestor.ingest_landmark_frames(&input, aggregate).await?;
            log_report(&report);
        }

        Commands::Health { endpoint } => {
            info!("Checking service health at: {}", endpoint);

            let health_url = format!("{}/health", endpoint.trim_end_matches('/'));

            match tokio::time::timeout(std::time::Duration::from_secs(5), check_health(&health_url))
                .await
            {
                Ok(Ok(response)) => {
                    info!("Status: {}", response.status);
                    info!("Version: {}", response.version);
                    info!(
                        "Model: {}",
                        response.model.as_deref().unwrap_or("not loaded")
                    );
                    info!("Vector store available: {}", response.store_available);
                    for collection in &response.collections {
                        match collection.points {
                            Some(points) => info!("  {}: {} points", collection.name, points),
                            None => info!("  {}: unavailable", collection.name),
                        }
                    }
                    info!("Live sessions: {}", response.live_sessions);
                    info!("Uptime: {} seconds", response.uptime);
                }
                Ok(Err(e)) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
                Err(_) => {
                    error!("Health check timed out");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Perform a health check against the API endpoint.
async fn check_health(url: &str) -> Result<HealthResponse> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let url = url.trim_start_matches("http://");
    let (host_port, path) = url
        .split_once('/')
        .map(|(h, p)| (h, format!("/{}", p)))
        .unwrap_or((url, "/health".to_string()));

    let mut stream = TcpStream::connect(host_port)
        .await
        .map_err(|e| Error::Api(format!("Connection failed: {}", e)))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host_port
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::Api(format!("Write failed: {}", e)))?;

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .map_err(|e| Error::Api(format!("Read failed: {}", e)))?;

    let response_str = String::from_utf8_lossy(&response);

    let body = response_str
        .split("\r\n\r\n")
        .nth(1)
        .ok_or_else(|| Error::Api("Invalid HTTP response".to_string()))?;

    serde_json::from_str(body).map_err(|e| Error::Api(format!("JSON parse error: {}", e)))
}
