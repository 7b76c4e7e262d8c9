pub mod algorithms;
pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use models::*;

use algorithms::VectorDimension;
use anyhow::Result;
use services::cache::{InMemoryPickCache, PickCache, RedisPickCache};
use services::embedding::{verify_dimension, EmbeddingProvider, HttpEmbeddingProvider};
use services::entitlement::EntitlementGate;
use services::feedback::FeedbackLearner;
use services::kafka::KafkaProducer;
use services::preference::PreferenceVectorBuilder;
use services::recommendation::RetrievalRanker;
use services::refiner::ConversationalRefiner;
use services::storage::postgres::{self, PgStore, PgVectorStore};
use services::storage::{FeedbackRepository, InMemoryStore, LibraryRepository, PreferenceRepository};
use services::sync::{HttpLibrarySource, LibrarySource, LibrarySync};
use services::vector_db::{EmbeddingRepository, InMemoryVectorStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub library: Arc<dyn LibraryRepository>,
    pub preferences: Arc<dyn PreferenceRepository>,
    pub preference_builder: Arc<PreferenceVectorBuilder>,
    pub feedback: Arc<FeedbackLearner>,
    pub ranker: Arc<RetrievalRanker>,
    pub refiner: Arc<ConversationalRefiner>,
    pub sync: Arc<LibrarySync>,
    pub library_source: Option<Arc<dyn LibrarySource>>,
}

/// Backends every service is assembled from.
struct Backends {
    embeddings: Arc<dyn EmbeddingRepository>,
    library: Arc<dyn LibraryRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    feedback: Arc<dyn FeedbackRepository>,
    entitlements: Arc<dyn EntitlementGate>,
    provider: Arc<dyn EmbeddingProvider>,
    picks: Arc<dyn PickCache>,
    producer: Option<Arc<KafkaProducer>>,
}

impl AppState {
    /// Production wiring: Postgres with pgvector, Redis, the HTTP embedding
    /// provider and (optionally) Kafka. Fails fast on dimension mismatch.
    pub async fn new(config: Config) -> Result<Self> {
        let dimension = VectorDimension::new(config.vector.dimension)?;

        let pool = postgres::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            config.postgres.run_migrations,
        )
        .await?;
        let store = Arc::new(PgStore::new(pool.clone()));
        let vectors = Arc::new(PgVectorStore::new(pool, dimension));
        vectors.verify_stored_dimension().await?;

        let provider = Arc::new(HttpEmbeddingProvider::new(&config.embedding, dimension)?);
        verify_dimension(provider.as_ref(), dimension).await?;

        let redis_client = Arc::new(redis::Client::open(config.redis.url.as_str())?);
        let picks = Arc::new(RedisPickCache::new(redis_client, config.redis.key_prefix.clone()));

        let producer = if config.kafka.enabled {
            Some(Arc::new(KafkaProducer::new(&config.kafka)?))
        } else {
            None
        };

        info!("Connected backends, vector dimension {}", dimension.get());
        Self::assemble(
            config,
            Backends {
                embeddings: vectors,
                library: store.clone(),
                preferences: store.clone(),
                feedback: store.clone(),
                entitlements: store,
                provider,
                picks,
                producer,
            },
        )
    }

    /// Process-local wiring for development and tests.
    pub fn in_memory(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        entitlements: Arc<dyn EntitlementGate>,
    ) -> Result<Self> {
        let dimension = VectorDimension::new(config.vector.dimension)?;
        if provider.dimension() != dimension {
            return Err(EngineError::DimensionMismatch {
                expected: dimension.get(),
                actual: provider.dimension().get(),
            }
            .into());
        }

        let store = Arc::new(InMemoryStore::new());
        Self::assemble(
            config,
            Backends {
                embeddings: Arc::new(InMemoryVectorStore::new(dimension)),
                library: store.clone(),
                preferences: store.clone(),
                feedback: store,
                entitlements,
                provider,
                picks: Arc::new(InMemoryPickCache::new()),
                producer: None,
            },
        )
    }

    fn assemble(config: Config, backends: Backends) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let preference_builder = Arc::new(PreferenceVectorBuilder::new(
            backends.library.clone(),
            backends.embeddings.clone(),
            backends.preferences.clone(),
            &config.preference,
        ));

        let mut feedback = FeedbackLearner::new(
            backends.feedback,
            backends.preferences.clone(),
            backends.embeddings.clone(),
            backends.entitlements.clone(),
            config.feedback.clone(),
        );
        if let Some(producer) = backends.producer {
            feedback = feedback.with_publisher(producer);
        }

        let ranker = Arc::new(RetrievalRanker::new(
            backends.embeddings.clone(),
            backends.preferences.clone(),
            backends.library.clone(),
            backends.entitlements,
            backends.provider,
            backends.picks,
            config.ranking.clone(),
        ));
        let refiner = Arc::new(ConversationalRefiner::new(ranker.clone(), config.refiner.clone()));
        let sync = Arc::new(LibrarySync::new(
            backends.library.clone(),
            preference_builder.clone(),
            config.sync.clone(),
        ));

        let library_source = match &config.sync.source_url {
            Some(url) => {
                let timeout = Duration::from_millis(config.sync.fetch_timeout_ms);
                let source: Arc<dyn LibrarySource> = Arc::new(HttpLibrarySource::new(url.clone(), timeout)?);
                Some(source)
            }
            None => None,
        };

        Ok(Self {
            config,
            embeddings: backends.embeddings,
            library: backends.library,
            preferences: backends.preferences,
            preference_builder,
            feedback: Arc::new(feedback),
            ranker,
            refiner,
            sync,
            library_source,
        })
    }
}

pub async fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
