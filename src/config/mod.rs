use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub vector: VectorConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub embedding: EmbeddingConfig,
    pub preference: PreferenceConfig,
    pub feedback: FeedbackConfig,
    pub ranking: RankingConfig,
    pub refiner: RefinerConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Output size of the embedding model; fixed per deployment.
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub enabled: bool,
    pub brokers: String,
    pub sync_topic: String,
    pub feedback_topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceConfig {
    pub min_playtime_hours: f64,
    pub half_life_months: f64,
    pub use_quality_weight: bool,
    /// Maximum deviation of the completion multiplier from 1.0.
    pub quality_strength: f64,
    pub diversify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub strong_like: f32,
    pub like: f32,
    pub dislike: f32,
    pub strong_dislike: f32,
    /// Recompute the learned vector from remaining history on delete.
    pub reverse_on_delete: bool,
}

impl FeedbackConfig {
    pub fn magnitude(&self, label: crate::models::FeedbackLabel) -> f32 {
        use crate::models::FeedbackLabel::*;
        match label {
            StrongLike => self.strong_like,
            Like => self.like,
            Dislike => self.dislike,
            StrongDislike => self.strong_dislike,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    pub default_limit: usize,
    pub max_results: usize,
    pub candidate_multiplier: usize,
    pub max_candidates: usize,
    pub query_timeout_ms: u64,
    pub learned_blend: f32,
    pub unplayed_ceiling_minutes: u32,
    pub unplayed_similarity_floor: f32,
    pub daily_pick_pool: usize,
    /// UTC hour at which the daily pick rolls over.
    pub daily_rollover_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    pub max_rounds: u8,
    pub session_ttl_secs: i64,
    pub max_questions: usize,
    pub max_options: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the upstream library service; pull sync is disabled without it.
    pub source_url: Option<String>,
    pub fetch_timeout_ms: u64,
    pub concurrency: usize,
    pub fetch_completion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: num_cpus::get(),
            },
            vector: VectorConfig {
                dimension: 384,
            },
            postgres: PostgresConfig {
                url: "postgresql://localhost:5432/taste_engine".to_string(),
                max_connections: 10,
                run_migrations: true,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                key_prefix: "taste".to_string(),
            },
            kafka: KafkaConfig {
                enabled: false,
                brokers: "localhost:9092".to_string(),
                sync_topic: "library_synced".to_string(),
                feedback_topic: "feedback_events".to_string(),
                group_id: "taste_engine".to_string(),
                auto_offset_reset: "earliest".to_string(),
            },
            embedding: EmbeddingConfig {
                endpoint: "http://localhost:8081/v1/embeddings".to_string(),
                model: "all-minilm-l6-v2".to_string(),
                api_key: None,
                timeout_ms: 5_000,
            },
            preference: PreferenceConfig {
                min_playtime_hours: 0.5,
                half_life_months: 24.0,
                use_quality_weight: true,
                quality_strength: 0.25,
                diversify: false,
            },
            feedback: FeedbackConfig {
                strong_like: 0.25,
                like: 0.10,
                dislike: -0.10,
                strong_dislike: -0.25,
                reverse_on_delete: false,
            },
            ranking: RankingConfig {
                default_limit: 20,
                max_results: 100,
                candidate_multiplier: 4,
                max_candidates: 500,
                query_timeout_ms: 2_000,
                learned_blend: 0.5,
                unplayed_ceiling_minutes: 120,
                unplayed_similarity_floor: 0.80,
                daily_pick_pool: 20,
                daily_rollover_hour: 0,
            },
            refiner: RefinerConfig {
                max_rounds: 3,
                session_ttl_secs: 1_800,
                max_questions: 3,
                max_options: 4,
            },
            sync: SyncConfig {
                source_url: None,
                fetch_timeout_ms: 3_000,
                concurrency: 8,
                fetch_completion: true,
            },
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TASTE").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fail = |msg: &str| -> EngineResult<()> {
            Err(EngineError::Validation(format!("config: {msg}")))
        };

        if self.vector.dimension == 0 {
            return fail("vector.dimension must be positive");
        }
        if !(self.preference.half_life_months > 0.0) {
            return fail("preference.half_life_months must be positive");
        }
        if self.preference.min_playtime_hours < 0.0 {
            return fail("preference.min_playtime_hours must not be negative");
        }
        if !(0.0..1.0).contains(&self.preference.quality_strength) {
            return fail("preference.quality_strength must lie in [0, 1)");
        }
        if !(0.0..=1.0).contains(&self.ranking.learned_blend) {
            return fail("ranking.learned_blend must lie in [0, 1]");
        }
        if self.ranking.max_results == 0 || self.ranking.default_limit > self.ranking.max_results {
            return fail("ranking.default_limit must be within 1..=max_results");
        }
        if self.ranking.candidate_multiplier == 0 || self.ranking.daily_pick_pool == 0 {
            return fail("ranking candidate sizes must be positive");
        }
        if !(0.0..=1.0).contains(&self.ranking.unplayed_similarity_floor) {
            return fail("ranking.unplayed_similarity_floor must lie in [0, 1]");
        }
        if self.ranking.daily_rollover_hour > 23 {
            return fail("ranking.daily_rollover_hour must be an hour of the day");
        }
        if self.refiner.max_rounds == 0 {
            return fail("refiner.max_rounds must be positive");
        }
        if self.sync.concurrency == 0 {
            return fail("sync.concurrency must be positive");
        }
        let f = &self.feedback;
        if !(f.strong_like > f.like && f.like > 0.0 && 0.0 > f.dislike && f.dislike > f.strong_dislike) {
            return fail("feedback magnitudes must satisfy strong_like > like > 0 > dislike > strong_dislike");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_misordered_feedback_magnitudes() {
        let mut config = Config::default();
        config.feedback.like = 0.5;
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn rejects_zero_half_life() {
        let mut config = Config::default();
        config.preference.half_life_months = 0.0;
        assert!(config.validate().is_err());
    }
}
