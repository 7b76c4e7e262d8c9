use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{BuildReport, ItemId, OwnedItemSignal, UserId};
use crate::services::preference::PreferenceVectorBuilder;
use crate::services::storage::LibraryRepository;
use crate::utils::validation::validate_signals;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upstream catalog of what a user owns.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    async fn owned_items(&self, user_id: UserId) -> EngineResult<Vec<OwnedItemSignal>>;

    /// Achievement completion in 0..=1, if the item exposes any.
    async fn completion_ratio(&self, user_id: UserId, item_id: ItemId) -> EngineResult<Option<f32>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub owned_items: usize,
    pub completion_fetched: usize,
    pub completion_failed: usize,
    pub build: BuildReport,
}

pub struct LibrarySync {
    library: Arc<dyn LibraryRepository>,
    builder: Arc<PreferenceVectorBuilder>,
    config: SyncConfig,
}

impl LibrarySync {
    pub fn new(library: Arc<dyn LibraryRepository>, builder: Arc<PreferenceVectorBuilder>, config: SyncConfig) -> Self {
        Self { library, builder, config }
    }

    /// Stores a complete owned-item set and rebuilds the preference vector
    /// from it. The signals are kept even if the rebuild finds no eligible
    /// weight; the previous vector then stays in place.
    pub async fn replace_library(&self, user_id: UserId, signals: Vec<OwnedItemSignal>) -> EngineResult<SyncReport> {
        validate_signals(user_id, &signals)?;
        let owned_items = signals.len();
        self.library.replace_signals(user_id, signals).await?;

        let vector = self.builder.rebuild(user_id).await?;
        Ok(SyncReport {
            owned_items,
            build: vector.report,
            ..SyncReport::default()
        })
    }

    /// Pulls the library from `source`, enriches it with completion data and
    /// replaces the stored signals. A failed or slow completion fetch only
    /// clears that item's ratio.
    pub async fn sync_from(&self, source: &dyn LibrarySource, user_id: UserId) -> EngineResult<SyncReport> {
        let owned = source.owned_items(user_id).await?;
        let owned_items = owned.len();

        let (signals, fetched, failed) = if self.config.fetch_completion {
            self.enrich(source, user_id, owned).await
        } else {
            (owned, 0, 0)
        };

        let mut report = self.replace_library(user_id, signals).await?;
        report.completion_fetched = fetched;
        report.completion_failed = failed;

        info!(
            user_id = %user_id,
            owned = owned_items,
            fetched,
            failed,
            "Library sync complete"
        );
        Ok(report)
    }

    async fn enrich(
        &self,
        source: &dyn LibrarySource,
        user_id: UserId,
        owned: Vec<OwnedItemSignal>,
    ) -> (Vec<OwnedItemSignal>, usize, usize) {
        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);

        let mut results: Vec<(OwnedItemSignal, bool)> = stream::iter(owned)
            .map(|mut signal| async move {
                let outcome = tokio::time::timeout(timeout, source.completion_ratio(user_id, signal.item_id)).await;
                match outcome {
                    Ok(Ok(ratio)) => {
                        signal.completion_ratio = ratio.filter(|r| r.is_finite()).map(|r| r.clamp(0.0, 1.0));
                        (signal, true)
                    }
                    Ok(Err(e)) => {
                        warn!(user_id = %user_id, item_id = %signal.item_id, "Completion fetch failed: {}", e);
                        signal.completion_ratio = None;
                        (signal, false)
                    }
                    Err(_) => {
                        warn!(user_id = %user_id, item_id = %signal.item_id, "Completion fetch timed out");
                        signal.completion_ratio = None;
                        (signal, false)
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        results.sort_by_key(|(signal, _)| signal.item_id);
        let fetched = results.iter().filter(|(_, ok)| *ok).count();
        let failed = results.len() - fetched;
        (results.into_iter().map(|(signal, _)| signal).collect(), fetched, failed)
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    completion_ratio: Option<f32>,
}

/// JSON client for an upstream library service exposing
/// `GET {base}/users/{user}/library` and
/// `GET {base}/users/{user}/items/{item}/completion`.
pub struct HttpLibrarySource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLibrarySource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> EngineResult<T> {
        self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::Internal(format!("library source request {url} failed: {e}")))?
            .json()
            .await
            .map_err(|e| EngineError::Internal(format!("library source returned malformed JSON: {e}")))
    }
}

#[async_trait]
impl LibrarySource for HttpLibrarySource {
    async fn owned_items(&self, user_id: UserId) -> EngineResult<Vec<OwnedItemSignal>> {
        self.get_json(format!("{}/users/{}/library", self.base_url, user_id)).await
    }

    async fn completion_ratio(&self, user_id: UserId, item_id: ItemId) -> EngineResult<Option<f32>> {
        let body: CompletionBody = self
            .get_json(format!("{}/users/{}/items/{}/completion", self.base_url, user_id, item_id))
            .await?;
        Ok(body.completion_ratio)
    }
}
