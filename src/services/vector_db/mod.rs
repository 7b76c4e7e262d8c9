use crate::algorithms::retriever::{InMemoryRetriever, ItemPredicate, Neighbor};
use crate::algorithms::VectorDimension;
use crate::error::EngineResult;
use crate::models::{ItemEmbedding, ItemId};
use crate::utils::validation::validate_item_embedding;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Durable item-vector storage with nearest-neighbour search.
///
/// Implementations must reject vectors whose length differs from
/// [`EmbeddingRepository::dimension`] on every store and query call.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    fn dimension(&self) -> VectorDimension;

    async fn upsert(&self, item: &ItemEmbedding) -> EngineResult<()>;

    async fn get(&self, item_id: ItemId) -> EngineResult<Option<ItemEmbedding>>;

    async fn get_many(&self, item_ids: &[ItemId]) -> EngineResult<HashMap<ItemId, ItemEmbedding>>;

    /// Neighbours by ascending cosine distance, ties by ascending item id.
    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        predicate: &ItemPredicate,
    ) -> EngineResult<Vec<Neighbor>>;
}

pub struct InMemoryVectorStore {
    retriever: Arc<RwLock<InMemoryRetriever>>,
    dimension: VectorDimension,
}

impl InMemoryVectorStore {
    pub fn new(dimension: VectorDimension) -> Self {
        info!("Initialized in-memory vector store with dimension {}", dimension.get());
        Self {
            retriever: Arc::new(RwLock::new(InMemoryRetriever::new(dimension))),
            dimension,
        }
    }

    pub async fn len(&self) -> usize {
        self.retriever.read().await.len()
    }

    pub async fn batch_upsert(&self, items: &[ItemEmbedding]) -> EngineResult<()> {
        let mut retriever = self.retriever.write().await;
        for item in items {
            retriever.upsert(item)?;
        }
        info!("Batch inserted {} item embeddings", items.len());
        Ok(())
    }
}

#[async_trait]
impl EmbeddingRepository for InMemoryVectorStore {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn upsert(&self, item: &ItemEmbedding) -> EngineResult<()> {
        self.retriever.write().await.upsert(item)
    }

    async fn get(&self, item_id: ItemId) -> EngineResult<Option<ItemEmbedding>> {
        Ok(self.retriever.read().await.get(item_id))
    }

    async fn get_many(&self, item_ids: &[ItemId]) -> EngineResult<HashMap<ItemId, ItemEmbedding>> {
        let retriever = self.retriever.read().await;
        Ok(item_ids
            .iter()
            .filter_map(|id| retriever.get(*id).map(|item| (*id, item)))
            .collect())
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        predicate: &ItemPredicate,
    ) -> EngineResult<Vec<Neighbor>> {
        self.retriever.read().await.search(query, limit, predicate)
    }
}

/// Validates, normalizes and stores one catalog item. Re-ingesting an id
/// replaces the previous version wholesale.
pub async fn ingest(repo: &dyn EmbeddingRepository, item: ItemEmbedding) -> EngineResult<ItemEmbedding> {
    let item = validate_item_embedding(item, repo.dimension())?;
    repo.upsert(&item).await?;
    tracing::debug!(item_id = %item.item_id, "Ingested item embedding");
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::{ItemMetadata, METADATA_SCHEMA_VERSION};

    fn item(id: u64, vector: Vec<f32>) -> ItemEmbedding {
        ItemEmbedding {
            item_id: ItemId::new(id).unwrap(),
            vector,
            metadata: ItemMetadata {
                schema_version: METADATA_SCHEMA_VERSION,
                name: format!("Item {id}"),
                genres: vec![],
                tags: vec![],
                review_score: None,
                review_count: 0,
                release_year: None,
                is_free: true,
            },
        }
    }

    #[tokio::test]
    async fn ingest_normalizes_and_replaces() {
        let store = InMemoryVectorStore::new(VectorDimension::new(2).unwrap());
        ingest(&store, item(1, vec![0.0, 5.0])).await.unwrap();
        ingest(&store, item(1, vec![3.0, 0.0])).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(ItemId::new(1).unwrap()).await.unwrap().unwrap().vector, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn rejects_wrong_dimension_on_store_and_query() {
        let store = InMemoryVectorStore::new(VectorDimension::new(2).unwrap());
        assert!(matches!(
            ingest(&store, item(1, vec![1.0, 0.0, 0.0])).await,
            Err(EngineError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            store.nearest(&[1.0], 5, &ItemPredicate::default()).await,
            Err(EngineError::DimensionMismatch { .. })
        ));
    }
}
