use super::VectorDimension;
use crate::error::EngineResult;
use crate::models::{ItemEmbedding, ItemId, ItemMetadata, RankingFilters};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// One nearest-neighbour hit; `distance` is cosine distance in [0, 2].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub item_id: ItemId,
    pub distance: f32,
}

/// Metadata predicates pushed down into the vector store query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPredicate {
    pub min_review_score: Option<f32>,
    pub free_only: bool,
    pub release_year_min: Option<u16>,
    pub release_year_max: Option<u16>,
    /// Lowercased allowlist; an item matches if it carries any of them.
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub exclude: HashSet<ItemId>,
}

impl ItemPredicate {
    pub fn from_filters(filters: &RankingFilters) -> Self {
        Self {
            min_review_score: filters.min_review_score,
            free_only: filters.free_only,
            release_year_min: filters.release_year_min,
            release_year_max: filters.release_year_max,
            genres: lowercase_all(&filters.genres),
            tags: lowercase_all(&filters.tags),
            exclude: HashSet::new(),
        }
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = ItemId>) -> Self {
        self.exclude.extend(ids);
        self
    }

    pub fn matches(&self, item_id: ItemId, metadata: &ItemMetadata) -> bool {
        if self.exclude.contains(&item_id) {
            return false;
        }
        if self.free_only && !metadata.is_free {
            return false;
        }
        if let Some(min) = self.min_review_score {
            match metadata.review_score {
                Some(score) if score >= min => {}
                _ => return false,
            }
        }
        if self.release_year_min.is_some() || self.release_year_max.is_some() {
            let Some(year) = metadata.release_year else {
                return false;
            };
            if self.release_year_min.is_some_and(|min| year < min)
                || self.release_year_max.is_some_and(|max| year > max)
            {
                return false;
            }
        }
        any_overlap(&self.genres, &metadata.genres) && any_overlap(&self.tags, &metadata.tags)
    }
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.trim().to_lowercase()).filter(|v| !v.is_empty()).collect()
}

/// An empty allowlist matches everything.
fn any_overlap(allow: &[String], values: &[String]) -> bool {
    allow.is_empty()
        || values
            .iter()
            .any(|value| allow.iter().any(|a| a.eq_ignore_ascii_case(value)))
}

/// Orders by ascending distance, then ascending item id.
pub fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .partial_cmp(&b.distance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_id.cmp(&b.item_id))
}

#[derive(Debug, Clone)]
struct Entry {
    vector: DVector<f32>,
    metadata: ItemMetadata,
}

/// Exact brute-force cosine search over unit vectors.
#[derive(Debug, Clone)]
pub struct InMemoryRetriever {
    entries: HashMap<ItemId, Entry>,
    dimension: VectorDimension,
}

impl InMemoryRetriever {
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            entries: HashMap::new(),
            dimension,
        }
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces any previous version of the item wholesale.
    pub fn upsert(&mut self, item: &ItemEmbedding) -> EngineResult<()> {
        self.dimension.check(&item.vector)?;
        self.entries.insert(
            item.item_id,
            Entry {
                vector: DVector::from_column_slice(&item.vector),
                metadata: item.metadata.clone(),
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, item_id: ItemId) -> bool {
        self.entries.remove(&item_id).is_some()
    }

    pub fn get(&self, item_id: ItemId) -> Option<ItemEmbedding> {
        self.entries.get(&item_id).map(|entry| ItemEmbedding {
            item_id,
            vector: entry.vector.as_slice().to_vec(),
            metadata: entry.metadata.clone(),
        })
    }

    pub fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        predicate: &ItemPredicate,
    ) -> EngineResult<Vec<Neighbor>> {
        self.dimension.check(query_vector)?;
        let query = DVector::from_column_slice(query_vector);
        let query_norm = query.norm();

        let mut neighbors: Vec<Neighbor> = self
            .entries
            .par_iter()
            .filter(|(id, entry)| predicate.matches(**id, &entry.metadata))
            .map(|(id, entry)| Neighbor {
                item_id: *id,
                distance: cosine_distance(&query, query_norm, &entry.vector),
            })
            .collect();

        neighbors.sort_by(neighbor_order);
        neighbors.truncate(limit);
        Ok(neighbors)
    }
}

fn cosine_distance(query: &DVector<f32>, query_norm: f32, vector: &DVector<f32>) -> f32 {
    let norm = vector.norm();
    if query_norm == 0.0 || norm == 0.0 {
        return 1.0;
    }
    let cosine = (query.dot(vector) / (query_norm * norm)).clamp(-1.0, 1.0);
    (1.0 - cosine).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, vector: Vec<f32>, score: Option<f32>, year: Option<u16>) -> ItemEmbedding {
        ItemEmbedding {
            item_id: ItemId::new(id).unwrap(),
            vector,
            metadata: ItemMetadata {
                schema_version: 1,
                name: format!("game {id}"),
                genres: vec!["Strategy".to_string()],
                tags: vec!["Turn-Based".to_string()],
                review_score: score,
                review_count: 10,
                release_year: year,
                is_free: id % 2 == 0,
            },
        }
    }

    fn retriever() -> InMemoryRetriever {
        let mut r = InMemoryRetriever::new(VectorDimension::new(2).unwrap());
        r.upsert(&item(1, vec![1.0, 0.0], Some(90.0), Some(2020))).unwrap();
        r.upsert(&item(2, vec![0.0, 1.0], Some(60.0), Some(2010))).unwrap();
        r.upsert(&item(3, vec![0.6, 0.8], None, None)).unwrap();
        r
    }

    #[test]
    fn orders_by_distance() {
        let hits = retriever().search(&[1.0, 0.0], 10, &ItemPredicate::default()).unwrap();
        let ids: Vec<u64> = hits.iter().map(|n| n.item_id.get()).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn ties_break_on_item_id() {
        let mut r = InMemoryRetriever::new(VectorDimension::new(2).unwrap());
        r.upsert(&item(9, vec![1.0, 0.0], None, None)).unwrap();
        r.upsert(&item(4, vec![1.0, 0.0], None, None)).unwrap();
        let hits = r.search(&[1.0, 0.0], 10, &ItemPredicate::default()).unwrap();
        assert_eq!(hits[0].item_id.get(), 4);
        assert_eq!(hits[1].item_id.get(), 9);
    }

    #[test]
    fn predicates_filter() {
        let r = retriever();
        let predicate = ItemPredicate {
            min_review_score: Some(70.0),
            ..Default::default()
        };
        let hits = r.search(&[0.0, 1.0], 10, &predicate).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item_id.get(), 1);

        let free = ItemPredicate { free_only: true, ..Default::default() };
        assert_eq!(r.search(&[0.0, 1.0], 10, &free).unwrap().len(), 1);

        let years = ItemPredicate { release_year_min: Some(2015), ..Default::default() };
        assert_eq!(r.search(&[0.0, 1.0], 10, &years).unwrap().len(), 1);

        let genres = ItemPredicate { genres: vec!["strategy".into()], ..Default::default() };
        assert_eq!(r.search(&[0.0, 1.0], 10, &genres).unwrap().len(), 3);

        let excluded = ItemPredicate::default().excluding([ItemId::new(1).unwrap()]);
        assert_eq!(r.search(&[1.0, 0.0], 10, &excluded).unwrap()[0].item_id.get(), 3);
    }

    #[test]
    fn rejects_wrong_dimension() {
        assert!(retriever().search(&[1.0, 0.0, 0.0], 1, &ItemPredicate::default()).is_err());
    }
}
