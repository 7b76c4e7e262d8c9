//! Repository boundaries for per-user state.
//!
//! Each service receives these as `Arc<dyn ...>` so the Postgres
//! implementations in [`postgres`] and the in-memory ones here are
//! interchangeable.

pub mod postgres;

use crate::error::EngineResult;
use crate::models::{FeedbackEvent, ItemId, LearnedVector, OwnedItemSignal, PreferenceVector, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[async_trait]
pub trait LibraryRepository: Send + Sync {
    /// Replaces the user's whole owned-item set.
    async fn replace_signals(&self, user_id: UserId, signals: Vec<OwnedItemSignal>) -> EngineResult<()>;

    async fn signals(&self, user_id: UserId) -> EngineResult<Vec<OwnedItemSignal>>;

    /// Account unlink.
    async fn delete_signals(&self, user_id: UserId) -> EngineResult<()>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn preference(&self, user_id: UserId) -> EngineResult<Option<PreferenceVector>>;

    /// Atomic full replace.
    async fn replace_preference(&self, vector: PreferenceVector) -> EngineResult<()>;

    /// Learned vectors are written only through a [`FeedbackUnit`].
    async fn learned(&self, user_id: UserId) -> EngineResult<Option<LearnedVector>>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    /// Every stored event of the user, active or not.
    async fn events(&self, user_id: UserId) -> EngineResult<Vec<FeedbackEvent>>;

    /// Opens an exclusive unit of work over one user's feedback state. Other
    /// units for the same user, in this process or any other sharing the
    /// backend, wait until this one is committed or dropped.
    async fn begin<'a>(&'a self, user_id: UserId) -> EngineResult<Box<dyn FeedbackUnit + 'a>>;
}

/// Read-modify-write access to one user's events and learned vector.
/// Dropping a unit without [`FeedbackUnit::commit`] discards its writes
/// where the backend supports it.
#[async_trait]
pub trait FeedbackUnit: Send {
    async fn learned(&mut self) -> EngineResult<Option<LearnedVector>>;

    async fn events(&mut self) -> EngineResult<Vec<FeedbackEvent>>;

    /// Inserts or replaces the event for (user, item). Replacing an active
    /// event keeps its `created_at`; a new or reactivated event starts fresh.
    async fn upsert_event(&mut self, event: FeedbackEvent) -> EngineResult<FeedbackEvent>;

    /// Returns whether an event existed.
    async fn delete_event(&mut self, item_id: ItemId) -> EngineResult<bool>;

    /// Marks every event inactive and returns how many changed.
    async fn deactivate_events(&mut self) -> EngineResult<u64>;

    /// Removes every event and returns how many were removed.
    async fn clear_events(&mut self) -> EngineResult<u64>;

    async fn put_learned(&mut self, vector: LearnedVector) -> EngineResult<()>;

    async fn delete_learned(&mut self) -> EngineResult<()>;

    async fn commit(&mut self) -> EngineResult<()>;
}

/// Per-user async mutexes. Entries are dropped once nobody holds or waits
/// on them.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

pub struct UserLockGuard<'a> {
    locks: &'a UserLocks,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: UserId) -> UserLockGuard<'_> {
        let lock = self.locks.entry(user_id).or_default().clone();
        let guard = lock.lock_owned().await;
        UserLockGuard {
            locks: self,
            user_id,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Process-local repositories for development and tests.
#[derive(Default)]
pub struct InMemoryStore {
    signals: DashMap<UserId, Vec<OwnedItemSignal>>,
    preferences: DashMap<UserId, PreferenceVector>,
    learned: DashMap<UserId, LearnedVector>,
    feedback: DashMap<UserId, HashMap<ItemId, FeedbackEvent>>,
    locks: UserLocks,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users with a feedback unit open or waiting.
    pub fn locked_users(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl LibraryRepository for InMemoryStore {
    async fn replace_signals(&self, user_id: UserId, signals: Vec<OwnedItemSignal>) -> EngineResult<()> {
        self.signals.insert(user_id, signals);
        Ok(())
    }

    async fn signals(&self, user_id: UserId) -> EngineResult<Vec<OwnedItemSignal>> {
        Ok(self.signals.get(&user_id).map(|s| s.clone()).unwrap_or_default())
    }

    async fn delete_signals(&self, user_id: UserId) -> EngineResult<()> {
        self.signals.remove(&user_id);
        Ok(())
    }
}

#[async_trait]
impl PreferenceRepository for InMemoryStore {
    async fn preference(&self, user_id: UserId) -> EngineResult<Option<PreferenceVector>> {
        Ok(self.preferences.get(&user_id).map(|p| p.clone()))
    }

    async fn replace_preference(&self, vector: PreferenceVector) -> EngineResult<()> {
        self.preferences.insert(vector.user_id, vector);
        Ok(())
    }

    async fn learned(&self, user_id: UserId) -> EngineResult<Option<LearnedVector>> {
        Ok(self.learned.get(&user_id).map(|l| l.clone()))
    }
}

#[async_trait]
impl FeedbackRepository for InMemoryStore {
    async fn events(&self, user_id: UserId) -> EngineResult<Vec<FeedbackEvent>> {
        Ok(self
            .feedback
            .get(&user_id)
            .map(|events| events.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn begin<'a>(&'a self, user_id: UserId) -> EngineResult<Box<dyn FeedbackUnit + 'a>> {
        let guard = self.locks.acquire(user_id).await;
        Ok(Box::new(MemoryFeedbackUnit {
            store: self,
            user_id,
            _guard: guard,
        }))
    }
}

/// Writes land immediately; the user lock is what makes the unit exclusive.
struct MemoryFeedbackUnit<'a> {
    store: &'a InMemoryStore,
    user_id: UserId,
    _guard: UserLockGuard<'a>,
}

#[async_trait]
impl<'a> FeedbackUnit for MemoryFeedbackUnit<'a> {
    async fn learned(&mut self) -> EngineResult<Option<LearnedVector>> {
        Ok(self.store.learned.get(&self.user_id).map(|l| l.clone()))
    }

    async fn events(&mut self) -> EngineResult<Vec<FeedbackEvent>> {
        self.store.events(self.user_id).await
    }

    async fn upsert_event(&mut self, mut event: FeedbackEvent) -> EngineResult<FeedbackEvent> {
        let mut events = self.store.feedback.entry(self.user_id).or_default();
        if let Some(existing) = events.get(&event.item_id).filter(|e| e.active) {
            event.created_at = existing.created_at;
        }
        event.active = true;
        events.insert(event.item_id, event.clone());
        Ok(event)
    }

    async fn delete_event(&mut self, item_id: ItemId) -> EngineResult<bool> {
        Ok(self
            .store
            .feedback
            .get_mut(&self.user_id)
            .map(|mut events| events.remove(&item_id).is_some())
            .unwrap_or(false))
    }

    async fn deactivate_events(&mut self) -> EngineResult<u64> {
        let mut changed = 0;
        if let Some(mut events) = self.store.feedback.get_mut(&self.user_id) {
            for event in events.values_mut().filter(|e| e.active) {
                event.active = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn clear_events(&mut self) -> EngineResult<u64> {
        Ok(self
            .store
            .feedback
            .remove(&self.user_id)
            .map(|(_, events)| events.len() as u64)
            .unwrap_or(0))
    }

    async fn put_learned(&mut self, vector: LearnedVector) -> EngineResult<()> {
        self.store.learned.insert(self.user_id, vector);
        Ok(())
    }

    async fn delete_learned(&mut self) -> EngineResult<()> {
        self.store.learned.remove(&self.user_id);
        Ok(())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedbackLabel;
    use chrono::{Duration, Utc};

    fn ids() -> (UserId, ItemId) {
        (UserId::new(1).unwrap(), ItemId::new(2).unwrap())
    }

    #[tokio::test]
    async fn upsert_keeps_first_creation_time_while_active() {
        let store = InMemoryStore::new();
        let (user, item) = ids();
        let first = Utc::now() - Duration::days(2);

        let mut unit = store.begin(user).await.unwrap();
        unit.upsert_event(FeedbackEvent::new(user, item, FeedbackLabel::Like, first)).await.unwrap();
        let stored = unit
            .upsert_event(FeedbackEvent::new(user, item, FeedbackLabel::StrongLike, Utc::now()))
            .await
            .unwrap();
        assert_eq!(stored.created_at, first);
        assert_eq!(stored.label, FeedbackLabel::StrongLike);

        assert_eq!(unit.deactivate_events().await.unwrap(), 1);
        let later = Utc::now();
        let revived = unit
            .upsert_event(FeedbackEvent::new(user, item, FeedbackLabel::Dislike, later))
            .await
            .unwrap();
        assert_eq!(revived.created_at, later);
        assert!(revived.active);
        unit.commit().await.unwrap();
        drop(unit);

        assert_eq!(store.events(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let store = InMemoryStore::new();
        let user = UserId::new(1).unwrap();
        let mut unit = store.begin(user).await.unwrap();
        for id in 1..=3 {
            let item = ItemId::new(id).unwrap();
            unit.upsert_event(FeedbackEvent::new(user, item, FeedbackLabel::Dislike, Utc::now())).await.unwrap();
        }
        assert!(unit.delete_event(ItemId::new(1).unwrap()).await.unwrap());
        assert!(!unit.delete_event(ItemId::new(1).unwrap()).await.unwrap());
        assert_eq!(unit.clear_events().await.unwrap(), 2);
        assert!(unit.events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn units_for_one_user_are_exclusive() {
        let store = Arc::new(InMemoryStore::new());
        let (user, _) = ids();

        let unit = store.begin(user).await.unwrap();
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _unit = store.begin(user).await.unwrap();
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different user is not blocked.
        let other = store.begin(UserId::new(9).unwrap()).await.unwrap();
        drop(other);

        drop(unit);
        contender.await.unwrap();
        assert_eq!(store.locked_users(), 0);
    }

    #[tokio::test]
    async fn idle_user_locks_are_released() {
        let locks = UserLocks::new();
        for raw in 1..=50 {
            let _guard = locks.acquire(UserId::new(raw).unwrap()).await;
        }
        assert!(locks.is_empty());
    }
}
