//! Eligibility selector.
//!
//! Computes which users may review a pull request and draws uniform random
//! picks from that pool. Randomness is injected through [`RandomSource`] so
//! production uses fresh entropy per call while tests can seed it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::store::{StoreError, StoreTx};

/// Number of reviewers assigned when a pull request is created.
pub const DEFAULT_REVIEWER_LIMIT: usize = 2;

/// Source of uniform randomness for reviewer selection.
pub trait RandomSource: Send + Sync {
    /// Shuffle `ids` in place, uniformly.
    fn shuffle(&self, ids: &mut [String]);

    /// Uniform index in `0..len`. `len` is never zero.
    fn pick_index(&self, len: usize) -> usize;
}

/// Draws from the thread-local generator on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn shuffle(&self, ids: &mut [String]) {
        ids.shuffle(&mut rand::thread_rng());
    }

    fn pick_index(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Deterministic generator for tests and reproducible runs.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned generator is still a valid generator.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }
}

impl RandomSource for SeededRandom {
    fn shuffle(&self, ids: &mut [String]) {
        self.with_rng(|rng| ids.shuffle(rng));
    }

    fn pick_index(&self, len: usize) -> usize {
        self.with_rng(|rng| rng.gen_range(0..len))
    }
}

/// Picks reviewers from the active members of a team.
#[derive(Clone)]
pub struct Selector {
    random: Arc<dyn RandomSource>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(Arc::new(ThreadRandom))
    }
}

impl Selector {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    /// Active members of `team_name` not listed in `exclude`, sorted by id.
    ///
    /// An empty team name (unassigned user) yields an empty pool.
    pub async fn eligible_pool(
        &self,
        tx: &mut dyn StoreTx,
        team_name: &str,
        exclude: &HashSet<&str>,
    ) -> Result<Vec<String>, StoreError> {
        if team_name.is_empty() {
            return Ok(Vec::new());
        }

        let mut pool: Vec<String> = tx
            .active_member_ids(team_name)
            .await?
            .into_iter()
            .filter(|id| !exclude.contains(id.as_str()))
            .collect();
        pool.sort();
        pool.dedup();
        Ok(pool)
    }

    /// Up to `limit` distinct active teammates of the author.
    pub async fn pick_initial_reviewers(
        &self,
        tx: &mut dyn StoreTx,
        team_name: &str,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let exclude = HashSet::from([author_id]);
        let pool = self.eligible_pool(tx, team_name, &exclude).await?;
        Ok(self.sample(pool, limit))
    }

    /// One active teammate who is neither listed in `excluded` (the
    /// reviewer being replaced, the author) nor already among
    /// `assigned_ids`, or `None` when nobody qualifies.
    pub async fn pick_replacement_candidate(
        &self,
        tx: &mut dyn StoreTx,
        team_name: &str,
        assigned_ids: &[String],
        excluded: &[&str],
    ) -> Result<Option<String>, StoreError> {
        let mut exclude: HashSet<&str> = assigned_ids.iter().map(String::as_str).collect();
        exclude.extend(excluded.iter().copied());

        let pool = self.eligible_pool(tx, team_name, &exclude).await?;
        Ok(self.choose(pool))
    }

    /// Whole pool when it fits, otherwise the first `limit` of a shuffle.
    fn sample(&self, mut pool: Vec<String>, limit: usize) -> Vec<String> {
        if pool.len() <= limit {
            return pool;
        }
        self.random.shuffle(&mut pool);
        pool.truncate(limit);
        pool
    }

    fn choose(&self, mut pool: Vec<String>) -> Option<String> {
        if pool.is_empty() {
            return None;
        }
        let idx = self.random.pick_index(pool.len());
        Some(pool.swap_remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::store::{MemoryStore, ReviewStore};

    async fn seeded_team(store: &MemoryStore, members: &[(&str, bool)]) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_team("backend").await.unwrap();
        tx.insert_team("frontend").await.unwrap();
        for (id, active) in members {
            tx.upsert_user(&User {
                id: id.to_string(),
                username: id.to_string(),
                team_name: "backend".into(),
                is_active: *active,
            })
            .await
            .unwrap();
        }
        tx.upsert_user(&User {
            id: "outsider".into(),
            username: "outsider".into(),
            team_name: "frontend".into(),
            is_active: true,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_eligible_pool_filters_inactive_and_excluded() {
        let store = MemoryStore::new();
        seeded_team(&store, &[("a", true), ("b", false), ("c", true), ("d", true)]).await;
        let selector = Selector::default();

        let mut tx = store.begin().await.unwrap();
        let pool = selector
            .eligible_pool(tx.as_mut(), "backend", &HashSet::from(["d"]))
            .await
            .unwrap();
        assert_eq!(pool, ids(&["a", "c"]));

        let empty = selector
            .eligible_pool(tx.as_mut(), "", &HashSet::new())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_initial_reviewers_small_pool_returns_everyone() {
        let store = MemoryStore::new();
        seeded_team(&store, &[("a", true), ("b", true), ("c", false)]).await;
        let selector = Selector::default();

        let mut tx = store.begin().await.unwrap();
        let picked = selector
            .pick_initial_reviewers(tx.as_mut(), "backend", "a", 2)
            .await
            .unwrap();
        assert_eq!(picked, ids(&["b"]));
    }

    #[tokio::test]
    async fn test_initial_reviewers_large_pool_samples_limit() {
        let store = MemoryStore::new();
        seeded_team(
            &store,
            &[("a", true), ("b", true), ("c", true), ("d", true), ("e", true)],
        )
        .await;
        let selector = Selector::default();

        let mut tx = store.begin().await.unwrap();
        for _ in 0..20 {
            let picked = selector
                .pick_initial_reviewers(tx.as_mut(), "backend", "a", 2)
                .await
                .unwrap();
            assert_eq!(picked.len(), 2);
            assert_ne!(picked[0], picked[1]);
            assert!(!picked.contains(&"a".to_string()));
            assert!(!picked.contains(&"outsider".to_string()));
        }
    }

    #[tokio::test]
    async fn test_seeded_selection_is_reproducible() {
        let store = MemoryStore::new();
        seeded_team(
            &store,
            &[("a", true), ("b", true), ("c", true), ("d", true), ("e", true)],
        )
        .await;

        let mut tx = store.begin().await.unwrap();
        let first = Selector::new(Arc::new(SeededRandom::new(7)))
            .pick_initial_reviewers(tx.as_mut(), "backend", "a", 2)
            .await
            .unwrap();
        let second = Selector::new(Arc::new(SeededRandom::new(7)))
            .pick_initial_reviewers(tx.as_mut(), "backend", "a", 2)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_replacement_skips_assigned_and_excluded() {
        let store = MemoryStore::new();
        seeded_team(&store, &[("a", true), ("b", true), ("c", true), ("d", true)]).await;
        let selector = Selector::default();

        let mut tx = store.begin().await.unwrap();
        for _ in 0..20 {
            let candidate = selector
                .pick_replacement_candidate(tx.as_mut(), "backend", &ids(&["a", "b"]), &["c"])
                .await
                .unwrap();
            assert_eq!(candidate.as_deref(), Some("d"));
        }

        let none = selector
            .pick_replacement_candidate(tx.as_mut(), "backend", &ids(&["a", "b"]), &["c", "d"])
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_thread_random_pick_index_in_range() {
        let random = ThreadRandom;
        for len in 1..10 {
            assert!(random.pick_index(len) < len);
        }
    }
}
