//! Scope cache — keyed store of materialized scopes.
//!
//! The [`ScopeStore`] trait abstracts over cache backends; the shipped
//! implementation is [`InMemoryScopeStore`], backed by two `DashMap` indices:
//!
//! - `entries`:  token id → cached scope      (O(1) per-request resolution)
//! - `by_group`: group id → {token id…}       (O(1) group-wide invalidation)
//!
//! Expired entries are lazily evicted on access and additionally swept by a
//! background reaper. The group index may briefly outlive the entries it
//! points at; lookups always consult the primary map.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::Scope;

/// Trait abstracting the scope cache backend.
#[async_trait::async_trait]
pub trait ScopeStore: Send + Sync + 'static {
    /// Store a scope under its token id.
    async fn put(&self, token_id: &str, scope: Scope, ttl: Duration);

    /// Return the scope for `token_id` if present and unexpired.
    async fn get(&self, token_id: &str) -> Option<Scope>;

    /// Drop one entry. Idempotent.
    async fn remove(&self, token_id: &str);

    /// Evict every entry indexed for `group_id`; returns how many were
    /// dropped. Used by the admin refresh endpoint.
    async fn remove_by_group(&self, group_id: &str) -> usize;

    /// Remove all expired entries. Called periodically by the reaper.
    async fn reap_expired(&self) -> usize;
}

struct CachedScope {
    scope: Scope,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedScope {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// In-memory scope store.
pub struct InMemoryScopeStore {
    entries: DashMap<String, CachedScope>,
    by_group: DashMap<String, Vec<String>>,
}

impl InMemoryScopeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            by_group: DashMap::new(),
        }
    }

    fn unindex(&self, group_id: &str, token_id: &str) {
        if let Some(mut tokens) = self.by_group.get_mut(group_id) {
            tokens.retain(|t| t != token_id);
        }
        self.by_group.remove_if(group_id, |_, tokens| tokens.is_empty());
    }
}

impl Default for InMemoryScopeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ScopeStore for InMemoryScopeStore {
    async fn put(&self, token_id: &str, scope: Scope, ttl: Duration) {
        let group_id = scope.group_id.clone();
        self.entries.insert(
            token_id.to_string(),
            CachedScope {
                scope,
                cached_at: Instant::now(),
                ttl,
            },
        );
        let mut tokens = self.by_group.entry(group_id).or_default();
        if !tokens.iter().any(|t| t == token_id) {
            tokens.push(token_id.to_string());
        }
    }

    async fn get(&self, token_id: &str) -> Option<Scope> {
        let entry = self.entries.get(token_id)?;
        if entry.is_expired() {
            let group_id = entry.scope.group_id.clone();
            drop(entry);
            self.entries.remove(token_id);
            self.unindex(&group_id, token_id);
            debug!(token_id = %token_id, "Lazy-evicted expired scope");
            return None;
        }
        Some(entry.scope.clone())
    }

    async fn remove(&self, token_id: &str) {
        if let Some((_, cached)) = self.entries.remove(token_id) {
            self.unindex(&cached.scope.group_id, token_id);
        }
    }

    async fn remove_by_group(&self, group_id: &str) -> usize {
        let Some((_, tokens)) = self.by_group.remove(group_id) else {
            return 0;
        };
        let mut removed = 0;
        for token_id in tokens {
            if self.entries.remove(&token_id).is_some() {
                removed += 1;
            }
        }
        debug!(group_id = %group_id, removed, "Invalidated group scopes");
        removed
    }

    async fn reap_expired(&self) -> usize {
        let expired: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| (e.key().clone(), e.value().scope.group_id.clone()))
            .collect();

        let count = expired.len();
        for (token_id, group_id) in expired {
            self.entries.remove(&token_id);
            self.unindex(&group_id, &token_id);
        }
        count
    }
}

/// Spawn a background task that reaps expired scopes every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<dyn ScopeStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired scopes");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Scope reaper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::{Resource, ResourceKind};
    use chrono::Utc;

    fn scope(group_id: &str, ids: &[&str]) -> Scope {
        Scope {
            group_id: group_id.to_string(),
            resources: ids
                .iter()
                .map(|id| Resource {
                    id: (*id).to_string(),
                    mail: Some(format!("{id}@x.example")),
                    kind: ResourceKind::Room,
                    display_name: None,
                    capacity: None,
                    location: None,
                })
                .collect(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::seconds(900),
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_after_put_returns_structurally_equal_scope() {
        let store = InMemoryScopeStore::new();
        let s = scope("g1", &["r1", "r2"]);
        store.put("t1", s.clone(), TTL).await;

        let got = store.get("t1").await.unwrap();
        assert_eq!(
            serde_json::to_value(&got).unwrap(),
            serde_json::to_value(&s).unwrap()
        );
    }

    #[tokio::test]
    async fn get_unknown_returns_none() {
        let store = InMemoryScopeStore::new();
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_lazily_evicted() {
        let store = InMemoryScopeStore::new();
        store
            .put("t1", scope("g1", &["r1"]), Duration::from_millis(0))
            .await;

        assert!(store.get("t1").await.is_none());
        assert!(store.entries.is_empty());
        assert!(store.by_group.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = InMemoryScopeStore::new();
        store.put("t1", scope("g1", &["r1"]), TTL).await;

        store.remove("t1").await;
        store.remove("t1").await;
        assert!(store.get("t1").await.is_none());
        assert!(store.by_group.is_empty());
    }

    #[tokio::test]
    async fn remove_by_group_evicts_all_indexed_tokens() {
        let store = InMemoryScopeStore::new();
        store.put("t1", scope("g1", &["r1"]), TTL).await;
        store.put("t2", scope("g1", &["r2"]), TTL).await;
        store.put("t3", scope("g2", &["r3"]), TTL).await;

        let removed = store.remove_by_group("g1").await;
        assert_eq!(removed, 2);
        assert!(store.get("t1").await.is_none());
        assert!(store.get("t2").await.is_none());
        // Other groups are untouched
        assert!(store.get("t3").await.is_some());
    }

    #[tokio::test]
    async fn remove_by_group_unknown_is_zero() {
        let store = InMemoryScopeStore::new();
        assert_eq!(store.remove_by_group("nope").await, 0);
    }

    #[tokio::test]
    async fn reput_under_same_token_does_not_duplicate_index() {
        let store = InMemoryScopeStore::new();
        store.put("t1", scope("g1", &["r1"]), TTL).await;
        store.put("t1", scope("g1", &["r1", "r2"]), TTL).await;

        assert_eq!(store.by_group.get("g1").unwrap().len(), 1);
        assert_eq!(store.get("t1").await.unwrap().resource_count(), 2);
    }

    #[tokio::test]
    async fn reap_removes_only_expired() {
        let store = InMemoryScopeStore::new();
        store
            .put("gone", scope("g1", &["r1"]), Duration::from_millis(0))
            .await;
        store.put("kept", scope("g2", &["r2"]), TTL).await;

        let reaped = store.reap_expired().await;
        assert_eq!(reaped, 1);
        assert!(store.get("kept").await.is_some());
        assert!(store.by_group.get("g1").is_none());
    }
}
