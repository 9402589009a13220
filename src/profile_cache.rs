use crate::clock::Clock;
use crate::error::Result;
use crate::store::ProfileDirectory;
use crate::types::PlayerProfile;
use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

struct CachedProfile {
  profile: PlayerProfile,
  fetched_at_ms: u64,
}

/// Player display data with a time-to-live. Entries older than `ttl_ms` are
/// treated as missing and refetched on the next `resolve`.
pub struct ProfileCache<D: ProfileDirectory + ?Sized> {
  directory: Arc<D>,
  clock: Arc<dyn Clock>,
  ttl_ms: u64,
  entries: Mutex<HashMap<String, CachedProfile>>,
}

impl<D: ProfileDirectory + ?Sized> ProfileCache<D> {
  pub fn new(directory: Arc<D>, clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
    ProfileCache {
      directory,
      clock,
      ttl_ms,
      entries: Mutex::new(HashMap::new()),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, CachedProfile>> {
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn is_fresh(&self, entry: &CachedProfile, now_ms: u64) -> bool {
    now_ms.saturating_sub(entry.fetched_at_ms) < self.ttl_ms
  }

  pub fn get(&self, player_id: &str) -> Option<PlayerProfile> {
    let now = self.clock.now_ms();
    self
      .entries()
      .get(player_id)
      .filter(|entry| self.is_fresh(entry, now))
      .map(|entry| entry.profile.clone())
  }

  pub fn insert(&self, profile: PlayerProfile) {
    let now = self.clock.now_ms();
    self.entries().insert(
      profile.id.clone(),
      CachedProfile {
        profile,
        fetched_at_ms: now,
      },
    );
  }

  pub fn invalidate(&self, player_id: &str) -> bool {
    self.entries().remove(player_id).is_some()
  }

  pub fn invalidate_all(&self) {
    self.entries().clear();
  }

  /// Drop expired entries; returns how many went.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now_ms();
    let ttl = self.ttl_ms;
    let mut entries = self.entries();
    let before = entries.len();
    entries.retain(|_, entry| now.saturating_sub(entry.fetched_at_ms) < ttl);
    before - entries.len()
  }

  /// Profiles for `player_ids` in the order asked, fetching only the ids that
  /// are missing or stale. Ids the directory does not know are left out.
  pub async fn resolve(&self, player_ids: &[String]) -> Result<Vec<PlayerProfile>> {
    let mut missing: Vec<String> = player_ids
      .iter()
      .filter(|id| self.get(id).is_none())
      .cloned()
      .collect();
    missing.sort();
    missing.dedup();

    if !missing.is_empty() {
      debug!(count = missing.len(), "fetching player profiles");
      let fetched = self.directory.fetch_profiles(&missing).await?;
      for profile in fetched {
        self.insert(profile);
      }
    }

    let entries = self.entries();
    Ok(
      player_ids
        .iter()
        .filter_map(|id| entries.get(id).map(|entry| entry.profile.clone()))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::config::DEFAULT_PROFILE_TTL_MS;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct CountingDirectory {
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl ProfileDirectory for CountingDirectory {
    async fn fetch_profiles(&self, player_ids: &[String]) -> Result<Vec<PlayerProfile>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.requested.lock().unwrap().extend(player_ids.iter().cloned());
      Ok(
        player_ids
          .iter()
          .filter(|id| id.as_str() != "ghost")
          .map(|id| PlayerProfile {
            id: id.clone(),
            display_name: id.to_uppercase(),
            avatar_url: None,
          })
          .collect(),
      )
    }
  }

  fn cache() -> (Arc<CountingDirectory>, Arc<ManualClock>, ProfileCache<CountingDirectory>) {
    let directory = Arc::new(CountingDirectory {
      calls: AtomicUsize::new(0),
      requested: Mutex::new(Vec::new()),
    });
    let clock = Arc::new(ManualClock::new(0));
    let cache = ProfileCache::new(directory.clone(), clock.clone(), DEFAULT_PROFILE_TTL_MS);
    (directory, clock, cache)
  }

  fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
  }

  #[tokio::test]
  async fn hits_skip_the_directory_until_ttl() {
    let (directory, clock, cache) = cache();
    let first = cache.resolve(&ids(&["a", "b"])).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(directory.calls.load(Ordering::SeqCst), 1);

    clock.advance(DEFAULT_PROFILE_TTL_MS - 1);
    cache.resolve(&ids(&["b", "a"])).await.unwrap();
    assert_eq!(directory.calls.load(Ordering::SeqCst), 1);

    clock.advance(1);
    assert_eq!(cache.get("a"), None);
    cache.resolve(&ids(&["a"])).await.unwrap();
    assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn only_missing_ids_are_fetched_in_request_order() {
    let (directory, _clock, cache) = cache();
    cache.resolve(&ids(&["a"])).await.unwrap();
    let resolved = cache.resolve(&ids(&["c", "a", "ghost", "c"])).await.unwrap();
    let names: Vec<&str> = resolved.iter().map(|p| p.display_name.as_str()).collect();
    assert_eq!(names, vec!["C", "A", "C"]);
    assert_eq!(*directory.requested.lock().unwrap(), ids(&["a", "c", "ghost"]));
  }

  #[tokio::test]
  async fn invalidation_forces_refetch() {
    let (directory, clock, cache) = cache();
    cache.resolve(&ids(&["a", "b"])).await.unwrap();
    assert!(cache.invalidate("a"));
    assert!(!cache.invalidate("a"));
    cache.resolve(&ids(&["a", "b"])).await.unwrap();
    assert_eq!(directory.calls.load(Ordering::SeqCst), 2);

    cache.invalidate_all();
    assert_eq!(cache.get("b"), None);

    cache.resolve(&ids(&["a"])).await.unwrap();
    clock.advance(DEFAULT_PROFILE_TTL_MS);
    assert_eq!(cache.purge_expired(), 1);
  }
}
