//! Process-wide TTL cache for the proxy.
//!
//! Each namespace is its own map, so a proxy id can never collide with a
//! request URI or a user id. Expired entries are dropped when read and by
//! [`ProxyCache::purge_expired`].

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use super::resolver::ViewerLocation;
use super::response_cache::CachedResponse;
use crate::directory::{ProjectSnapshot, UserSnapshot};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Thread-safe map with per-entry expiry.
pub struct TtlMap<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> TtlMap<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Only remove if still expired; a concurrent put may have refreshed it.
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace.
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(key.into(), CacheEntry::new(value, ttl));
    }

    /// Insert only when no live entry exists. Returns whether the value was stored.
    pub fn add(&self, key: impl Into<String>, value: V, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    false
                } else {
                    occupied.insert(CacheEntry::new(value, ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(value, ttl));
                true
            }
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for TtlMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Namespaced cache shared by every proxied request.
///
/// When disabled, reads always miss and writes are ignored.
pub struct ProxyCache {
    enabled: bool,
    ttl: Duration,
    locations: TtlMap<ViewerLocation>,
    users: TtlMap<UserSnapshot>,
    projects: TtlMap<ProjectSnapshot>,
    responses: TtlMap<CachedResponse>,
}

impl ProxyCache {
    pub fn new(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled,
            ttl,
            locations: TtlMap::new(),
            users: TtlMap::new(),
            projects: TtlMap::new(),
            responses: TtlMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO)
    }

    pub fn location(&self, proxy_id: &str) -> Option<ViewerLocation> {
        self.enabled.then(|| self.locations.get(proxy_id)).flatten()
    }

    /// First writer wins.
    pub fn add_location(&self, location: ViewerLocation) -> bool {
        self.enabled && self.locations.add(location.proxy_id.clone(), location, self.ttl)
    }

    pub fn user(&self, user_uid: &str) -> Option<UserSnapshot> {
        self.enabled.then(|| self.users.get(user_uid)).flatten()
    }

    pub fn put_user(&self, user: UserSnapshot) {
        if self.enabled {
            self.users.put(user.user_uid.clone(), user, self.ttl);
        }
    }

    pub fn project(&self, project_uid: &str) -> Option<ProjectSnapshot> {
        self.enabled.then(|| self.projects.get(project_uid)).flatten()
    }

    pub fn put_project(&self, project: ProjectSnapshot) {
        if self.enabled {
            self.projects
                .put(project.project_uid.clone(), project, self.ttl);
        }
    }

    pub fn response(&self, uri: &str) -> Option<CachedResponse> {
        self.enabled.then(|| self.responses.get(uri)).flatten()
    }

    /// First writer wins.
    pub fn add_response(&self, uri: &str, response: CachedResponse) -> bool {
        self.enabled && self.responses.add(uri, response, self.ttl)
    }

    /// Sweep every namespace, returning the number of evicted entries.
    pub fn purge_expired(&self) -> usize {
        self.locations.purge_expired()
            + self.users.purge_expired()
            + self.projects.purge_expired()
            + self.responses.purge_expired()
    }
}
