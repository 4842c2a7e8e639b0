//! Short-lived cache of password records.
//!
//! Login consults the cache before the credential table and fills it on a
//! miss. Entries expire after the configured TTL and a background task
//! evicts them with [`CredentialCache::purge_expired`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedCredential {
    password_hash: String,
    expires_at: Instant,
}

impl CachedCredential {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone)]
pub struct CredentialCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, CachedCredential>>>,
}

impl CredentialCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The cached password record for `username`, if present and fresh.
    pub async fn get(&self, username: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(username)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.password_hash.clone())
    }

    pub async fn insert(&self, username: &str, password_hash: &str) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.insert(
            username.to_string(),
            CachedCredential {
                password_hash: password_hash.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn invalidate(&self, username: &str) {
        self.entries.write().await.remove(username);
    }

    /// Evict expired entries.
    pub async fn purge_expired(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired credential cache entries");
        }
    }
}
