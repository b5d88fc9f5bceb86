// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory HTTP Digest nonce cache.
//
// Nonces live only for the lifetime of the process.  A restart drops them
// all and clients simply answer the next 401 challenge with a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use ring::rand::{SecureRandom, SystemRandom};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use zikzi_core::error::{Result, ZikziError};

/// How long an issued nonce stays valid.
pub const NONCE_TTL: Duration = Duration::from_secs(5 * 60);

/// Interval between expiry sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Random bytes per nonce (hex-encoded to twice as many characters).
const NONCE_BYTES: usize = 16;

/// Issued nonces and their expiry instants, behind one reader/writer lock.
pub struct NonceCache {
    entries: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
    rng: SystemRandom,
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceCache {
    pub fn new() -> Self {
        Self::with_ttl(NONCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            rng: SystemRandom::new(),
        }
    }

    /// Issue a new nonce valid for the configured TTL.
    pub fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; NONCE_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| ZikziError::Random)?;
        let nonce = hex::encode(bytes);

        let expires = Instant::now() + self.ttl;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(nonce.clone(), expires);
        Ok(nonce)
    }

    /// Whether `nonce` was issued by us and has not yet expired.
    pub fn is_valid(&self, nonce: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(nonce)
            .is_some_and(|expires| Instant::now() < *expires)
    }

    /// Forget `nonce` immediately.
    pub fn invalidate(&self, nonce: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(nonce);
    }

    /// Drop every expired entry.  Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, expires| now < *expires);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move { cache.sweep_loop(interval, shutdown).await })
    }

    #[instrument(name = "nonce_sweeper", skip_all)]
    async fn sweep_loop(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("nonce sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = self.len(), "expired nonces swept");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_nonce_is_32_hex_chars_and_valid() {
        let cache = NonceCache::new();
        let nonce = cache.generate().unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(cache.is_valid(&nonce));
    }

    #[test]
    fn nonces_are_unique() {
        let cache = NonceCache::new();
        let a = cache.generate().unwrap();
        let b = cache.generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn unknown_nonce_is_invalid() {
        let cache = NonceCache::new();
        assert!(!cache.is_valid("deadbeef"));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = NonceCache::new();
        let nonce = cache.generate().unwrap();
        cache.invalidate(&nonce);
        assert!(!cache.is_valid(&nonce));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn nonce_expires_after_ttl() {
        let cache = NonceCache::with_ttl(Duration::from_secs(30));
        let nonce = cache.generate().unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.is_valid(&nonce));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.is_valid(&nonce));
        // Still stored until a sweep runs.
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_entries_on_tick() {
        let cache = Arc::new(NonceCache::new());
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());

        let nonce = cache.generate().unwrap();
        tokio::time::sleep(NONCE_TTL + Duration::from_secs(1)).await;
        assert!(!cache.is_valid(&nonce));

        // Next tick after expiry.
        tokio::time::sleep(SWEEP_INTERVAL).await;
        assert!(cache.is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_keeps_live_entries() {
        let cache = Arc::new(NonceCache::new());
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_sweeper(SWEEP_INTERVAL, shutdown.clone());

        let nonce = cache.generate().unwrap();
        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        assert!(cache.is_valid(&nonce));
        assert_eq!(cache.len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
