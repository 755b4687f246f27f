//! Candle cache
//!
//! Time-bounded read cache for fetched candle series keyed by
//! (symbol, timeframe, from, to). Keys end on a bar boundary so every
//! decision inside one bar shares an entry. Concurrent misses on the same
//! key are coalesced so only one upstream fetch runs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::market::{Candle, Timeframe};

/// Configuration for the candle cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for cached series (seconds)
    pub ttl_secs: u64,
    /// Maximum cached series before expired entries are purged
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            max_entries: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            from,
            to,
        }
    }

    /// `lookback` of history up to the close of the bar holding `at`
    pub fn aligned(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        lookback: chrono::Duration,
        at: DateTime<Utc>,
    ) -> Self {
        let to = timeframe.bar_end(at);
        Self::new(symbol, timeframe, to - lookback, to)
    }
}

/// Entry in the candle cache with TTL
#[derive(Clone)]
struct CachedCandles {
    candles: Arc<Vec<Candle>>,
    cached_at: Instant,
}

impl CachedCandles {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Misses served by another caller's in-flight fetch
    pub coalesced: AtomicU64,
    pub fetches: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct CandleCache {
    config: CacheConfig,
    entries: DashMap<CandleKey, CachedCandles>,
    /// Per-key fetch locks (single-flight)
    inflight: DashMap<CandleKey, Arc<Mutex<()>>>,
    stats: Arc<CacheStats>,
}

impl CandleCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            inflight: DashMap::new(),
            stats: Arc::new(CacheStats::default()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_secs)
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh cached series, if any
    pub fn get(&self, key: &CandleKey) -> Option<Arc<Vec<Candle>>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(self.ttl()) {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(Arc::clone(&entry.candles))
    }

    pub fn insert(&self, key: CandleKey, candles: Vec<Candle>) -> Arc<Vec<Candle>> {
        if self.entries.len() >= self.config.max_entries {
            self.purge_expired();
        }
        let candles = Arc::new(candles);
        self.entries.insert(
            key,
            CachedCandles {
                candles: Arc::clone(&candles),
                cached_at: Instant::now(),
            },
        );
        candles
    }

    /// Cached series, or the result of `fetch` stored under `key`.
    /// Concurrent callers for the same key wait for a single fetch.
    pub async fn get_or_fetch<F, Fut>(&self, key: CandleKey, fetch: F) -> Result<Arc<Vec<Candle>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Candle>>>,
    {
        if let Some(candles) = self.get(&key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(candles);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // another caller may have filled it while we waited
        if let Some(candles) = self.get(&key) {
            self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(candles);
        }

        self.stats.fetches.fetch_add(1, Ordering::Relaxed);
        let fetched = fetch().await;
        self.inflight.remove(&key);

        let candles = self.insert(key.clone(), fetched?);
        debug!(
            symbol = %key.symbol,
            timeframe = %key.timeframe,
            bars = candles.len(),
            "Cached candle series"
        );
        Ok(candles)
    }

    /// Bars opened at or before `at`, read through the bar-aligned entry.
    /// An empty remainder counts as unavailable.
    pub async fn series_at<F, Fut>(&self, key: CandleKey, at: DateTime<Utc>, fetch: F) -> Result<Vec<Candle>>
    where
        F: FnOnce(DateTime<Utc>, DateTime<Utc>) -> Fut,
        Fut: Future<Output = Result<Vec<Candle>>>,
    {
        let (from, to) = (key.from, key.to);
        let what = format!("{} {}", key.symbol, key.timeframe);
        let series = self.get_or_fetch(key, || fetch(from, to)).await?;
        let visible: Vec<Candle> = series.iter().filter(|c| c.timestamp <= at).copied().collect();
        if visible.is_empty() {
            return Err(Error::unavailable(what, format!("no bars at or before {}", at)));
        }
        Ok(visible)
    }

    /// Drop expired entries
    pub fn purge_expired(&self) {
        let ttl = self.ttl();
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
    }
}

impl Default for CandleCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
