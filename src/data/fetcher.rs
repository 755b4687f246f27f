//! Resilient fetcher
//!
//! Wraps a `MarketDataProvider` so every call carries a bounded timeout and
//! transient failures (rate limits, timeouts) are retried with exponential
//! backoff. Permanent failures come straight back to the caller.

use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MarketDataProvider, OptionChain};
use crate::error::{Error, Result};
use crate::market::{Candle, Timeframe};

/// Upstream call limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Timeout per upstream call (ms)
    pub timeout_ms: u64,
    pub retry_initial_interval_ms: u64,
    pub retry_max_interval_ms: u64,
    /// Give up retrying after this long (ms)
    pub retry_max_elapsed_ms: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_initial_interval_ms: 250,
            retry_max_interval_ms: 2_000,
            retry_max_elapsed_ms: 8_000,
        }
    }
}

pub struct ResilientFetcher {
    provider: Arc<dyn MarketDataProvider>,
    config: DataConfig,
}

impl ResilientFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: DataConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let what = format!("{} {}", symbol, timeframe);
        let candles = self
            .call(&what, || self.provider.get_historical_candles(symbol, timeframe, from, to))
            .await?;
        if candles.is_empty() {
            return Err(Error::unavailable(what, "empty series"));
        }
        Ok(candles)
    }

    pub async fn quote(&self, symbol: &str) -> Result<f64> {
        self.call(symbol, || self.provider.get_quote(symbol)).await
    }

    pub async fn futures_quote(&self, symbol: &str) -> Result<f64> {
        self.call(&format!("{} futures", symbol), || self.provider.get_futures_quote(symbol))
            .await
    }

    pub async fn option_chain(&self, symbol: &str) -> Result<OptionChain> {
        self.call(&format!("{} option chain", symbol), || self.provider.get_option_chain(symbol))
            .await
    }

    /// Timeout + retry around one upstream operation
    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.config.retry_max_interval_ms),
            max_elapsed_time: Some(Duration::from_millis(self.config.retry_max_elapsed_ms)),
            ..Default::default()
        };

        retry(backoff, || async {
            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.config.timeout_ms)),
            };
            match result {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(what = %what, error = %e, "Retryable upstream error");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    debug!(what = %what, error = %e, "Upstream call failed");
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await
    }
}
