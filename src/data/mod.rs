//! External collaborators and market data plumbing
//!
//! The signal core is pure; everything that talks to the outside world sits
//! behind the traits in this module:
//! - `MarketDataProvider` - broker candles, quotes and option chains
//! - `GreeksCalculator` - options pricing
//! - `ManipulationStore` - trap history and cached index forecasts
//!
//! Submodules provide the TTL candle cache, the timeout/backoff fetcher and a
//! JSON snapshot provider for offline runs.

pub mod cache;
pub mod fetcher;
pub mod snapshot;

pub use cache::{CacheConfig, CacheStats, CandleCache, CandleKey};
pub use fetcher::{DataConfig, ResilientFetcher};
pub use snapshot::{InstrumentSnapshot, MarketSnapshot, SnapshotProvider};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::constituents::IndexPrediction;
use crate::error::{Error, Result};
use crate::market::{Candle, Timeframe};
use crate::strategy::{sort_events, ManipulationEvent, OptionType};

/// Market data source (broker API, snapshot file, test double)
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Ordered OHLCV bars with `from <= timestamp <= to`
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Last traded price
    async fn get_quote(&self, symbol: &str) -> Result<f64>;

    async fn get_option_chain(&self, symbol: &str) -> Result<OptionChain>;

    /// Near-month futures price of an index (optional)
    async fn get_futures_quote(&self, symbol: &str) -> Result<f64> {
        Err(Error::unavailable(format!("{} futures", symbol), "not supported by provider"))
    }
}

/// Option sensitivities and theoretical price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    #[serde(default)]
    pub gamma: f64,
    #[serde(default)]
    pub theta: f64,
    #[serde(default)]
    pub vega: f64,
    #[serde(default)]
    pub price: f64,
}

/// Options pricing collaborator
pub trait GreeksCalculator: Send + Sync {
    fn calculate_greeks(
        &self,
        spot: f64,
        strike: f64,
        time_to_expiry_years: f64,
        volatility: f64,
        option_type: OptionType,
    ) -> Option<Greeks>;
}

/// One contract of the option chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub option_type: OptionType,
    pub ltp: f64,
    #[serde(default)]
    pub oi: u64,
    #[serde(default)]
    pub volume: u64,
    /// Implied volatility as a fraction (0.14 = 14%)
    #[serde(default)]
    pub iv: Option<f64>,
    #[serde(default)]
    pub greeks: Option<Greeks>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    pub underlying: String,
    pub expiry: DateTime<Utc>,
    pub quotes: Vec<OptionQuote>,
}

impl OptionChain {
    pub fn of_type(&self, option_type: OptionType) -> impl Iterator<Item = &OptionQuote> {
        self.quotes.iter().filter(move |q| q.option_type == option_type)
    }
}

/// Persistence collaborator for trap history and index forecasts
#[async_trait]
pub trait ManipulationStore: Send + Sync {
    /// Events for `symbol` detected at or after `since`, newest first
    async fn recent_events(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ManipulationEvent>>;

    async fn record_event(&self, symbol: &str, event: ManipulationEvent) -> Result<()>;

    async fn store_prediction(&self, symbol: &str, prediction: IndexPrediction) -> Result<()>;

    async fn latest_prediction(&self, symbol: &str) -> Result<Option<IndexPrediction>>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<String, Vec<ManipulationEvent>>,
    predictions: DashMap<String, IndexPrediction>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self, symbol: &str) -> usize {
        self.events.get(symbol).map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ManipulationStore for InMemoryEventStore {
    async fn recent_events(&self, symbol: &str, since: DateTime<Utc>) -> Result<Vec<ManipulationEvent>> {
        let mut events: Vec<ManipulationEvent> = self
            .events
            .get(symbol)
            .map(|e| e.iter().filter(|ev| ev.detection_time >= since).cloned().collect())
            .unwrap_or_default();
        sort_events(&mut events);
        Ok(events)
    }

    async fn record_event(&self, symbol: &str, event: ManipulationEvent) -> Result<()> {
        let mut events = self.events.entry(symbol.to_string()).or_default();
        let duplicate = events.iter().any(|e| {
            e.manipulation_type == event.manipulation_type
                && e.detection_time == event.detection_time
                && (e.key_level - event.key_level).abs() <= f64::EPSILON
        });
        if !duplicate {
            events.push(event);
        }
        Ok(())
    }

    async fn store_prediction(&self, symbol: &str, prediction: IndexPrediction) -> Result<()> {
        self.predictions.insert(symbol.to_string(), prediction);
        Ok(())
    }

    async fn latest_prediction(&self, symbol: &str) -> Result<Option<IndexPrediction>> {
        Ok(self.predictions.get(symbol).map(|p| p.clone()))
    }
}
