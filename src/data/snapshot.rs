//! JSON snapshot provider
//!
//! Serves candles, quotes and option chains from a captured market snapshot
//! so the engine can run offline and reproducibly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{MarketDataProvider, OptionChain};
use crate::error::{Error, Result};
use crate::market::{Candle, CandleSet, Timeframe};
use crate::strategy::ManipulationEvent;

/// Everything known about one instrument
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    #[serde(default)]
    pub quote: Option<f64>,
    #[serde(default)]
    pub futures_quote: Option<f64>,
    #[serde(default)]
    pub candles: CandleSet,
    #[serde(default)]
    pub option_chain: Option<OptionChain>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Decision time the snapshot was captured for
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub instruments: HashMap<String, InstrumentSnapshot>,
    /// Previously recorded traps, replayed into the event store
    #[serde(default)]
    pub events: Vec<ManipulationEvent>,
}

impl MarketSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    fn instrument(&self, symbol: &str) -> Result<&InstrumentSnapshot> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| Error::unavailable(symbol, "not in snapshot"))
    }
}

pub struct SnapshotProvider {
    snapshot: MarketSnapshot,
}

impl SnapshotProvider {
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(MarketSnapshot::load(path)?))
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }
}

#[async_trait]
impl MarketDataProvider for SnapshotProvider {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let series = self
            .snapshot
            .instrument(symbol)?
            .candles
            .get(&timeframe)
            .ok_or_else(|| Error::unavailable(format!("{} {}", symbol, timeframe), "no candles"))?;
        Ok(series
            .iter()
            .filter(|c| c.timestamp >= from && c.timestamp <= to)
            .copied()
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<f64> {
        self.snapshot
            .instrument(symbol)?
            .quote
            .ok_or_else(|| Error::unavailable(symbol, "no quote"))
    }

    async fn get_option_chain(&self, symbol: &str) -> Result<OptionChain> {
        self.snapshot
            .instrument(symbol)?
            .option_chain
            .clone()
            .ok_or_else(|| Error::unavailable(symbol, "no option chain"))
    }

    async fn get_futures_quote(&self, symbol: &str) -> Result<f64> {
        self.snapshot
            .instrument(symbol)?
            .futures_quote
            .ok_or_else(|| Error::unavailable(format!("{} futures", symbol), "no futures quote"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SNAPSHOT: &str = r#"{
        "as_of": "2024-06-03T05:00:00Z",
        "instruments": {
            "NIFTY": {
                "quote": 24950.0,
                "candles": {
                    "15m": [
                        {"timestamp": "2024-06-03T04:00:00Z", "open": 24910, "high": 24930, "low": 24900, "close": 24920, "volume": 0},
                        {"timestamp": "2024-06-03T04:15:00Z", "open": 24920, "high": 24960, "low": 24915, "close": 24950}
                    ]
                }
            }
        }
    }"#;

    #[tokio::test]
    async fn test_snapshot_serves_candles_in_range() {
        let provider = SnapshotProvider::new(MarketSnapshot::from_json(SNAPSHOT).unwrap());
        let from = Utc.with_ymd_and_hms(2024, 6, 3, 4, 10, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap();
        let candles = provider
            .get_historical_candles("NIFTY", Timeframe::M15, from, to)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 24950.0);
        assert_eq!(candles[0].volume, 0.0);
        assert_eq!(provider.get_quote("NIFTY").await.unwrap(), 24950.0);
        assert_eq!(
            provider.snapshot().as_of,
            Some(Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_missing_data_is_unavailable() {
        let provider = SnapshotProvider::new(MarketSnapshot::from_json(SNAPSHOT).unwrap());
        assert!(matches!(
            provider.get_futures_quote("NIFTY").await,
            Err(Error::DataUnavailable { .. })
        ));
        assert!(provider.get_quote("BANKNIFTY").await.is_err());
        assert!(provider.get_option_chain("NIFTY").await.is_err());
    }
}
