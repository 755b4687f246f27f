//! Signal Engine
//!
//! Async coordinator around the pure analysis pieces. Fetches every
//! timeframe concurrently through the candle cache, runs HTF, MTF, AMD,
//! entries, regime, confirmations and the constituent forecast, then hands
//! the assembled context to the composer.
//!
//! Any single fetch failing only degrades the component that needed it.
//! Only a missing spot price or a complete lack of candles is fatal.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::amd::{sort_events, AmdEngine, ManipulationEvent};
use super::composer::{FinalSignal, SignalComposer, SignalContext};
use super::confirmation::ConfirmationStack;
use super::entry::EntryZoneFinder;
use super::htf::HtfBiasEngine;
use super::mtf::MtfEngine;
use super::regime::{RegimeClassification, RegimeClassifier};
use crate::config::Config;
use crate::constituents::{ConstituentAggregator, IndexDefinition, IndexPrediction};
use crate::data::{
    CandleCache, CandleKey, GreeksCalculator, ManipulationStore, MarketDataProvider, ResilientFetcher,
};
use crate::error::{Error, Result};
use crate::market::{indicators, Candle, CandleSet, Timeframe};

/// ATR period for the fallback trade levels
const LEVEL_ATR_PERIOD: usize = 14;

/// Frames tried, in order, for the level ATR
const LEVEL_ATR_FRAMES: [Timeframe; 4] = [Timeframe::M15, Timeframe::M5, Timeframe::H1, Timeframe::M1];

/// Main signal engine
pub struct SignalEngine {
    index: IndexDefinition,
    fetcher: Arc<ResilientFetcher>,
    cache: Arc<CandleCache>,
    store: Arc<dyn ManipulationStore>,
    greeks: Option<Arc<dyn GreeksCalculator>>,

    // Analysis components
    htf: HtfBiasEngine,
    mtf: MtfEngine,
    amd: AmdEngine,
    entries: EntryZoneFinder,
    regime: RegimeClassifier,
    confirmation: ConfirmationStack,
    aggregator: ConstituentAggregator,
    composer: SignalComposer,
    /// Oldest stored forecast reused when the index lists no members
    forecast_max_age: Duration,
}

impl SignalEngine {
    /// Build every component once from the validated configuration
    pub fn new(
        config: &Config,
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn ManipulationStore>,
    ) -> Self {
        let fetcher = Arc::new(ResilientFetcher::new(provider, config.data.clone()));
        let cache = Arc::new(CandleCache::new(config.cache.clone()));
        Self {
            index: config.index.clone(),
            htf: HtfBiasEngine::new(config.htf.clone(), &config.patterns),
            mtf: MtfEngine::new(config.mtf.clone(), &config.patterns),
            amd: AmdEngine::new(config.amd.clone(), &config.patterns),
            entries: EntryZoneFinder::new(config.entry.clone(), &config.patterns),
            regime: RegimeClassifier::new(config.regime.clone()),
            confirmation: ConfirmationStack::new(config.confirmation.clone()),
            aggregator: ConstituentAggregator::new(config.aggregator.clone(), fetcher.clone(), cache.clone()),
            composer: SignalComposer::new(config.composer.clone())
                .with_freshness(Duration::minutes(config.amd.freshness_minutes)),
            forecast_max_age: Duration::minutes(config.aggregator.forecast_max_age_mins),
            fetcher,
            cache,
            store,
            greeks: None,
        }
    }

    /// Attach an options pricing collaborator for chains without greeks
    pub fn with_greeks(mut self, greeks: Arc<dyn GreeksCalculator>) -> Self {
        self.greeks = Some(greeks);
        self
    }

    pub fn index(&self) -> &IndexDefinition {
        &self.index
    }

    pub fn cache(&self) -> &Arc<CandleCache> {
        &self.cache
    }

    /// Compose the signal for the configured index at `at`
    pub async fn analyze(&self, at: DateTime<Utc>) -> Result<FinalSignal> {
        let symbol = self.index.symbol.as_str();
        info!(symbol = %symbol, at = %at, provider = self.fetcher.provider_name(), "Analyzing");

        // 1. Candles for every timeframe, concurrently
        let candles = self.fetch_candles(symbol, at).await;

        // 2. Spot price, falling back to the latest close
        let spot = self.spot_price(symbol, &candles).await?;
        if candles.is_empty() {
            return Err(Error::NoTimeframeData(symbol.to_string()));
        }

        // 3. Option chain and futures quote
        let (chain, futures) = tokio::join!(
            self.fetcher.option_chain(symbol),
            self.fetcher.futures_quote(self.index.futures_symbol()),
        );
        let option_chain = chain
            .map_err(|e| warn!(symbol = %symbol, error = %e, "Option chain unavailable"))
            .ok();
        let futures_price = futures
            .map_err(|e| debug!(symbol = %symbol, error = %e, "Futures quote unavailable"))
            .ok();

        // 4. Top-down structure
        let htf = self.htf.analyze(&candles, spot);
        let mtf = self.mtf.analyze(&candles, spot, at);
        let regime = candles.get(&Timeframe::Daily).map(|daily| self.regime.classify(daily));

        // 5. Traps: stored history plus fresh detections
        let events = self.merge_events(symbol, &candles, at).await;

        // 6. Entry zones
        let entries = self.entries.find(&candles, spot, &htf, mtf.as_ref());

        let mut ctx = SignalContext::new(symbol, spot, at, htf);
        ctx.mtf = mtf;
        ctx.entries = entries;
        ctx.events = events;
        ctx.option_chain = option_chain;
        ctx.atr = LEVEL_ATR_FRAMES
            .iter()
            .filter_map(|tf| candles.get(tf))
            .find_map(|series| indicators::atr(series, LEVEL_ATR_PERIOD));

        // 7. Confirmations, scored against the direction the pass will take
        let expected = self.composer.resolve_direction(&ctx).direction;
        ctx.confirmations = self.confirmation.evaluate(
            &candles,
            spot,
            futures_price,
            expected,
            ctx.htf.overall_direction,
        );

        // 8. Constituent forecast
        ctx.index_forecast = self.index_forecast(&candles, regime.as_ref(), at).await;
        ctx.regime = regime;

        // 9. Compose
        let signal = self.composer.compose(&ctx, self.greeks.as_deref());
        info!(
            symbol = %symbol,
            action = %signal.action,
            confidence = signal.confidence.total,
            level = ?signal.confidence.level,
            "Signal ready"
        );
        Ok(signal)
    }

    /// Constituent forecast only, for the configured index
    pub async fn predict_index(&self, at: DateTime<Utc>) -> Result<IndexPrediction> {
        let symbol = self.index.symbol.as_str();
        let daily = self.fetch_series(symbol, Timeframe::Daily, at).await?;
        let regime = self.regime.classify(&daily);
        Ok(self.aggregator.predict(&self.index, &daily, &regime, at).await)
    }

    /// All timeframes that could be fetched; failures are logged and left out
    pub async fn fetch_candles(&self, symbol: &str, at: DateTime<Utc>) -> CandleSet {
        let fetches = Timeframe::ALL.iter().map(|&tf| async move {
            (tf, self.fetch_series(symbol, tf, at).await)
        });
        let mut set = CandleSet::new();
        for (tf, result) in futures::future::join_all(fetches).await {
            match result {
                Ok(series) => {
                    set.insert(tf, series);
                }
                Err(e) => warn!(symbol = %symbol, timeframe = %tf, error = %e, "Timeframe unavailable"),
            }
        }
        debug!(symbol = %symbol, frames = set.len(), "Candles fetched");
        set
    }

    async fn fetch_series(&self, symbol: &str, timeframe: Timeframe, at: DateTime<Utc>) -> Result<Vec<Candle>> {
        let key = CandleKey::aligned(symbol, timeframe, timeframe.default_lookback(), at);
        self.cache
            .series_at(key, at, |from, to| self.fetcher.candles(symbol, timeframe, from, to))
            .await
    }

    async fn spot_price(&self, symbol: &str, candles: &CandleSet) -> Result<f64> {
        match self.fetcher.quote(symbol).await {
            Ok(price) if price.is_finite() && price > 0.0 => return Ok(price),
            Ok(price) => warn!(symbol = %symbol, price, "Ignoring invalid quote"),
            Err(e) => warn!(symbol = %symbol, error = %e, "Quote unavailable, using last close"),
        }
        candles
            .values()
            .filter_map(|series| series.last())
            .max_by_key(|c| c.timestamp)
            .map(|c| c.close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| Error::MissingSpotPrice(symbol.to_string()))
    }

    async fn merge_events(&self, symbol: &str, candles: &CandleSet, at: DateTime<Utc>) -> Vec<ManipulationEvent> {
        let since = at - self.amd.freshness();
        let mut events = match self.store.recent_events(symbol, since).await {
            Ok(events) => events,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Event history unavailable");
                Vec::new()
            }
        };
        // a replay must not see traps recorded by later runs
        events.retain(|e| e.detection_time <= at);

        for event in self.amd.detect(candles) {
            // candles beyond the decision time cannot have been seen
            if event.detection_time > at {
                continue;
            }
            let known = events.iter().any(|e| {
                e.manipulation_type == event.manipulation_type
                    && e.detection_time == event.detection_time
                    && (e.key_level - event.key_level).abs() <= f64::EPSILON
            });
            if known {
                continue;
            }
            if let Err(e) = self.store.record_event(symbol, event.clone()).await {
                warn!(symbol = %symbol, error = %e, "Failed to record trap");
            }
            events.push(event);
        }

        sort_events(&mut events);
        events
    }

    async fn index_forecast(
        &self,
        candles: &CandleSet,
        regime: Option<&RegimeClassification>,
        at: DateTime<Utc>,
    ) -> Option<IndexPrediction> {
        let symbol = self.index.symbol.as_str();
        if self.index.constituents.is_empty() {
            return match self.store.latest_prediction(symbol).await {
                Ok(Some(prediction)) if prediction.is_current(at, self.forecast_max_age) => Some(prediction),
                Ok(Some(prediction)) => {
                    debug!(
                        symbol = %symbol,
                        generated_at = %prediction.generated_at,
                        "Ignoring stored forecast outside the decision window"
                    );
                    None
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Stored forecast unavailable");
                    None
                }
            };
        }

        let (Some(daily), Some(regime)) = (candles.get(&Timeframe::Daily), regime) else {
            warn!(symbol = %symbol, "No daily series, skipping constituent forecast");
            return None;
        };
        let prediction = self.aggregator.predict(&self.index, daily, regime, at).await;
        if let Err(e) = self.store.store_prediction(symbol, prediction.clone()).await {
            warn!(symbol = %symbol, error = %e, "Failed to store forecast");
        }
        Some(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryEventStore, InstrumentSnapshot, MarketSnapshot, SnapshotProvider};
    use crate::strategy::amd::tests::{trap_event, trap_fixture};
    use crate::strategy::types::Action;
    use std::collections::HashMap;

    fn snapshot(instrument: Option<InstrumentSnapshot>) -> MarketSnapshot {
        let mut instruments = HashMap::new();
        if let Some(instrument) = instrument {
            instruments.insert("NIFTY".to_string(), instrument);
        }
        MarketSnapshot {
            as_of: None,
            instruments,
            events: Vec::new(),
        }
    }

    fn m15_only(quote: Option<f64>) -> InstrumentSnapshot {
        let mut candles = CandleSet::new();
        candles.insert(Timeframe::M15, trap_fixture());
        InstrumentSnapshot {
            quote,
            candles,
            ..Default::default()
        }
    }

    fn engine(snapshot: MarketSnapshot, store: Arc<InMemoryEventStore>) -> SignalEngine {
        engine_with(&Config::default(), snapshot, store)
    }

    fn engine_with(config: &Config, snapshot: MarketSnapshot, store: Arc<InMemoryEventStore>) -> SignalEngine {
        SignalEngine::new(config, Arc::new(SnapshotProvider::new(snapshot)), store)
    }

    fn decision_time() -> DateTime<Utc> {
        trap_event().detection_time + Duration::minutes(5)
    }

    #[tokio::test]
    async fn test_missing_price_and_candles_are_fatal() {
        let store = Arc::new(InMemoryEventStore::new());
        let err = engine(snapshot(None), store.clone())
            .analyze(decision_time())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingSpotPrice(_)));
        assert!(err.is_fatal());

        let quote_only = InstrumentSnapshot {
            quote: Some(24950.0),
            ..Default::default()
        };
        let err = engine(snapshot(Some(quote_only)), store)
            .analyze(decision_time())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTimeframeData(_)));
    }

    #[tokio::test]
    async fn test_spot_falls_back_to_last_close() {
        let store = Arc::new(InMemoryEventStore::new());
        let signal = engine(snapshot(Some(m15_only(None))), store)
            .analyze(decision_time())
            .await
            .unwrap();
        assert_eq!(signal.spot, 100.2);
        assert!(!signal.confirmations.ml.available);
    }

    #[tokio::test]
    async fn test_stored_trap_drives_the_signal() {
        let store = Arc::new(InMemoryEventStore::new());
        store.record_event("NIFTY", trap_event()).await.unwrap();

        let signal = engine(snapshot(Some(m15_only(Some(100.2)))), store.clone())
            .analyze(decision_time())
            .await
            .unwrap();
        assert_eq!(signal.action, Action::BuyCall);
        assert!(signal.ltf.manipulation.is_some());
        assert!(store.event_count("NIFTY") >= 1);
    }

    #[tokio::test]
    async fn test_candles_are_served_from_cache() {
        let store = Arc::new(InMemoryEventStore::new());
        let engine = engine(snapshot(Some(m15_only(Some(100.2)))), store);
        let at = decision_time();
        let first = engine.fetch_candles("NIFTY", at).await;
        let second = engine.fetch_candles("NIFTY", at).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!(engine.cache().stats().hits.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_decisions_a_second_apart_reuse_cached_series() {
        use std::sync::atomic::Ordering;

        let store = Arc::new(InMemoryEventStore::new());
        let engine = engine(snapshot(Some(m15_only(Some(100.2)))), store);
        let stats = engine.cache().stats();
        let at = decision_time();

        engine.analyze(at).await.unwrap();
        let entries = engine.cache().len();
        let hits = stats.hits.load(Ordering::Relaxed);

        engine.analyze(at + Duration::seconds(1)).await.unwrap();
        assert_eq!(engine.cache().len(), entries);
        assert!(stats.hits.load(Ordering::Relaxed) > hits);
    }

    #[tokio::test]
    async fn test_candles_after_decision_are_hidden() {
        let store = Arc::new(InMemoryEventStore::new());
        let engine = engine(snapshot(Some(m15_only(Some(100.2)))), store);
        let at = trap_event().detection_time - Duration::minutes(1);

        let set = engine.fetch_candles("NIFTY", at).await;
        let m15 = &set[&Timeframe::M15];
        assert_eq!(m15.len(), trap_fixture().len() - 1);
        assert!(m15.iter().all(|c| c.timestamp <= at));
    }

    #[tokio::test]
    async fn test_trap_recorded_after_decision_is_ignored() {
        let store = Arc::new(InMemoryEventStore::new());
        store.record_event("NIFTY", trap_event()).await.unwrap();

        let at = trap_event().detection_time - Duration::minutes(1);
        let signal = engine(snapshot(Some(m15_only(Some(100.2)))), store)
            .analyze(at)
            .await
            .unwrap();
        assert_eq!(signal.action, Action::Wait);
        assert!(signal.ltf.manipulation.is_none());
        assert!(!signal.ltf.manipulation_override);
    }

    #[tokio::test]
    async fn test_amd_window_governs_stored_traps() {
        let store = Arc::new(InMemoryEventStore::new());
        store.record_event("NIFTY", trap_event()).await.unwrap();

        let mut config = Config::default();
        config.amd.freshness_minutes = 3;
        let signal = engine_with(&config, snapshot(Some(m15_only(Some(100.2)))), store)
            .analyze(decision_time())
            .await
            .unwrap();
        assert!(signal.ltf.manipulation.is_none());
        assert!(!signal.ltf.manipulation_override);
    }

    #[tokio::test]
    async fn test_stored_forecast_must_match_decision_time() {
        use crate::constituents::combine;
        use crate::strategy::types::MarketRegime;

        let at = decision_time();
        let forecast = |generated_at| {
            combine(
                "NIFTY",
                generated_at,
                &[],
                MarketRegime::RangeBound,
                1.0,
                &Config::default().aggregator,
            )
        };

        for (generated_at, reused) in [
            (at - Duration::minutes(10), true),
            (at + Duration::minutes(1), false),
            (at - Duration::hours(3), false),
        ] {
            let store = Arc::new(InMemoryEventStore::new());
            store.store_prediction("NIFTY", forecast(generated_at)).await.unwrap();
            let signal = engine(snapshot(Some(m15_only(Some(100.2)))), store)
                .analyze(at)
                .await
                .unwrap();
            assert_eq!(signal.index_forecast.is_some(), reused, "generated at {}", generated_at);
        }
    }
}
