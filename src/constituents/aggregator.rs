//! Constituent aggregator
//!
//! Fetches every member's daily history over a bounded worker pool (batches
//! with an inter-batch delay to respect the provider's request cap), drops
//! members that do not track the index, and combines the rest:
//!
//! index move = Σ wᵢ · (pᵢ − 0.5) · 2 · moveᵢ

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::scoring::{ScoringConfig, StockScore, StockScorer};
use super::{normalize_weights, Constituent, IndexDefinition, IndexPrediction, SectorBreakdown, StockSignal};
use crate::data::{CandleCache, CandleKey, ResilientFetcher};
use crate::error::Result;
use crate::market::{indicators, Candle, Timeframe};
use crate::strategy::{Direction, MarketRegime, RegimeClassification};

/// Configuration for the constituent aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Concurrent fetches per batch (3-10)
    pub max_workers: usize,
    /// Pause between batches (ms)
    pub batch_delay_ms: u64,
    /// Daily history fetched per stock
    pub history_days: i64,
    /// Members below this return correlation to the index are dropped
    pub min_correlation: f64,
    /// Return pairs needed before the correlation filter applies
    pub min_correlation_pairs: usize,
    /// Index move (percent) needed for a direction
    pub direction_threshold_pct: f64,
    /// Probability above which a stock counts as leaning up
    pub bullish_probability: f64,
    /// Probability below which a stock counts as leaning down
    pub bearish_probability: f64,
    /// Stored forecasts older than this are not reused
    pub forecast_max_age_mins: i64,
    pub scoring: ScoringConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            batch_delay_ms: 250,
            history_days: 120,
            min_correlation: 0.3,
            min_correlation_pairs: 10,
            direction_threshold_pct: 0.05,
            bullish_probability: 0.55,
            bearish_probability: 0.45,
            forecast_max_age_mins: 60,
            scoring: ScoringConfig::default(),
        }
    }
}

/// A member that survived fetching and scoring
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredStock {
    pub constituent: Constituent,
    pub score: StockScore,
    pub correlation: Option<f64>,
}

/// Combine scored members into the index forecast
pub fn combine(
    index: &str,
    at: DateTime<Utc>,
    stocks: &[ScoredStock],
    regime: MarketRegime,
    regime_multiplier: f64,
    config: &AggregatorConfig,
) -> IndexPrediction {
    let scorer = StockScorer::new(config.scoring.clone());
    let weights = normalize_weights(&stocks.iter().map(|s| s.constituent.weight).collect::<Vec<_>>());

    let signals: Vec<StockSignal> = stocks
        .iter()
        .zip(weights)
        .map(|(stock, weight)| {
            let probability = stock.score.probability();
            let expected_move_pct = scorer.expected_move_pct(&stock.score, regime_multiplier);
            StockSignal {
                symbol: stock.constituent.symbol.clone(),
                sector: stock.constituent.sector.clone(),
                weight,
                probability,
                direction: lean(probability, config),
                expected_move_pct,
                weighted_contribution: weight * (probability - 0.5) * 2.0 * expected_move_pct,
                correlation: stock.correlation,
                score: stock.score.clone(),
            }
        })
        .collect();

    let expected_move_pct: f64 = signals.iter().map(|s| s.weighted_contribution).sum();
    let expected_direction = if expected_move_pct > config.direction_threshold_pct {
        Direction::Bullish
    } else if expected_move_pct < -config.direction_threshold_pct {
        Direction::Bearish
    } else {
        Direction::Neutral
    };
    let share = |d: Direction| -> f64 { signals.iter().filter(|s| s.direction == d).map(|s| s.weight).sum() };

    IndexPrediction {
        index: index.to_string(),
        generated_at: at,
        expected_move_pct,
        expected_direction,
        prob_up: share(Direction::Bullish),
        prob_down: share(Direction::Bearish),
        prob_neutral: share(Direction::Neutral),
        regime,
        regime_multiplier,
        sectors: sector_breakdown(&signals),
        stocks: signals,
        skipped: Vec::new(),
        filtered: Vec::new(),
    }
}

fn lean(probability: f64, config: &AggregatorConfig) -> Direction {
    if probability > config.bullish_probability {
        Direction::Bullish
    } else if probability < config.bearish_probability {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

fn sector_breakdown(signals: &[StockSignal]) -> Vec<SectorBreakdown> {
    let mut sectors: BTreeMap<&str, SectorBreakdown> = BTreeMap::new();
    for s in signals {
        let entry = sectors.entry(s.sector.as_str()).or_insert_with(|| SectorBreakdown {
            sector: s.sector.clone(),
            weight: 0.0,
            mean_probability: 0.0,
            contribution: 0.0,
            stocks: 0,
        });
        entry.weight += s.weight;
        // weighted sum for now, divided below
        entry.mean_probability += s.weight * s.probability;
        entry.contribution += s.weighted_contribution;
        entry.stocks += 1;
    }
    sectors
        .into_values()
        .map(|mut b| {
            b.mean_probability = if b.weight > f64::EPSILON {
                b.mean_probability / b.weight
            } else {
                0.5
            };
            b
        })
        .collect()
}

/// Pearson correlation of daily returns on the dates both series share
pub fn correlation_to_index(stock: &[Candle], index: &[Candle], min_pairs: usize) -> Option<f64> {
    let by_date: HashMap<NaiveDate, f64> = index
        .iter()
        .map(|c| (c.timestamp.date_naive(), c.close))
        .collect();
    let (stock_closes, index_closes): (Vec<f64>, Vec<f64>) = stock
        .iter()
        .filter_map(|c| by_date.get(&c.timestamp.date_naive()).map(|&ic| (c.close, ic)))
        .unzip();

    let a = indicators::returns(&stock_closes);
    let b = indicators::returns(&index_closes);
    if a.len() != b.len() || a.len() < min_pairs {
        return None;
    }
    indicators::pearson(&a, &b)
}

pub struct ConstituentAggregator {
    config: AggregatorConfig,
    scorer: StockScorer,
    fetcher: Arc<ResilientFetcher>,
    cache: Arc<CandleCache>,
}

impl ConstituentAggregator {
    pub fn new(config: AggregatorConfig, fetcher: Arc<ResilientFetcher>, cache: Arc<CandleCache>) -> Self {
        Self {
            scorer: StockScorer::new(config.scoring.clone()),
            config,
            fetcher,
            cache,
        }
    }

    /// Forecast the index from its members. Failing members are skipped.
    pub async fn predict(
        &self,
        index: &IndexDefinition,
        index_daily: &[Candle],
        regime: &RegimeClassification,
        at: DateTime<Utc>,
    ) -> IndexPrediction {
        let workers = self.config.max_workers.max(1);
        let mut scored = Vec::new();
        let mut skipped = Vec::new();
        let mut filtered = Vec::new();

        for (batch_no, batch) in index.constituents.chunks(workers).enumerate() {
            if batch_no > 0 && self.config.batch_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.batch_delay_ms)).await;
            }

            let fetches = batch.iter().map(|c| self.fetch_daily(&c.symbol, at));
            let results = futures::future::join_all(fetches).await;

            for (constituent, result) in batch.iter().zip(results) {
                let candles = match result {
                    Ok(candles) => candles,
                    Err(e) => {
                        warn!(symbol = %constituent.symbol, error = %e, "Skipping constituent");
                        skipped.push(constituent.symbol.clone());
                        continue;
                    }
                };

                let correlation =
                    correlation_to_index(&candles, index_daily, self.config.min_correlation_pairs);
                if let Some(r) = correlation {
                    if r < self.config.min_correlation {
                        debug!(symbol = %constituent.symbol, correlation = r, "Below correlation floor");
                        filtered.push(constituent.symbol.clone());
                        continue;
                    }
                }

                match self.scorer.score(&constituent.symbol, &candles) {
                    Some(score) => scored.push(ScoredStock {
                        constituent: constituent.clone(),
                        score,
                        correlation,
                    }),
                    None => {
                        debug!(symbol = %constituent.symbol, bars = candles.len(), "Short history");
                        skipped.push(constituent.symbol.clone());
                    }
                }
            }
        }

        let mut prediction = combine(
            &index.symbol,
            at,
            &scored,
            regime.regime,
            regime.multiplier,
            &self.config,
        );
        prediction.skipped = skipped;
        prediction.filtered = filtered;

        info!(
            index = %index.symbol,
            expected_move = format!("{:+.3}%", prediction.expected_move_pct),
            direction = %prediction.expected_direction,
            regime = %prediction.regime,
            used = prediction.stocks.len(),
            skipped = prediction.skipped.len(),
            filtered = prediction.filtered.len(),
            "Constituent forecast"
        );
        prediction
    }

    async fn fetch_daily(&self, symbol: &str, at: DateTime<Utc>) -> Result<Vec<Candle>> {
        let history = Duration::days(self.config.history_days);
        let key = CandleKey::aligned(symbol, Timeframe::Daily, history, at);
        self.cache
            .series_at(key, at, |from, to| self.fetcher.candles(symbol, Timeframe::Daily, from, to))
            .await
    }
}
