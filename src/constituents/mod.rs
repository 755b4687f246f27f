//! Constituent Probability Aggregator
//!
//! Scores every index member on its own daily chart and combines the
//! weighted probabilities into an independent index forecast:
//! - `scoring` - per-stock technical score, probability and expected move
//! - `aggregator` - bounded-concurrency fetch, correlation filter, weighting

pub mod aggregator;
pub mod scoring;

pub use aggregator::{combine, correlation_to_index, AggregatorConfig, ConstituentAggregator, ScoredStock};
pub use scoring::{ScoreComponent, ScoringConfig, StockScore, StockScorer};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::{Direction, MarketRegime};

/// One index member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constituent {
    pub symbol: String,
    /// Index weight; any positive scale, normalised before use
    pub weight: f64,
    #[serde(default = "default_sector")]
    pub sector: String,
}

fn default_sector() -> String {
    "Other".to_string()
}

impl Constituent {
    pub fn new(symbol: impl Into<String>, weight: f64, sector: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            weight,
            sector: sector.into(),
        }
    }
}

/// Index traded by the engine and its members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexDefinition {
    pub symbol: String,
    /// Symbol used for the futures basis quote; the index symbol when unset
    pub futures_symbol: Option<String>,
    pub constituents: Vec<Constituent>,
}

impl Default for IndexDefinition {
    fn default() -> Self {
        Self {
            symbol: "NIFTY".to_string(),
            futures_symbol: None,
            constituents: Vec::new(),
        }
    }
}

impl IndexDefinition {
    pub fn futures_symbol(&self) -> &str {
        self.futures_symbol.as_deref().unwrap_or(&self.symbol)
    }
}

/// Weights rescaled to sum to 1.0
pub fn normalize_weights(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= f64::EPSILON {
        return vec![0.0; weights.len()];
    }
    weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { w / total } else { 0.0 })
        .collect()
}

/// Forecast contribution of one stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSignal {
    pub symbol: String,
    pub sector: String,
    /// Normalised over the stocks that made it into the aggregate
    pub weight: f64,
    /// Probability of an up move (0-1)
    pub probability: f64,
    pub direction: Direction,
    /// Magnitude of the expected move (percent)
    pub expected_move_pct: f64,
    /// weight · (probability − 0.5) · 2 · expected move
    pub weighted_contribution: f64,
    pub correlation: Option<f64>,
    pub score: StockScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorBreakdown {
    pub sector: String,
    pub weight: f64,
    pub mean_probability: f64,
    pub contribution: f64,
    pub stocks: usize,
}

/// Index forecast built from its members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPrediction {
    pub index: String,
    /// Decision time the forecast was built for
    pub generated_at: DateTime<Utc>,
    pub expected_move_pct: f64,
    pub expected_direction: Direction,
    pub prob_up: f64,
    pub prob_down: f64,
    pub prob_neutral: f64,
    pub regime: MarketRegime,
    pub regime_multiplier: f64,
    pub stocks: Vec<StockSignal>,
    pub sectors: Vec<SectorBreakdown>,
    /// Members skipped for fetch failures or short history
    pub skipped: Vec<String>,
    /// Members dropped by the correlation filter
    pub filtered: Vec<String>,
}

impl IndexPrediction {
    /// Weight share of stocks leaning in `direction`
    pub fn probability_for(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Bullish => self.prob_up,
            Direction::Bearish => self.prob_down,
            Direction::Neutral => self.prob_neutral,
        }
    }

    /// Built at or before `at` and not older than `max_age`
    pub fn is_current(&self, at: DateTime<Utc>, max_age: Duration) -> bool {
        self.generated_at <= at && at - self.generated_at <= max_age
    }
}
