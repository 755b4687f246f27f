//! Per-stock technical scoring
//!
//! Six weighted votes (RSI, EMA alignment, trend, VWAP, volume surge, MACD)
//! are split into a bullish and a bearish score. The up-move probability is
//! the bullish share; the expected move comes from a tier lookup on the
//! winning score, scaled by the regime multiplier.

use serde::{Deserialize, Serialize};

use crate::market::{closes, indicators, tail, Candle};
use crate::strategy::Direction;

/// Configuration for stock scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub rsi_weight: f64,
    pub ema_weight: f64,
    pub trend_weight: f64,
    pub vwap_weight: f64,
    pub volume_weight: f64,
    pub macd_weight: f64,
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    /// Bars between the compared closes of the trend vote
    pub trend_lookback: usize,
    pub vwap_period: usize,
    pub volume_period: usize,
    pub volume_surge_multiplier: f64,
    /// Winning-score floors of the move tiers, strongest first
    pub tier_scores: [f64; 3],
    /// Expected move (percent) of each tier
    pub tier_moves_pct: [f64; 3],
    /// Move when no tier is reached
    pub base_move_pct: f64,
    pub max_move_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rsi_weight: 20.0,
            ema_weight: 20.0,
            trend_weight: 20.0,
            vwap_weight: 15.0,
            volume_weight: 10.0,
            macd_weight: 15.0,
            rsi_period: 14,
            ema_fast: 9,
            ema_slow: 21,
            trend_lookback: 10,
            vwap_period: 20,
            volume_period: 20,
            volume_surge_multiplier: 1.5,
            tier_scores: [80.0, 60.0, 40.0],
            tier_moves_pct: [2.0, 1.2, 0.6],
            base_move_pct: 0.2,
            max_move_pct: 5.0,
        }
    }
}

impl ScoringConfig {
    pub fn total_weight(&self) -> f64 {
        self.rsi_weight
            + self.ema_weight
            + self.trend_weight
            + self.vwap_weight
            + self.volume_weight
            + self.macd_weight
    }
}

/// One vote of the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub direction: Direction,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockScore {
    pub symbol: String,
    pub bullish_score: f64,
    pub bearish_score: f64,
    #[serde(default)]
    pub components: Vec<ScoreComponent>,
}

impl StockScore {
    pub fn new(symbol: impl Into<String>, bullish_score: f64, bearish_score: f64) -> Self {
        Self {
            symbol: symbol.into(),
            bullish_score,
            bearish_score,
            components: Vec::new(),
        }
    }

    /// Up-move probability; 0.5 without any vote
    pub fn probability(&self) -> f64 {
        let total = self.bullish_score + self.bearish_score;
        if total <= f64::EPSILON {
            0.5
        } else {
            self.bullish_score / total
        }
    }

    pub fn winning_score(&self) -> f64 {
        self.bullish_score.max(self.bearish_score)
    }

    pub fn direction(&self) -> Direction {
        Direction::from_sign(self.bullish_score - self.bearish_score)
    }
}

pub struct StockScorer {
    config: ScoringConfig,
}

impl StockScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Bars needed before a stock can be scored (MACD 12/26/9 is the longest)
    pub fn min_history(&self) -> usize {
        (26 + 9)
            .max(self.config.ema_slow + 1)
            .max(self.config.rsi_period + 1)
            .max(self.config.trend_lookback + 1)
    }

    /// Score a daily series; None on short history
    pub fn score(&self, symbol: &str, candles: &[Candle]) -> Option<StockScore> {
        if candles.len() < self.min_history() {
            return None;
        }
        let c = &self.config;
        let closes = closes(candles);
        let last = candles.last()?;
        let price = last.close;
        let mut components = Vec::new();
        let mut vote = |name: &str, direction: Direction, points: f64| {
            if direction.is_directional() && points > 0.0 {
                components.push(ScoreComponent {
                    name: name.to_string(),
                    direction,
                    points,
                });
            }
        };

        // RSI: momentum band full weight, stretched readings half
        if let Some(rsi) = indicators::rsi(&closes, c.rsi_period) {
            let (direction, share) = match rsi {
                r if r > 70.0 => (Direction::Bullish, 0.5),
                r if r >= 55.0 => (Direction::Bullish, 1.0),
                r if r < 30.0 => (Direction::Bearish, 0.5),
                r if r <= 45.0 => (Direction::Bearish, 1.0),
                _ => (Direction::Neutral, 0.0),
            };
            vote("rsi", direction, c.rsi_weight * share);
        }

        // EMA alignment
        if let (Some(fast), Some(slow)) = (
            indicators::ema_last(&closes, c.ema_fast),
            indicators::ema_last(&closes, c.ema_slow),
        ) {
            let (direction, share) = if price > fast && fast > slow {
                (Direction::Bullish, 1.0)
            } else if price < fast && fast < slow {
                (Direction::Bearish, 1.0)
            } else if price > slow {
                (Direction::Bullish, 0.5)
            } else if price < slow {
                (Direction::Bearish, 0.5)
            } else {
                (Direction::Neutral, 0.0)
            };
            vote("ema_alignment", direction, c.ema_weight * share);
        }

        // Trend
        let past = closes[closes.len() - 1 - c.trend_lookback];
        vote("trend", Direction::from_sign(price - past), c.trend_weight);

        // VWAP position
        if let Some(vwap) = indicators::vwap(tail(candles, c.vwap_period)) {
            vote("vwap", Direction::from_sign(price - vwap), c.vwap_weight);
        }

        // Volume surge in the direction of the last bar
        let (prior, _) = candles.split_at(candles.len() - 1);
        let prior = tail(prior, c.volume_period);
        let volumes: Vec<f64> = prior.iter().map(|b| b.volume).collect();
        if let Some(avg) = indicators::mean(&volumes) {
            if avg > 0.0 && last.volume > avg * c.volume_surge_multiplier {
                vote("volume", Direction::from_sign(last.close - last.open), c.volume_weight);
            }
        }

        // MACD: fresh cross full weight, histogram side half
        if let Some(m) = indicators::macd(&closes, 12, 26, 9) {
            let (direction, share) = if m.crossed_up() {
                (Direction::Bullish, 1.0)
            } else if m.crossed_down() {
                (Direction::Bearish, 1.0)
            } else {
                (Direction::from_sign(m.histogram), 0.5)
            };
            vote("macd", direction, c.macd_weight * share);
        }

        let points = |d: Direction| -> f64 {
            components
                .iter()
                .filter(|comp| comp.direction == d)
                .map(|comp| comp.points)
                .sum()
        };
        Some(StockScore {
            symbol: symbol.to_string(),
            bullish_score: points(Direction::Bullish),
            bearish_score: points(Direction::Bearish),
            components,
        })
    }

    /// Magnitude of the expected move (percent) for a score under a regime multiplier
    pub fn expected_move_pct(&self, score: &StockScore, regime_multiplier: f64) -> f64 {
        let winning = score.winning_score();
        let c = &self.config;
        let base = c
            .tier_scores
            .iter()
            .zip(c.tier_moves_pct.iter())
            .find(|(floor, _)| winning >= **floor)
            .map(|(_, mv)| *mv)
            .unwrap_or(c.base_move_pct);
        (base * regime_multiplier).clamp(0.0, c.max_move_pct)
    }
}

impl Default for StockScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}
