//! Order block detection
//!
//! A bullish block is the last bearish candle before a displacement candle
//! that closes above it by at least `multiplier × body`. Bearish is symmetric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PatternConfig, Polarity};
use crate::market::{Candle, Timeframe};

/// An institutional footprint candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub ob_type: Polarity,
    pub high: f64,
    pub low: f64,
    pub timeframe: Timeframe,
    pub index: usize,
    /// Index of the displacement candle; tracking starts after it
    pub displacement_index: usize,
    pub created_at: DateTime<Utc>,
    pub tested: bool,
    pub test_count: u32,
    pub valid: bool,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl OrderBlock {
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn height(&self) -> f64 {
        self.high - self.low
    }

    /// Near boundary: the side price returns to first
    pub fn near_edge(&self) -> f64 {
        match self.ob_type {
            Polarity::Bullish => self.high,
            Polarity::Bearish => self.low,
        }
    }

    /// Defended level: bullish blocks hold at their low, bearish at their high
    pub fn defended_level(&self) -> f64 {
        match self.ob_type {
            Polarity::Bullish => self.low,
            Polarity::Bearish => self.high,
        }
    }

    pub fn distance_pct(&self, price: f64) -> f64 {
        if price.abs() <= f64::EPSILON {
            return f64::INFINITY;
        }
        (self.midpoint() - price).abs() / price * 100.0
    }
}

/// Order block detector
pub struct OrderBlockDetector {
    displacement_multiplier: f64,
    lookback: usize,
    max_results: usize,
}

impl OrderBlockDetector {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            displacement_multiplier: config.ob_displacement_multiplier,
            lookback: config.ob_lookback.max(1),
            max_results: config.ob_max_results,
        }
    }

    /// Valid blocks, most recent first
    pub fn detect(&self, candles: &[Candle], timeframe: Timeframe) -> Vec<OrderBlock> {
        let mut blocks: Vec<OrderBlock> = self
            .scan(candles, timeframe)
            .into_iter()
            .filter(|b| b.valid)
            .collect();
        blocks.sort_by(|a, b| b.index.cmp(&a.index));
        blocks.truncate(self.max_results);
        blocks
    }

    /// All blocks with revisit and invalidation tracking, chronological
    pub fn scan(&self, candles: &[Candle], timeframe: Timeframe) -> Vec<OrderBlock> {
        let mut blocks = self.candidates(candles, timeframe);

        // Tracking starts after the displacement candle; (block, inside)
        let mut tracked: Vec<(usize, bool)> = Vec::new();
        let mut next = 0;

        for (j, candle) in candles.iter().enumerate() {
            for (b, inside) in tracked.iter_mut() {
                let block = &mut blocks[*b];
                let broken = match block.ob_type {
                    Polarity::Bullish => candle.close < block.low,
                    Polarity::Bearish => candle.close > block.high,
                };
                if broken {
                    block.valid = false;
                    block.invalidated_at = Some(candle.timestamp);
                    continue;
                }
                let touched = candle.low <= block.high && candle.high >= block.low;
                if touched && !*inside {
                    block.tested = true;
                    block.test_count += 1;
                }
                *inside = touched;
            }
            tracked.retain(|(b, _)| blocks[*b].valid);

            while next < blocks.len() && blocks[next].displacement_index == j {
                tracked.push((next, false));
                next += 1;
            }
        }

        blocks
    }

    fn is_displacement(&self, ob: &Candle, disp: &Candle, polarity: Polarity) -> bool {
        let needed = self.displacement_multiplier * ob.body();
        match polarity {
            Polarity::Bullish => {
                disp.is_bullish() && disp.close > ob.high && disp.close - ob.high >= needed
            }
            Polarity::Bearish => {
                disp.is_bearish() && disp.close < ob.low && ob.low - disp.close >= needed
            }
        }
    }

    /// Pass 1: blocks ordered by displacement index
    fn candidates(&self, candles: &[Candle], timeframe: Timeframe) -> Vec<OrderBlock> {
        let mut blocks: Vec<OrderBlock> = Vec::new();

        for d in 1..candles.len() {
            let disp = &candles[d];
            let polarity = if disp.is_bullish() {
                Polarity::Bullish
            } else if disp.is_bearish() {
                Polarity::Bearish
            } else {
                continue;
            };

            // nearest opposite-colour candle before the displacement
            let start = d.saturating_sub(self.lookback);
            let ob_index = (start..d).rev().find(|&k| match polarity {
                Polarity::Bullish => candles[k].is_bearish(),
                Polarity::Bearish => candles[k].is_bullish(),
            });
            let Some(k) = ob_index else { continue };

            if !self.is_displacement(&candles[k], disp, polarity) {
                continue;
            }
            if blocks.iter().any(|b| b.index == k) {
                continue;
            }

            let ob = &candles[k];
            blocks.push(OrderBlock {
                ob_type: polarity,
                high: ob.high,
                low: ob.low,
                timeframe,
                index: k,
                displacement_index: d,
                created_at: ob.timestamp,
                tested: false,
                test_count: 0,
                valid: true,
                invalidated_at: None,
            });
        }

        blocks
    }
}
