//! LTF entry zones
//!
//! Three priority tiers; only the highest tier with a valid setup is
//! returned:
//! - Tier 1: FVG second test or order block retest near price
//! - Tier 2: HTF-aligned momentum (RSI band + EMA21 proximity)
//! - Tier 3: EMA9/EMA21 crossover near price

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::htf::HtfBias;
use super::mtf::{MtfAnalysis, RangePosition};
use super::types::Direction;
use crate::market::{closes, indicators, Candle, CandleSet, Timeframe};
use crate::patterns::{FvgDetector, OrderBlockDetector, PatternConfig};

/// Configuration for entry zone detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    /// Tier 1 zone must be within this % of price
    pub zone_proximity_pct: f64,
    /// Tier 2 price must be within this % of EMA21
    pub momentum_ema_proximity_pct: f64,
    /// Tier 3 price must be within this % of EMA21
    pub crossover_ema_proximity_pct: f64,
    pub rsi_period: usize,
    pub fast_ema: usize,
    pub slow_ema: usize,
    /// Bars in which a Tier 3 crossover counts
    pub crossover_lookback: usize,
    /// Base confidence per tier
    pub tier_confidence: [f64; 3],
    pub htf_alignment_bonus: f64,
    /// Minimum target distance per tier, % of entry
    pub target_floor_pct: [f64; 3],
    /// Stop beyond the zone by at least this % of entry
    pub stop_buffer_pct: f64,
    /// ...or this fraction of the zone height, whichever is larger
    pub stop_zone_fraction: f64,
    pub target_1_rr: f64,
    pub target_2_rr: f64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            zone_proximity_pct: 0.3,
            momentum_ema_proximity_pct: 0.3,
            crossover_ema_proximity_pct: 0.5,
            rsi_period: 14,
            fast_ema: 9,
            slow_ema: 21,
            crossover_lookback: 3,
            tier_confidence: [80.0, 65.0, 50.0],
            htf_alignment_bonus: 10.0,
            target_floor_pct: [0.10, 0.15, 0.20],
            stop_buffer_pct: 0.1,
            stop_zone_fraction: 0.1,
            target_1_rr: 1.5,
            target_2_rr: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTier {
    Tier1,
    Tier2,
    Tier3,
}

impl EntryTier {
    fn index(&self) -> usize {
        match self {
            EntryTier::Tier1 => 0,
            EntryTier::Tier2 => 1,
            EntryTier::Tier3 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    FvgSecondTest,
    OrderBlockRetest,
    HtfMomentum,
    EmaCrossover,
}

impl EntryType {
    /// Retest of an existing zone
    pub fn is_second_test(&self) -> bool {
        matches!(self, EntryType::FvgSecondTest | EntryType::OrderBlockRetest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryZone {
    pub entry_type: EntryType,
    pub tier: EntryTier,
    pub timeframe: Timeframe,
    pub zone_low: f64,
    pub zone_high: f64,
    pub trigger_price: f64,
    pub direction: Direction,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    /// 0-100
    pub confidence: f64,
    /// 0-100
    pub alignment_score: f64,
}

impl EntryZone {
    pub fn risk(&self) -> f64 {
        (self.trigger_price - self.stop_loss).abs()
    }
}

struct Setup {
    entry_type: EntryType,
    tier: EntryTier,
    timeframe: Timeframe,
    direction: Direction,
    zone_low: f64,
    zone_high: f64,
}

/// Finds the best-tier entry zones on the lower timeframes
pub struct EntryZoneFinder {
    config: EntryConfig,
    fvg: FvgDetector,
    ob: OrderBlockDetector,
}

impl EntryZoneFinder {
    pub fn new(config: EntryConfig, patterns: &PatternConfig) -> Self {
        Self {
            config,
            fvg: FvgDetector::new(patterns),
            ob: OrderBlockDetector::new(patterns),
        }
    }

    /// Zones of the highest tier that has a setup, best first
    pub fn find(
        &self,
        candles: &CandleSet,
        price: f64,
        htf: &HtfBias,
        mtf: Option<&MtfAnalysis>,
    ) -> Vec<EntryZone> {
        let mut setups: Vec<(Setup, &[Candle])> = Vec::new();
        for tf in Timeframe::LTF {
            let Some(series) = candles.get(&tf).filter(|c| !c.is_empty()) else {
                continue;
            };
            setups.extend(self.tier1(series, tf, price).into_iter().map(|s| (s, series.as_slice())));
            setups.extend(self.tier2(series, tf, price, htf.overall_direction).map(|s| (s, series.as_slice())));
            setups.extend(self.tier3(series, tf, price).map(|s| (s, series.as_slice())));
        }

        let Some(best_tier) = setups.iter().map(|(s, _)| s.tier).min() else {
            return Vec::new();
        };

        let mut zones: Vec<EntryZone> = setups
            .into_iter()
            .filter(|(s, _)| s.tier == best_tier)
            .map(|(s, series)| self.build(s, series, price, htf, mtf))
            .collect();
        zones.sort_by(|a, b| {
            b.alignment_score
                .total_cmp(&a.alignment_score)
                .then(b.confidence.total_cmp(&a.confidence))
        });

        debug!(tier = ?best_tier, zones = zones.len(), "Entry zones found");
        zones
    }

    fn near_zone(&self, low: f64, high: f64, price: f64) -> bool {
        let distance = if price < low {
            low - price
        } else if price > high {
            price - high
        } else {
            0.0
        };
        price > 0.0 && distance / price * 100.0 <= self.config.zone_proximity_pct
    }

    fn tier1(&self, candles: &[Candle], tf: Timeframe, price: f64) -> Vec<Setup> {
        let gaps = self
            .fvg
            .detect(candles, tf, price)
            .into_iter()
            .filter(|g| g.test_count >= 2 && self.near_zone(g.low, g.high, price))
            .map(|g| Setup {
                entry_type: EntryType::FvgSecondTest,
                tier: EntryTier::Tier1,
                timeframe: tf,
                direction: g.fvg_type.into(),
                zone_low: g.low,
                zone_high: g.high,
            });
        let blocks = self
            .ob
            .detect(candles, tf)
            .into_iter()
            .filter(|b| b.test_count >= 1 && self.near_zone(b.low, b.high, price))
            .map(|b| Setup {
                entry_type: EntryType::OrderBlockRetest,
                tier: EntryTier::Tier1,
                timeframe: tf,
                direction: b.ob_type.into(),
                zone_low: b.low,
                zone_high: b.high,
            });
        gaps.chain(blocks).collect()
    }

    fn tier2(&self, candles: &[Candle], tf: Timeframe, price: f64, htf: Direction) -> Option<Setup> {
        if !htf.is_directional() {
            return None;
        }
        let closes = closes(candles);
        let rsi = indicators::rsi(&closes, self.config.rsi_period)?;
        let ema21 = indicators::ema_last(&closes, self.config.slow_ema)?;

        let in_band = match htf {
            Direction::Bullish => (50.0..=70.0).contains(&rsi),
            Direction::Bearish => (30.0..=50.0).contains(&rsi),
            Direction::Neutral => false,
        };
        let near = (price - ema21).abs() / price * 100.0 <= self.config.momentum_ema_proximity_pct;
        (in_band && near).then(|| Setup {
            entry_type: EntryType::HtfMomentum,
            tier: EntryTier::Tier2,
            timeframe: tf,
            direction: htf,
            zone_low: price.min(ema21),
            zone_high: price.max(ema21),
        })
    }

    fn tier3(&self, candles: &[Candle], tf: Timeframe, price: f64) -> Option<Setup> {
        let closes = closes(candles);
        let (fast, slow) = self.aligned_emas(&closes)?;
        let n = slow.len();
        let lookback = self.config.crossover_lookback.min(n.saturating_sub(1));
        if lookback == 0 {
            return None;
        }

        let trend = |i: usize| trend_of(fast[i], slow[i]);
        let crossed = (n - lookback..n).any(|i| trend(i).is_directional() && trend(i) != trend(i - 1));
        let ema21 = slow[n - 1];
        let near = (price - ema21).abs() / price * 100.0 <= self.config.crossover_ema_proximity_pct;
        if !crossed || !near {
            return None;
        }

        let direction = trend(n - 1);
        direction.is_directional().then(|| Setup {
            entry_type: EntryType::EmaCrossover,
            tier: EntryTier::Tier3,
            timeframe: tf,
            direction,
            zone_low: price.min(ema21),
            zone_high: price.max(ema21),
        })
    }

    /// EMA9 and EMA21 trimmed to the same bars
    fn aligned_emas(&self, closes: &[f64]) -> Option<(Vec<f64>, Vec<f64>)> {
        let fast = indicators::ema(closes, self.config.fast_ema);
        let slow = indicators::ema(closes, self.config.slow_ema);
        if slow.is_empty() || fast.len() < slow.len() {
            return None;
        }
        let offset = fast.len() - slow.len();
        Some((fast[offset..].to_vec(), slow))
    }

    fn build(
        &self,
        setup: Setup,
        candles: &[Candle],
        price: f64,
        htf: &HtfBias,
        mtf: Option<&MtfAnalysis>,
    ) -> EntryZone {
        let cfg = &self.config;
        let tier = setup.tier.index();
        let sign = setup.direction.sign();

        let entry = price.clamp(setup.zone_low, setup.zone_high);
        let buffer = (entry * cfg.stop_buffer_pct / 100.0)
            .max((setup.zone_high - setup.zone_low) * cfg.stop_zone_fraction);
        let stop_loss = match setup.direction {
            Direction::Bearish => setup.zone_high + buffer,
            _ => setup.zone_low - buffer,
        };
        let risk = (entry - stop_loss).abs();
        let floor = entry * cfg.target_floor_pct[tier] / 100.0;
        let target_1 = entry + sign * (cfg.target_1_rr * risk).max(floor);
        let target_2 = entry + sign * (cfg.target_2_rr * risk).max(2.0 * floor);

        let mut confidence = cfg.tier_confidence[tier];
        if setup.direction.agrees_with(htf.overall_direction) {
            confidence += cfg.htf_alignment_bonus;
        }

        EntryZone {
            entry_type: setup.entry_type,
            tier: setup.tier,
            timeframe: setup.timeframe,
            zone_low: setup.zone_low,
            zone_high: setup.zone_high,
            trigger_price: entry,
            direction: setup.direction,
            stop_loss,
            target_1,
            target_2,
            confidence: confidence.min(100.0),
            alignment_score: self.alignment(setup.direction, candles, htf, mtf),
        }
    }

    /// HTF agreement 40 (neutral 20) + MTF position 30 (mid 15) + LTF trend 30
    fn alignment(&self, direction: Direction, candles: &[Candle], htf: &HtfBias, mtf: Option<&MtfAnalysis>) -> f64 {
        let htf_score = if direction.agrees_with(htf.overall_direction) {
            40.0
        } else if htf.overall_direction == Direction::Neutral {
            20.0
        } else {
            0.0
        };

        let mtf_score = match mtf.map(|m| m.position) {
            Some(RangePosition::Mid) => 15.0,
            Some(pos) if pos.favours(direction) => 30.0,
            _ => 0.0,
        };

        let closes = closes(candles);
        let ltf_trend = self
            .aligned_emas(&closes)
            .and_then(|(fast, slow)| Some(trend_of(*fast.last()?, *slow.last()?)))
            .unwrap_or(Direction::Neutral);
        let ltf_score = if direction.agrees_with(ltf_trend) { 30.0 } else { 0.0 };

        htf_score + mtf_score + ltf_score
    }
}

/// Fast-vs-slow EMA trend, flat inside float noise
fn trend_of(fast: f64, slow: f64) -> Direction {
    let diff = fast - slow;
    if diff.abs() <= slow.abs() * 1e-9 {
        Direction::Neutral
    } else {
        Direction::from_sign(diff)
    }
}
