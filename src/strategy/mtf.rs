//! MTF Range/Phase Engine
//!
//! Locates price inside the 4H dealing range and tags the session phase
//! from exchange-local wall-clock time.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::htf::{analyze_structure, MarketStructure};
use super::types::Direction;
use crate::market::{price_range, tail, Candle, CandleSet, Timeframe};
use crate::patterns::{LiquidityDetector, LiquidityZone, PatternConfig};

/// Configuration for the MTF engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtfConfig {
    /// 4H bars spanning the dealing range
    pub range_lookback: usize,
    /// Bars averaged for the expansion check
    pub avg_range_period: usize,
    pub expansion_multiplier: f64,
    /// Exchange offset from UTC in minutes (IST = 330)
    pub utc_offset_minutes: i32,
}

impl Default for MtfConfig {
    fn default() -> Self {
        Self {
            range_lookback: 30,
            avg_range_period: 14,
            expansion_multiplier: 1.5,
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePosition {
    Upper,
    Mid,
    Lower,
}

impl RangePosition {
    /// Whether entering in `direction` from here buys cheap or sells dear
    pub fn favours(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (RangePosition::Lower, Direction::Bullish) | (RangePosition::Upper, Direction::Bearish)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    PreOpen,
    OpeningVolatility,
    Session,
    LunchLull,
    ClosingHour,
    Closed,
}

/// Session phase for an instant, given the exchange's UTC offset
pub fn session_phase(at: DateTime<Utc>, utc_offset_minutes: i32) -> SessionPhase {
    let local = (at + Duration::minutes(utc_offset_minutes as i64)).time();
    let minute = local.hour() * 60 + local.minute();

    match minute {
        m if m < 9 * 60 + 15 => SessionPhase::PreOpen,
        m if m < 9 * 60 + 45 => SessionPhase::OpeningVolatility,
        m if m < 12 * 60 => SessionPhase::Session,
        m if m < 13 * 60 + 30 => SessionPhase::LunchLull,
        m if m < 14 * 60 + 30 => SessionPhase::Session,
        m if m < 15 * 60 + 30 => SessionPhase::ClosingHour,
        _ => SessionPhase::Closed,
    }
}

/// Medium-timeframe context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtfAnalysis {
    pub timeframe: Timeframe,
    pub range_high: f64,
    pub range_low: f64,
    pub position: RangePosition,
    /// 0.0 at range low, 1.0 at range high
    pub position_ratio: f64,
    pub expansion: bool,
    pub session_phase: SessionPhase,
    pub daily_structure: Option<MarketStructure>,
    /// Liquidity swept on the range frame
    pub swept_zones: Vec<LiquidityZone>,
}

/// MTF Range/Phase Engine
pub struct MtfEngine {
    config: MtfConfig,
    swing_lookback: usize,
    liquidity: LiquidityDetector,
}

impl MtfEngine {
    pub fn new(config: MtfConfig, patterns: &PatternConfig) -> Self {
        Self {
            config,
            swing_lookback: patterns.swing_lookback,
            liquidity: LiquidityDetector::new(patterns),
        }
    }

    pub fn session_phase(&self, at: DateTime<Utc>) -> SessionPhase {
        session_phase(at, self.config.utc_offset_minutes)
    }

    /// None when neither 4H nor daily candles exist
    pub fn analyze(&self, candles: &CandleSet, price: f64, at: DateTime<Utc>) -> Option<MtfAnalysis> {
        let (timeframe, series) = [Timeframe::H4, Timeframe::Daily]
            .iter()
            .find_map(|tf| candles.get(tf).filter(|c| !c.is_empty()).map(|c| (*tf, c)))?;

        let window = tail(series, self.config.range_lookback);
        let (range_low, range_high) = price_range(window)?;
        let position_ratio = if range_high - range_low > f64::EPSILON {
            ((price - range_low) / (range_high - range_low)).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let position = position_from_ratio(position_ratio);

        let expansion = self.is_expanding(series);
        let daily_structure = candles
            .get(&Timeframe::Daily)
            .filter(|c| !c.is_empty())
            .map(|c| analyze_structure(c, self.swing_lookback).structure);
        let swept_zones = self
            .liquidity
            .detect(window, timeframe)
            .into_iter()
            .filter(|z| z.swept)
            .collect();

        let analysis = MtfAnalysis {
            timeframe,
            range_high,
            range_low,
            position,
            position_ratio,
            expansion,
            session_phase: self.session_phase(at),
            daily_structure,
            swept_zones,
        };
        debug!(
            timeframe = %timeframe,
            position = ?analysis.position,
            expansion = analysis.expansion,
            phase = ?analysis.session_phase,
            "MTF context"
        );
        Some(analysis)
    }

    /// Last bar's range exceeds the mean range of the preceding bars
    fn is_expanding(&self, candles: &[Candle]) -> bool {
        let n = self.config.avg_range_period;
        if n == 0 || candles.len() < n + 1 {
            return false;
        }
        let Some((last, prior)) = candles.split_last() else {
            return false;
        };
        let prior = tail(prior, n);
        let avg = prior.iter().map(|c| c.range()).sum::<f64>() / prior.len() as f64;
        avg > 0.0 && last.range() > avg * self.config.expansion_multiplier
    }
}

fn position_from_ratio(ratio: f64) -> RangePosition {
    if ratio < 1.0 / 3.0 {
        RangePosition::Lower
    } else if ratio <= 2.0 / 3.0 {
        RangePosition::Mid
    } else {
        RangePosition::Upper
    }
}
