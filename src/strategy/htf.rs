//! HTF Bias Engine
//!
//! Monthly and weekly structure decide the trading side. Each frame votes
//! three times (market structure, FVG imbalance, order block imbalance) and
//! the frames are combined by a timeframe-weighted mean.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Direction, PremiumDiscount};
use crate::market::{price_range, tail, Candle, CandleSet, Timeframe};
use crate::patterns::{
    find_swing_points, swing, FvgDetector, OrderBlockDetector, PatternConfig, Polarity,
};

/// Configuration for the HTF bias engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HtfConfig {
    /// Bars of the lowest HTF frame used for premium/discount
    pub range_lookback: usize,
    /// Weighted score needed for a directional bias
    pub directional_threshold: f64,
    /// Strength multiplier when a change of character opposes the bias
    pub choch_penalty: f64,
}

impl Default for HtfConfig {
    fn default() -> Self {
        Self {
            range_lookback: 20,
            directional_threshold: 25.0,
            choch_penalty: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStructure {
    Bullish,
    Bearish,
    Ranging,
}

impl MarketStructure {
    pub fn direction(&self) -> Direction {
        match self {
            MarketStructure::Bullish => Direction::Bullish,
            MarketStructure::Bearish => Direction::Bearish,
            MarketStructure::Ranging => Direction::Neutral,
        }
    }
}

/// Structure of one candle window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub structure: MarketStructure,
    /// Change of character: close broke the latest opposing swing
    pub choch: bool,
    pub last_swing_high: Option<f64>,
    pub last_swing_low: Option<f64>,
}

/// Classify higher-highs/higher-lows structure.
///
/// Uses the last two swing highs and lows; with fewer than two of either,
/// compares the extremes of the two halves of the window instead.
pub fn analyze_structure(candles: &[Candle], swing_lookback: usize) -> StructureAnalysis {
    let swings = find_swing_points(candles, swing_lookback);
    let highs: Vec<f64> = swing::swing_highs(&swings).map(|p| p.price).collect();
    let lows: Vec<f64> = swing::swing_lows(&swings).map(|p| p.price).collect();

    let last_swing_high = highs.last().copied();
    let last_swing_low = lows.last().copied();

    let structure = if highs.len() >= 2 && lows.len() >= 2 {
        let (h1, h2) = (highs[highs.len() - 2], highs[highs.len() - 1]);
        let (l1, l2) = (lows[lows.len() - 2], lows[lows.len() - 1]);
        classify(h2 > h1, l2 > l1, h2 < h1, l2 < l1)
    } else if candles.len() >= 2 {
        let (first, second) = candles.split_at(candles.len() / 2);
        match (price_range(first), price_range(second)) {
            (Some((l1, h1)), Some((l2, h2))) => classify(h2 > h1, l2 > l1, h2 < h1, l2 < l1),
            _ => MarketStructure::Ranging,
        }
    } else {
        MarketStructure::Ranging
    };

    let close = candles.last().map(|c| c.close);
    let choch = match (structure, close) {
        (MarketStructure::Bullish, Some(close)) => last_swing_low.is_some_and(|low| close < low),
        (MarketStructure::Bearish, Some(close)) => last_swing_high.is_some_and(|high| close > high),
        _ => false,
    };

    StructureAnalysis {
        structure,
        choch,
        last_swing_high,
        last_swing_low,
    }
}

fn classify(hh: bool, hl: bool, lh: bool, ll: bool) -> MarketStructure {
    if hh && hl {
        MarketStructure::Bullish
    } else if lh && ll {
        MarketStructure::Bearish
    } else {
        MarketStructure::Ranging
    }
}

/// Bias of one higher timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeBias {
    pub timeframe: Timeframe,
    pub direction: Direction,
    /// 0-100
    pub strength: f64,
    pub structure: StructureAnalysis,
    pub bullish_fvgs: usize,
    pub bearish_fvgs: usize,
    pub bullish_obs: usize,
    pub bearish_obs: usize,
}

impl TimeframeBias {
    pub fn signed_strength(&self) -> f64 {
        self.direction.sign() * self.strength
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyZoneKind {
    FairValueGap,
    OrderBlock,
}

/// HTF zone worth watching on lower frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyZone {
    pub kind: KeyZoneKind,
    pub polarity: Polarity,
    pub low: f64,
    pub high: f64,
    pub timeframe: Timeframe,
}

/// Combined higher-timeframe bias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtfBias {
    pub overall_direction: Direction,
    /// 0-100
    pub bias_strength: f64,
    pub premium_discount: PremiumDiscount,
    pub range_high: f64,
    pub range_low: f64,
    pub key_zones: Vec<KeyZone>,
    pub frames: Vec<TimeframeBias>,
}

impl HtfBias {
    /// Neutral bias used when no HTF data is available
    pub fn neutral(price: f64) -> Self {
        Self {
            overall_direction: Direction::Neutral,
            bias_strength: 0.0,
            premium_discount: PremiumDiscount::Discount,
            range_high: price,
            range_low: price,
            key_zones: Vec::new(),
            frames: Vec::new(),
        }
    }

    pub fn equilibrium(&self) -> f64 {
        (self.range_high + self.range_low) / 2.0
    }
}

/// HTF Bias Engine
pub struct HtfBiasEngine {
    config: HtfConfig,
    swing_lookback: usize,
    fvg: FvgDetector,
    ob: OrderBlockDetector,
}

impl HtfBiasEngine {
    pub fn new(config: HtfConfig, patterns: &PatternConfig) -> Self {
        Self {
            config,
            swing_lookback: patterns.swing_lookback,
            fvg: FvgDetector::new(patterns),
            ob: OrderBlockDetector::new(patterns),
        }
    }

    /// Frames used for the bias: Monthly/Weekly, else Daily
    pub fn frames(candles: &CandleSet) -> Vec<Timeframe> {
        let htf: Vec<Timeframe> = Timeframe::HTF
            .iter()
            .copied()
            .filter(|tf| candles.get(tf).is_some_and(|c| !c.is_empty()))
            .collect();
        if !htf.is_empty() {
            return htf;
        }
        match candles.get(&Timeframe::Daily) {
            Some(c) if !c.is_empty() => vec![Timeframe::Daily],
            _ => Vec::new(),
        }
    }

    /// Combined bias over the available higher timeframes
    pub fn analyze(&self, candles: &CandleSet, price: f64) -> HtfBias {
        let frames = Self::frames(candles);
        if frames.is_empty() {
            debug!("No HTF candles, bias neutral");
            return HtfBias::neutral(price);
        }

        let mut biases = Vec::with_capacity(frames.len());
        let (mut weighted, mut total_weight) = (0.0, 0.0);
        for tf in &frames {
            let Some(series) = candles.get(tf) else { continue };
            let bias = self.analyze_frame(*tf, series, price);
            weighted += tf.htf_weight() * bias.signed_strength();
            total_weight += tf.htf_weight();
            biases.push(bias);
        }

        let score = if total_weight > 0.0 { weighted / total_weight } else { 0.0 };
        let overall_direction = if score.abs() >= self.config.directional_threshold {
            Direction::from_sign(score)
        } else {
            Direction::Neutral
        };

        // lowest supplied frame sets the active range
        let lowest = frames.iter().max().copied().unwrap_or(Timeframe::Daily);
        let window = candles
            .get(&lowest)
            .map(|c| tail(c, self.config.range_lookback))
            .unwrap_or(&[]);
        let (range_low, range_high) = price_range(window).unwrap_or((price, price));
        let premium_discount = if price > (range_high + range_low) / 2.0 {
            PremiumDiscount::Premium
        } else {
            PremiumDiscount::Discount
        };

        let key_zones = candles
            .get(&lowest)
            .map(|c| self.key_zones(c, lowest, price))
            .unwrap_or_default();

        debug!(
            score = score,
            direction = %overall_direction,
            frames = biases.len(),
            "HTF bias computed"
        );

        HtfBias {
            overall_direction,
            bias_strength: score.abs().min(100.0),
            premium_discount,
            range_high,
            range_low,
            key_zones,
            frames: biases,
        }
    }

    /// Three-vote bias of a single frame
    pub fn analyze_frame(&self, timeframe: Timeframe, candles: &[Candle], price: f64) -> TimeframeBias {
        let structure = analyze_structure(candles, self.swing_lookback);

        let fvgs = self.fvg.detect(candles, timeframe, price);
        let bullish_fvgs = fvgs.iter().filter(|g| g.fvg_type == Polarity::Bullish).count();
        let bearish_fvgs = fvgs.len() - bullish_fvgs;

        let obs = self.ob.detect(candles, timeframe);
        let bullish_obs = obs.iter().filter(|b| b.ob_type == Polarity::Bullish).count();
        let bearish_obs = obs.len() - bullish_obs;

        let votes = [
            structure.structure.direction(),
            imbalance(bullish_fvgs, bearish_fvgs),
            imbalance(bullish_obs, bearish_obs),
        ];
        let bull = votes.iter().filter(|v| **v == Direction::Bullish).count() as f64;
        let bear = votes.iter().filter(|v| **v == Direction::Bearish).count() as f64;
        let margin = (bull - bear).abs();

        let direction = if bull >= 2.0 {
            Direction::Bullish
        } else if bear >= 2.0 {
            Direction::Bearish
        } else {
            Direction::Neutral
        };

        let mut strength = if direction.is_directional() {
            50.0 + 50.0 * margin / 3.0
        } else {
            50.0 * margin / 3.0
        };
        if structure.choch && structure.structure.direction() == direction {
            strength *= self.config.choch_penalty;
        }

        debug!(
            timeframe = %timeframe,
            structure = ?structure.structure,
            bull_votes = bull,
            bear_votes = bear,
            "HTF frame votes"
        );

        TimeframeBias {
            timeframe,
            direction,
            strength,
            structure,
            bullish_fvgs,
            bearish_fvgs,
            bullish_obs,
            bearish_obs,
        }
    }

    fn key_zones(&self, candles: &[Candle], timeframe: Timeframe, price: f64) -> Vec<KeyZone> {
        let gaps = self.fvg.detect(candles, timeframe, price).into_iter().map(|g| KeyZone {
            kind: KeyZoneKind::FairValueGap,
            polarity: g.fvg_type,
            low: g.low,
            high: g.high,
            timeframe,
        });
        let blocks = self.ob.detect(candles, timeframe).into_iter().map(|b| KeyZone {
            kind: KeyZoneKind::OrderBlock,
            polarity: b.ob_type,
            low: b.low,
            high: b.high,
            timeframe,
        });
        gaps.chain(blocks).collect()
    }
}

fn imbalance(bullish: usize, bearish: usize) -> Direction {
    match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Direction::Bullish,
        std::cmp::Ordering::Less => Direction::Bearish,
        std::cmp::Ordering::Equal => Direction::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    /// Steadily rising daily bars: each low clears the high two bars back
    fn rising_daily(n: usize, start: f64, step: f64) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        (0..n)
            .map(|i| {
                let low = start + step * i as f64;
                let high = low + step * 0.6;
                Candle::new(t0 + Duration::days(i as i64), low + step * 0.1, high, low, high - step * 0.1, 1.0e6)
            })
            .collect()
    }

    fn falling_daily(n: usize, start: f64, step: f64) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        (0..n)
            .map(|i| {
                let high = start - step * i as f64;
                let low = high - step * 0.6;
                Candle::new(t0 + Duration::days(i as i64), high - step * 0.1, high, low, low + step * 0.1, 1.0e6)
            })
            .collect()
    }

    fn engine() -> HtfBiasEngine {
        HtfBiasEngine::new(HtfConfig::default(), &PatternConfig::default())
    }

    #[test]
    fn test_rising_daily_bars_are_bullish() {
        let bars = rising_daily(10, 24000.0, 100.0);
        let price = bars.last().unwrap().close;
        let mut set = CandleSet::new();
        set.insert(Timeframe::Daily, bars);

        let bias = engine().analyze(&set, price);
        assert_eq!(bias.overall_direction, Direction::Bullish);
        assert!(bias.bias_strength > 50.0);
        assert_eq!(bias.premium_discount, PremiumDiscount::Premium);
    }

    #[test]
    fn test_falling_bars_are_bearish() {
        let bars = falling_daily(10, 25000.0, 100.0);
        let price = bars.last().unwrap().close;
        let mut set = CandleSet::new();
        set.insert(Timeframe::Weekly, bars);

        let bias = engine().analyze(&set, price);
        assert_eq!(bias.overall_direction, Direction::Bearish);
        assert_eq!(bias.premium_discount, PremiumDiscount::Discount);
    }

    #[test]
    fn test_no_data_is_neutral() {
        let bias = engine().analyze(&CandleSet::new(), 24000.0);
        assert_eq!(bias.overall_direction, Direction::Neutral);
        assert_eq!(bias.bias_strength, 0.0);
    }

    #[test]
    fn test_conflicting_frames_weighted_by_timeframe() {
        let mut set = CandleSet::new();
        set.insert(Timeframe::Monthly, rising_daily(10, 20000.0, 300.0));
        set.insert(Timeframe::Weekly, falling_daily(10, 23000.0, 100.0));
        let bias = engine().analyze(&set, 22500.0);
        let monthly = bias.frames.iter().find(|f| f.timeframe == Timeframe::Monthly).unwrap();
        let weekly = bias.frames.iter().find(|f| f.timeframe == Timeframe::Weekly).unwrap();
        let expected = (3.0 * monthly.signed_strength() + 2.0 * weekly.signed_strength()) / 5.0;
        assert!((bias.bias_strength - expected.abs()).abs() < 1e-9);
    }

    #[test]
    fn test_structure_from_swings() {
        // two rising swing highs and lows with N = 1
        let bars = crate::patterns::swing::tests::candles_from_hl(&[
            (100.0, 98.0),
            (103.0, 99.0),
            (101.0, 97.0),
            (105.0, 100.0),
            (103.0, 99.5),
            (104.0, 100.5),
        ]);
        let s = analyze_structure(&bars, 1);
        assert_eq!(s.structure, MarketStructure::Bullish);
        assert_eq!(s.last_swing_high, Some(105.0));
        assert!(!s.choch);
    }
}
