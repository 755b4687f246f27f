//! Candlestick pattern scanner
//!
//! A compact set of single-, two- and three-bar patterns used as a
//! confirmation vote. Thresholds are ratios of the candle's own range.

use serde::{Deserialize, Serialize};

use super::Polarity;
use crate::market::Candle;

/// Body at or below this share of the range is a doji
const DOJI_BODY_RATIO: f64 = 0.1;
/// Body at or above this share of the range is a marubozu
const MARUBOZU_BODY_RATIO: f64 = 0.9;
/// Opposite shadow of a hammer / shooting star stays below this share
const SHORT_SHADOW_RATIO: f64 = 0.25;
/// Long shadow must be at least this multiple of the body
const LONG_SHADOW_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    BullishEngulfing,
    BearishEngulfing,
    Hammer,
    ShootingStar,
    MorningStar,
    EveningStar,
    BullishMarubozu,
    BearishMarubozu,
    Doji,
}

impl CandlePattern {
    /// Directional vote of the pattern; doji is indecision
    pub fn polarity(&self) -> Option<Polarity> {
        match self {
            CandlePattern::BullishEngulfing
            | CandlePattern::Hammer
            | CandlePattern::MorningStar
            | CandlePattern::BullishMarubozu => Some(Polarity::Bullish),
            CandlePattern::BearishEngulfing
            | CandlePattern::ShootingStar
            | CandlePattern::EveningStar
            | CandlePattern::BearishMarubozu => Some(Polarity::Bearish),
            CandlePattern::Doji => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: CandlePattern,
    /// Index of the last bar of the pattern
    pub index: usize,
}

impl PatternMatch {
    pub fn polarity(&self) -> Option<Polarity> {
        self.pattern.polarity()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandlestickScanner;

impl CandlestickScanner {
    pub fn new() -> Self {
        Self
    }

    /// Patterns ending on any of the last `bars` candles
    pub fn scan_recent(&self, candles: &[Candle], bars: usize) -> Vec<PatternMatch> {
        let start = candles.len().saturating_sub(bars);
        (start..candles.len())
            .flat_map(|i| self.detect_at(candles, i))
            .collect()
    }

    /// Every pattern ending at `index`
    pub fn detect_at(&self, candles: &[Candle], index: usize) -> Vec<PatternMatch> {
        let Some(bar) = candles.get(index) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut push = |pattern| found.push(PatternMatch { pattern, index });

        let range = bar.range();
        if range > f64::EPSILON {
            let body = bar.body();
            let ratio = body / range;
            if ratio <= DOJI_BODY_RATIO {
                push(CandlePattern::Doji);
            } else if ratio >= MARUBOZU_BODY_RATIO {
                push(if bar.is_bullish() {
                    CandlePattern::BullishMarubozu
                } else {
                    CandlePattern::BearishMarubozu
                });
            } else {
                if bar.lower_shadow() >= LONG_SHADOW_FACTOR * body
                    && bar.upper_shadow() <= SHORT_SHADOW_RATIO * range
                {
                    push(CandlePattern::Hammer);
                }
                if bar.upper_shadow() >= LONG_SHADOW_FACTOR * body
                    && bar.lower_shadow() <= SHORT_SHADOW_RATIO * range
                {
                    push(CandlePattern::ShootingStar);
                }
            }
        }

        if index >= 1 {
            if let Some(p) = engulfing(&candles[index - 1], bar) {
                push(p);
            }
        }
        if index >= 2 {
            if let Some(p) = star(&candles[index - 2], &candles[index - 1], bar) {
                push(p);
            }
        }
        found
    }
}

fn engulfing(prev: &Candle, curr: &Candle) -> Option<CandlePattern> {
    if curr.is_bullish() && prev.is_bearish() && curr.close >= prev.open && curr.open <= prev.close
        && curr.body() > prev.body()
    {
        return Some(CandlePattern::BullishEngulfing);
    }
    if curr.is_bearish() && prev.is_bullish() && curr.close <= prev.open && curr.open >= prev.close
        && curr.body() > prev.body()
    {
        return Some(CandlePattern::BearishEngulfing);
    }
    None
}

fn star(first: &Candle, middle: &Candle, last: &Candle) -> Option<CandlePattern> {
    let first_mid = (first.open + first.close) / 2.0;
    let small_middle = middle.body() <= 0.5 * first.body();
    if !small_middle || first.body() <= f64::EPSILON {
        return None;
    }
    if first.is_bearish() && last.is_bullish() && last.close > first_mid {
        return Some(CandlePattern::MorningStar);
    }
    if first.is_bullish() && last.is_bearish() && last.close < first_mid {
        return Some(CandlePattern::EveningStar);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(), o, h, l, c, 100.0)
    }

    fn patterns(candles: &[Candle]) -> Vec<CandlePattern> {
        CandlestickScanner::new()
            .detect_at(candles, candles.len() - 1)
            .into_iter()
            .map(|m| m.pattern)
            .collect()
    }

    #[test]
    fn test_bullish_engulfing() {
        let candles = vec![bar(101.0, 101.2, 99.8, 100.0), bar(99.9, 102.0, 99.7, 101.6)];
        assert!(patterns(&candles).contains(&CandlePattern::BullishEngulfing));
    }

    #[test]
    fn test_bearish_engulfing() {
        let candles = vec![bar(100.0, 101.2, 99.8, 101.0), bar(101.1, 101.3, 98.9, 99.2)];
        assert!(patterns(&candles).contains(&CandlePattern::BearishEngulfing));
    }

    #[test]
    fn test_hammer_and_shooting_star() {
        assert_eq!(patterns(&[bar(100.0, 100.6, 97.0, 100.5)]), vec![CandlePattern::Hammer]);
        assert_eq!(
            patterns(&[bar(100.5, 103.5, 99.9, 100.0)]),
            vec![CandlePattern::ShootingStar]
        );
    }

    #[test]
    fn test_doji_has_no_polarity() {
        let found = patterns(&[bar(100.0, 101.0, 99.0, 100.05)]);
        assert_eq!(found, vec![CandlePattern::Doji]);
        assert_eq!(CandlePattern::Doji.polarity(), None);
    }

    #[test]
    fn test_morning_star() {
        let candles = vec![
            bar(105.0, 105.2, 100.8, 101.0),
            bar(100.8, 101.0, 100.0, 100.5),
            bar(100.6, 104.2, 100.4, 104.0),
        ];
        assert!(patterns(&candles).contains(&CandlePattern::MorningStar));
    }

    #[test]
    fn test_scan_recent_limits_window() {
        let candles = vec![
            bar(100.0, 100.6, 97.0, 100.5),
            bar(100.0, 101.0, 99.0, 100.05),
            bar(100.0, 101.0, 99.0, 100.05),
            bar(100.0, 101.0, 99.0, 100.05),
        ];
        let found = CandlestickScanner::new().scan_recent(&candles, 3);
        assert!(found.iter().all(|m| m.index >= 1));
        assert!(!found.iter().any(|m| m.pattern == CandlePattern::Hammer));
    }
}
