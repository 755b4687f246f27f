//! Fair Value Gap detection
//!
//! Two passes: candidates are collected from consecutive candle triples,
//! then one forward scan over the candles annotates every open gap with its
//! tests and fill.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PatternConfig, Polarity};
use crate::market::{Candle, Timeframe};

/// Lifecycle of a gap. Only moves forward; `Filled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FvgStatus {
    Active,
    TestedOnce,
    TestedTwice,
    Filled,
}

/// A three-candle imbalance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    pub fvg_type: Polarity,
    pub high: f64,
    pub low: f64,
    pub midpoint: f64,
    pub timeframe: Timeframe,
    /// Index of the third candle of the triple
    pub index: usize,
    pub created_at: DateTime<Utc>,
    pub test_count: u32,
    pub first_test_at: Option<DateTime<Utc>>,
    pub second_test_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub status: FvgStatus,
}

impl FairValueGap {
    fn new(fvg_type: Polarity, high: f64, low: f64, timeframe: Timeframe, index: usize, created_at: DateTime<Utc>) -> Self {
        Self {
            fvg_type,
            high,
            low,
            midpoint: (high + low) / 2.0,
            timeframe,
            index,
            created_at,
            test_count: 0,
            first_test_at: None,
            second_test_at: None,
            filled_at: None,
            status: FvgStatus::Active,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.status == FvgStatus::Filled
    }

    /// Second (or later) test of an unfilled gap
    pub fn is_second_test(&self) -> bool {
        self.status == FvgStatus::TestedTwice
    }

    pub fn height(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    /// Record a test; ignored once filled
    pub fn record_test(&mut self, at: DateTime<Utc>) {
        if self.is_filled() {
            return;
        }
        self.test_count += 1;
        match self.status {
            FvgStatus::Active => {
                self.status = FvgStatus::TestedOnce;
                self.first_test_at = Some(at);
            }
            FvgStatus::TestedOnce => {
                self.status = FvgStatus::TestedTwice;
                self.second_test_at = Some(at);
            }
            FvgStatus::TestedTwice | FvgStatus::Filled => {}
        }
    }

    pub fn mark_filled(&mut self, at: DateTime<Utc>) {
        if !self.is_filled() {
            self.status = FvgStatus::Filled;
            self.filled_at = Some(at);
        }
    }

    /// Distance of the midpoint from `price`, in percent of price
    pub fn distance_pct(&self, price: f64) -> f64 {
        if price.abs() <= f64::EPSILON {
            return f64::INFINITY;
        }
        (self.midpoint - price).abs() / price * 100.0
    }
}

/// Fair Value Gap detector
pub struct FvgDetector {
    proximity_pct: f64,
    max_results: usize,
}

impl FvgDetector {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            proximity_pct: config.fvg_proximity_pct,
            max_results: config.fvg_max_results,
        }
    }

    /// Unfilled gaps near `current_price`, most recent first
    pub fn detect(&self, candles: &[Candle], timeframe: Timeframe, current_price: f64) -> Vec<FairValueGap> {
        let mut gaps: Vec<FairValueGap> = scan(candles, timeframe)
            .into_iter()
            .filter(|g| !g.is_filled() && g.distance_pct(current_price) <= self.proximity_pct)
            .collect();
        gaps.sort_by(|a, b| b.index.cmp(&a.index));
        gaps.truncate(self.max_results);
        gaps
    }
}

/// Pass 1: gap candidates in chronological order
fn candidates(candles: &[Candle], timeframe: Timeframe) -> Vec<FairValueGap> {
    candles
        .windows(3)
        .enumerate()
        .filter_map(|(i, w)| {
            let (c1, c3) = (&w[0], &w[2]);
            if c3.low > c1.high {
                Some(FairValueGap::new(Polarity::Bullish, c3.low, c1.high, timeframe, i + 2, c3.timestamp))
            } else if c3.high < c1.low {
                Some(FairValueGap::new(Polarity::Bearish, c1.low, c3.high, timeframe, i + 2, c3.timestamp))
            } else {
                None
            }
        })
        .collect()
}

/// All gaps annotated with tests and fills, chronological
pub fn scan(candles: &[Candle], timeframe: Timeframe) -> Vec<FairValueGap> {
    let mut gaps = candidates(candles, timeframe);
    if gaps.is_empty() {
        return gaps;
    }

    // Pass 2: one forward scan, each open gap tracks whether price is inside it
    let mut open: Vec<(usize, bool)> = Vec::new();
    let mut next = 0;

    for (j, candle) in candles.iter().enumerate() {
        for (g, inside) in open.iter_mut() {
            let gap = &mut gaps[*g];
            let (filled, touched) = match gap.fvg_type {
                Polarity::Bullish => (candle.close < gap.low, candle.low <= gap.high),
                Polarity::Bearish => (candle.close > gap.high, candle.high >= gap.low),
            };
            if filled {
                gap.mark_filled(candle.timestamp);
                continue;
            }
            if touched && !*inside {
                gap.record_test(candle.timestamp);
            }
            *inside = touched;
        }
        open.retain(|(g, _)| !gaps[*g].is_filled());

        while next < gaps.len() && gaps[next].index == j {
            open.push((next, false));
            next += 1;
        }
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bars(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Candle::new(start + Duration::minutes(15 * i as i64), o, h, l, c, 1000.0))
            .collect()
    }

    #[test]
    fn test_bullish_gap_detected() {
        let candles = bars(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 104.0, 100.4, 103.8),
            (103.8, 105.0, 102.0, 104.5),
        ]);
        let gaps = scan(&candles, Timeframe::M15);
        assert_eq!(gaps.len(), 1);
        let g = &gaps[0];
        assert_eq!(g.fvg_type, Polarity::Bullish);
        assert_eq!(g.low, 101.0);
        assert_eq!(g.high, 102.0);
        assert_eq!(g.midpoint, 101.5);
        assert_eq!(g.status, FvgStatus::Active);
    }

    #[test]
    fn test_bearish_gap_detected() {
        let candles = bars(&[
            (105.0, 106.0, 104.0, 104.5),
            (104.5, 104.6, 101.0, 101.2),
            (101.2, 102.0, 100.0, 100.5),
        ]);
        let gaps = scan(&candles, Timeframe::M15);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].fvg_type, Polarity::Bearish);
        assert_eq!(gaps[0].high, 104.0);
        assert_eq!(gaps[0].low, 102.0);
    }

    #[test]
    fn test_two_tests_then_fill() {
        let candles = bars(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 104.0, 100.4, 103.8),
            (103.8, 105.0, 102.0, 104.5), // gap [101, 102]
            (104.5, 106.0, 104.0, 105.5),
            (105.5, 105.6, 101.8, 103.0), // first test
            (103.0, 104.5, 102.5, 104.0), // leaves
            (104.0, 104.2, 101.5, 102.8), // second test
            (102.8, 103.0, 99.0, 100.0),  // closes below the gap -> filled
            (100.0, 102.0, 99.5, 101.5),  // no further mutation
        ]);
        let gaps = scan(&candles, Timeframe::M15);
        let g = &gaps[0];
        assert_eq!(g.status, FvgStatus::Filled);
        assert_eq!(g.test_count, 2);
        assert_eq!(g.first_test_at, Some(candles[4].timestamp));
        assert_eq!(g.second_test_at, Some(candles[6].timestamp));
        assert_eq!(g.filled_at, Some(candles[7].timestamp));
    }

    #[test]
    fn test_consecutive_candles_inside_count_once() {
        let candles = bars(&[
            (100.0, 101.0, 99.0, 100.5),
            (100.5, 104.0, 100.4, 103.8),
            (103.8, 105.0, 102.0, 104.5),
            (104.5, 104.6, 101.6, 102.2),
            (102.2, 102.5, 101.4, 101.9),
        ]);
        let gaps = scan(&candles, Timeframe::M15);
        assert_eq!(gaps[0].test_count, 1);
        assert_eq!(gaps[0].status, FvgStatus::TestedOnce);
    }

    #[test]
    fn test_detect_filters_and_orders() {
        let config = PatternConfig {
            fvg_proximity_pct: 5.0,
            fvg_max_results: 10,
            ..Default::default()
        };
        let mut ohlc = Vec::new();
        let mut base = 100.0;
        for _ in 0..6 {
            ohlc.push((base, base + 1.0, base - 1.0, base + 0.5));
            ohlc.push((base + 0.5, base + 4.0, base + 0.4, base + 3.8));
            base += 3.0;
        }
        let candles = bars(&ohlc);
        let gaps = FvgDetector::new(&config).detect(&candles, Timeframe::M15, base);
        assert!(!gaps.is_empty());
        assert!(gaps.windows(2).all(|w| w[0].index > w[1].index));
        assert!(gaps.iter().all(|g| !g.is_filled() && g.distance_pct(base) <= 5.0));
    }

    #[test]
    fn test_record_test_after_fill_is_ignored() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
        let mut g = FairValueGap::new(Polarity::Bullish, 102.0, 101.0, Timeframe::H1, 2, ts);
        g.record_test(ts);
        g.mark_filled(ts);
        g.record_test(ts);
        assert_eq!(g.test_count, 1);
        assert_eq!(g.status, FvgStatus::Filled);
    }
}
