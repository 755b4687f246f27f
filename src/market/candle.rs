//! Candle and timeframe primitives
//!
//! Candles are immutable snapshots; every analysis takes an ordered slice
//! (oldest first) and never mutates it.

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[inline]
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    #[inline]
    pub fn upper_shadow(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    #[inline]
    pub fn lower_shadow(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    #[inline]
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    #[inline]
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// Typical price used for VWAP
    #[inline]
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Body as ratio of range. Returns None if range ≈ 0
    #[inline]
    pub fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.body() / range)
    }

    /// OHLC values are finite and high/low bound open/close
    pub fn is_well_formed(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }
}

/// Chart timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1M", alias = "monthly")]
    Monthly,
    #[serde(rename = "1W", alias = "weekly")]
    Weekly,
    #[serde(rename = "1D", alias = "daily")]
    Daily,
    #[serde(rename = "4H", alias = "240")]
    H4,
    #[serde(rename = "1H", alias = "60")]
    H1,
    #[serde(rename = "15m", alias = "15")]
    M15,
    #[serde(rename = "5m", alias = "5")]
    M5,
    #[serde(rename = "1m", alias = "1")]
    M1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 8] = [
        Timeframe::Monthly,
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::H4,
        Timeframe::H1,
        Timeframe::M15,
        Timeframe::M5,
        Timeframe::M1,
    ];

    pub const HTF: [Timeframe; 2] = [Timeframe::Monthly, Timeframe::Weekly];
    pub const MTF: [Timeframe; 2] = [Timeframe::Daily, Timeframe::H4];
    pub const LTF: [Timeframe; 4] = [Timeframe::H1, Timeframe::M15, Timeframe::M5, Timeframe::M1];

    /// Broker resolution string
    pub fn resolution(&self) -> &'static str {
        match self {
            Timeframe::Monthly => "1M",
            Timeframe::Weekly => "1W",
            Timeframe::Daily => "1D",
            Timeframe::H4 => "240",
            Timeframe::H1 => "60",
            Timeframe::M15 => "15",
            Timeframe::M5 => "5",
            Timeframe::M1 => "1",
        }
    }

    /// Nominal bar duration
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::Monthly => Duration::days(30),
            Timeframe::Weekly => Duration::weeks(1),
            Timeframe::Daily => Duration::days(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M1 => Duration::minutes(1),
        }
    }

    /// How far back the engine fetches history for this timeframe
    pub fn default_lookback(&self) -> Duration {
        match self {
            Timeframe::Monthly => Duration::days(365 * 3),
            Timeframe::Weekly => Duration::weeks(60),
            Timeframe::Daily => Duration::days(120),
            Timeframe::H4 => Duration::days(30),
            Timeframe::H1 => Duration::days(10),
            Timeframe::M15 => Duration::days(5),
            Timeframe::M5 => Duration::days(2),
            Timeframe::M1 => Duration::days(1),
        }
    }

    /// Open of the bucket holding `ts`, counted from the Unix epoch
    pub fn bar_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.duration_trunc(self.duration()).unwrap_or(ts)
    }

    /// Close of the bucket holding `ts`
    pub fn bar_end(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.bar_start(ts) + self.duration()
    }

    /// Weight of this frame when several HTF frames are combined
    pub fn htf_weight(&self) -> f64 {
        match self {
            Timeframe::Monthly => 3.0,
            Timeframe::Weekly => 2.0,
            _ => 1.0,
        }
    }

    pub fn is_ltf(&self) -> bool {
        Self::LTF.contains(self)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Timeframe::Monthly => "1M",
            Timeframe::Weekly => "1W",
            Timeframe::Daily => "1D",
            Timeframe::H4 => "4H",
            Timeframe::H1 => "1H",
            Timeframe::M15 => "15m",
            Timeframe::M5 => "5m",
            Timeframe::M1 => "1m",
        };
        write!(f, "{}", label)
    }
}

/// Close prices of a candle slice
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Lowest low and highest high across a slice, None when empty
pub fn price_range(candles: &[Candle]) -> Option<(f64, f64)> {
    if candles.is_empty() {
        return None;
    }
    let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let high = candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    Some((low, high))
}

/// Last `n` candles (or all of them when fewer)
pub fn tail(candles: &[Candle], n: usize) -> &[Candle] {
    &candles[candles.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), o, h, l, c, 1000.0)
    }

    #[test]
    fn test_candle_geometry() {
        let c = bar(100.0, 110.0, 90.0, 105.0);
        assert_eq!(c.body(), 5.0);
        assert_eq!(c.range(), 20.0);
        assert_eq!(c.upper_shadow(), 5.0);
        assert_eq!(c.lower_shadow(), 10.0);
        assert!(c.is_bullish());
        assert!((c.body_ratio().unwrap() - 0.25).abs() < 1e-9);
        assert!(c.is_well_formed());
    }

    #[test]
    fn test_malformed_candle() {
        assert!(!bar(100.0, 95.0, 99.0, 98.0).is_well_formed());
        assert!(!bar(f64::NAN, 110.0, 90.0, 100.0).is_well_formed());
    }

    #[test]
    fn test_timeframe_serde_labels() {
        let tf: Timeframe = serde_json::from_str(r#""15m""#).unwrap();
        assert_eq!(tf, Timeframe::M15);
        let tf: Timeframe = serde_json::from_str(r#""weekly""#).unwrap();
        assert_eq!(tf, Timeframe::Weekly);
        assert_eq!(serde_json::to_string(&Timeframe::H4).unwrap(), r#""4H""#);
    }

    #[test]
    fn test_bar_boundaries() {
        let at = Utc.with_ymd_and_hms(2024, 6, 3, 6, 50, 12).unwrap();
        let hm = |h, m| Utc.with_ymd_and_hms(2024, 6, 3, h, m, 0).unwrap();
        assert_eq!(Timeframe::M15.bar_start(at), hm(6, 45));
        assert_eq!(Timeframe::M15.bar_end(at), hm(7, 0));
        assert_eq!(Timeframe::M15.bar_start(hm(6, 45)), hm(6, 45));
        assert_eq!(Timeframe::H1.bar_end(at), hm(7, 0));
        assert_eq!(Timeframe::Daily.bar_start(at), hm(0, 0));
        assert_eq!(Timeframe::M1.bar_end(at), hm(6, 51));
    }

    #[test]
    fn test_price_range() {
        let bars = vec![bar(100.0, 105.0, 98.0, 101.0), bar(101.0, 107.0, 99.0, 106.0)];
        assert_eq!(price_range(&bars), Some((98.0, 107.0)));
        assert_eq!(price_range(&[]), None);
        assert_eq!(tail(&bars, 5).len(), 2);
        assert_eq!(tail(&bars, 1)[0].close, 106.0);
    }
}
