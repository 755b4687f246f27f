//! Swing point detection
//!
//! Candle `i` is a swing high when its high is the maximum of the closed
//! window `[i - N, i + N]` (swing low: the minimum of the lows). Fewer than
//! `2N + 1` candles yields no swing points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed swing high or low
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub kind: SwingKind,
    pub index: usize,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Find swing highs and lows, ordered by index
pub fn find_swing_points(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    let n = lookback;
    if candles.len() < 2 * n + 1 {
        return Vec::new();
    }

    let mut points = Vec::new();
    for i in n..candles.len() - n {
        let window = &candles[i - n..=i + n];
        let candle = &candles[i];

        let max_high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        if candle.high >= max_high {
            points.push(SwingPoint {
                kind: SwingKind::High,
                index: i,
                price: candle.high,
                timestamp: candle.timestamp,
            });
        }

        let min_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        if candle.low <= min_low {
            points.push(SwingPoint {
                kind: SwingKind::Low,
                index: i,
                price: candle.low,
                timestamp: candle.timestamp,
            });
        }
    }
    points
}

/// Swing highs only
pub fn swing_highs(points: &[SwingPoint]) -> impl Iterator<Item = &SwingPoint> {
    points.iter().filter(|p| p.kind == SwingKind::High)
}

/// Swing lows only
pub fn swing_lows(points: &[SwingPoint]) -> impl Iterator<Item = &SwingPoint> {
    points.iter().filter(|p| p.kind == SwingKind::Low)
}
