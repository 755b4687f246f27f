//! Liquidity zones
//!
//! Swing highs rest buy-side liquidity (stops above), swing lows sell-side.
//! Nearby swing levels are clustered into one zone whose strength is the
//! number of touches.

use serde::{Deserialize, Serialize};

use super::swing::{find_swing_points, SwingKind, SwingPoint};
use super::PatternConfig;
use crate::market::{Candle, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquiditySide {
    BuySide,
    SellSide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityZone {
    pub zone_type: LiquiditySide,
    pub level: f64,
    /// Number of swing points in the cluster
    pub strength: u32,
    pub swept: bool,
    pub timeframe: Timeframe,
    /// Index of the most recent swing point in the cluster
    pub last_touch_index: usize,
    /// Index of the candle that closed back after the sweep
    pub swept_index: Option<usize>,
}

impl LiquidityZone {
    pub fn distance_pct(&self, price: f64) -> f64 {
        if price.abs() <= f64::EPSILON {
            return f64::INFINITY;
        }
        (self.level - price).abs() / price * 100.0
    }
}

pub struct LiquidityDetector {
    swing_lookback: usize,
    tolerance_pct: f64,
    reversal_candles: usize,
}

impl LiquidityDetector {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            swing_lookback: config.swing_lookback,
            tolerance_pct: config.liquidity_tolerance_pct,
            reversal_candles: config.sweep_reversal_candles,
        }
    }

    /// Buy-side and sell-side zones, each sorted by level
    pub fn detect(&self, candles: &[Candle], timeframe: Timeframe) -> Vec<LiquidityZone> {
        let swings = find_swing_points(candles, self.swing_lookback);
        let mut zones = self.cluster(&swings, SwingKind::High, timeframe);
        zones.extend(self.cluster(&swings, SwingKind::Low, timeframe));

        for zone in zones.iter_mut() {
            zone.swept_index = self.find_sweep(candles, zone);
            zone.swept = zone.swept_index.is_some();
        }
        zones
    }

    fn cluster(&self, swings: &[SwingPoint], kind: SwingKind, timeframe: Timeframe) -> Vec<LiquidityZone> {
        let mut points: Vec<&SwingPoint> = swings.iter().filter(|p| p.kind == kind).collect();
        points.sort_by(|a, b| a.price.total_cmp(&b.price));

        let zone_type = match kind {
            SwingKind::High => LiquiditySide::BuySide,
            SwingKind::Low => LiquiditySide::SellSide,
        };

        let mut zones = Vec::new();
        let mut i = 0;
        while i < points.len() {
            let anchor = points[i].price;
            let mut j = i + 1;
            while j < points.len() && (points[j].price - anchor) / anchor * 100.0 <= self.tolerance_pct {
                j += 1;
            }
            let members = &points[i..j];
            let level = members.iter().map(|p| p.price).sum::<f64>() / members.len() as f64;
            zones.push(LiquidityZone {
                zone_type,
                level,
                strength: members.len() as u32,
                swept: false,
                timeframe,
                last_touch_index: members.iter().map(|p| p.index).max().unwrap_or(0),
                swept_index: None,
            });
            i = j;
        }
        zones
    }

    /// First trade-through after the last touch followed by a close back
    /// on the original side within the reversal window
    fn find_sweep(&self, candles: &[Candle], zone: &LiquidityZone) -> Option<usize> {
        let level = zone.level;
        let start = zone.last_touch_index + 1;
        for k in start..candles.len() {
            let through = match zone.zone_type {
                LiquiditySide::BuySide => candles[k].high > level,
                LiquiditySide::SellSide => candles[k].low < level,
            };
            if !through {
                continue;
            }
            let end = (k + self.reversal_candles).min(candles.len() - 1);
            let reversal = (k..=end).find(|&r| match zone.zone_type {
                LiquiditySide::BuySide => candles[r].close < level,
                LiquiditySide::SellSide => candles[r].close > level,
            });
            // price accepted beyond the level: not a sweep
            return reversal;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::swing::tests::candles_from_hl;

    fn detector() -> LiquidityDetector {
        LiquidityDetector::new(&PatternConfig {
            swing_lookback: 1,
            ..Default::default()
        })
    }

    #[test]
    fn test_equal_highs_cluster() {
        let candles = candles_from_hl(&[
            (100.0, 98.0),
            (105.00, 101.0),
            (102.0, 99.0),
            (105.05, 101.0),
            (101.0, 98.5),
            (103.0, 99.0),
        ]);
        let zones = detector().detect(&candles, Timeframe::M15);
        let buy: Vec<_> = zones.iter().filter(|z| z.zone_type == LiquiditySide::BuySide).collect();
        assert_eq!(buy.len(), 1);
        assert_eq!(buy[0].strength, 2);
        assert!((buy[0].level - 105.025).abs() < 1e-9);
        assert!(!buy[0].swept);
    }

    #[test]
    fn test_sell_side_sweep() {
        // swing low at 98.0, later wick to 97.5 and close back above
        let candles = candles_from_hl(&[
            (101.0, 99.0),
            (100.0, 98.0),
            (101.5, 99.5),
            (102.0, 100.0),
            (100.5, 97.5),
            (101.0, 99.0),
        ]);
        let zones = detector().detect(&candles, Timeframe::M15);
        let sell = zones
            .iter()
            .find(|z| z.zone_type == LiquiditySide::SellSide && (z.level - 98.0).abs() < 1e-9)
            .unwrap();
        assert!(sell.swept);
        assert_eq!(sell.swept_index, Some(4));
    }

    #[test]
    fn test_distant_levels_stay_separate() {
        let candles = candles_from_hl(&[
            (100.0, 98.0),
            (105.0, 101.0),
            (102.0, 99.0),
            (108.0, 101.0),
            (101.0, 98.5),
        ]);
        let zones = detector().detect(&candles, Timeframe::M15);
        let buy = zones.iter().filter(|z| z.zone_type == LiquiditySide::BuySide).count();
        assert_eq!(buy, 2);
    }
}
