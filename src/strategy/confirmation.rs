//! Confirmation Stack
//!
//! Three independent votes that back (or fade) the top-down direction:
//! - ML ensemble forecast (AR(1) + Holt smoothing + momentum)
//! - Candlestick confluence over the recent LTF bars
//! - Futures basis sentiment
//!
//! Each vote is a [`Confirmation`]; a vote without enough data is marked
//! unavailable and the composer scores it zero.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::Direction;
use crate::market::{indicators, CandleSet, Timeframe};
use crate::patterns::{CandlestickScanner, Polarity};

/// Configuration for the confirmation stack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Closes required before the ML ensemble forecasts
    pub ml_min_points: usize,
    pub ar_weight: f64,
    pub holt_weight: f64,
    pub momentum_weight: f64,
    pub holt_alpha: f64,
    pub holt_beta: f64,
    pub momentum_bars: usize,
    /// Forecast change (percent) needed for a direction
    pub ml_direction_threshold_pct: f64,
    /// Bars per LTF frame scanned for patterns
    pub candlestick_bars: usize,
    /// Basis above this percent is bullish
    pub futures_bullish_pct: f64,
    /// Basis below this percent is bearish
    pub futures_bearish_pct: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ml_min_points: 50,
            ar_weight: 0.4,
            holt_weight: 0.4,
            momentum_weight: 0.2,
            holt_alpha: 0.3,
            holt_beta: 0.1,
            momentum_bars: 10,
            ml_direction_threshold_pct: 0.01,
            candlestick_bars: 3,
            futures_bullish_pct: 0.3,
            futures_bearish_pct: -0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationSource {
    MlEnsemble,
    Candlestick,
    FuturesBasis,
}

/// One confirmation vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confirmation {
    pub source: ConfirmationSource,
    pub available: bool,
    pub direction: Direction,
    /// 0-100
    pub confidence: f64,
    pub agrees_with_htf: bool,
    pub detail: String,
}

impl Confirmation {
    pub fn unavailable(source: ConfirmationSource, reason: impl Into<String>) -> Self {
        Self {
            source,
            available: false,
            direction: Direction::Neutral,
            confidence: 0.0,
            agrees_with_htf: false,
            detail: reason.into(),
        }
    }

    /// Available and pointing the same way as `direction`
    pub fn supports(&self, direction: Direction) -> bool {
        self.available && self.direction.agrees_with(direction)
    }
}

/// The three votes together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationSet {
    pub ml: Confirmation,
    pub candlestick: Confirmation,
    pub futures: Confirmation,
}

impl ConfirmationSet {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            ml: Confirmation::unavailable(ConfirmationSource::MlEnsemble, reason),
            candlestick: Confirmation::unavailable(ConfirmationSource::Candlestick, reason),
            futures: Confirmation::unavailable(ConfirmationSource::FuturesBasis, reason),
        }
    }
}

/// Individual model forecasts and their blend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleForecast {
    pub autoregressive: f64,
    pub holt: f64,
    pub momentum: f64,
    pub blended: f64,
}

pub struct ConfirmationStack {
    config: ConfirmationConfig,
    scanner: CandlestickScanner,
}

impl ConfirmationStack {
    pub fn new(config: ConfirmationConfig) -> Self {
        Self {
            config,
            scanner: CandlestickScanner::new(),
        }
    }

    /// Run all three votes. `expected` is the direction the candlestick
    /// vote is scored against.
    pub fn evaluate(
        &self,
        candles: &CandleSet,
        spot: f64,
        futures_price: Option<f64>,
        expected: Direction,
        htf: Direction,
    ) -> ConfirmationSet {
        let closes = forecast_series(candles);
        let set = ConfirmationSet {
            ml: self.ml_ensemble(&closes, htf),
            candlestick: self.candlestick_confluence(candles, expected, htf),
            futures: self.futures_basis(spot, futures_price, htf),
        };
        debug!(
            ml = %set.ml.direction,
            candlestick = %set.candlestick.direction,
            futures = %set.futures.direction,
            "Confirmation votes"
        );
        set
    }

    /// Forecast the next close from each model; None below the minimum history
    pub fn forecast(&self, closes: &[f64]) -> Option<EnsembleForecast> {
        if closes.len() < self.config.ml_min_points.max(3) {
            return None;
        }
        let last = *closes.last()?;

        let autoregressive = ar1_forecast(closes)?;
        let holt = holt_forecast(closes, self.config.holt_alpha, self.config.holt_beta)?;
        let n = self.config.momentum_bars.clamp(1, closes.len() - 1);
        let momentum = last + (last - closes[closes.len() - 1 - n]) / n as f64;

        let total = self.config.ar_weight + self.config.holt_weight + self.config.momentum_weight;
        if total <= f64::EPSILON {
            return None;
        }
        let blended = (self.config.ar_weight * autoregressive
            + self.config.holt_weight * holt
            + self.config.momentum_weight * momentum)
            / total;

        Some(EnsembleForecast {
            autoregressive,
            holt,
            momentum,
            blended,
        })
    }

    pub fn ml_ensemble(&self, closes: &[f64], htf: Direction) -> Confirmation {
        let source = ConfirmationSource::MlEnsemble;
        let Some(forecast) = self.forecast(closes) else {
            return Confirmation::unavailable(
                source,
                format!("{} closes, need {}", closes.len(), self.config.ml_min_points),
            );
        };
        let Some(&last) = closes.last() else {
            return Confirmation::unavailable(source, "no closes");
        };

        let direction = self.forecast_direction(last, forecast.blended);
        let confidence = if direction.is_directional() {
            let votes = [
                (forecast.autoregressive, self.config.ar_weight),
                (forecast.holt, self.config.holt_weight),
                (forecast.momentum, self.config.momentum_weight),
            ];
            let total: f64 = votes.iter().map(|(_, w)| w).sum();
            let agreeing: f64 = votes
                .iter()
                .filter(|(price, _)| self.forecast_direction(last, *price) == direction)
                .map(|(_, w)| w)
                .sum();
            100.0 * agreeing / total
        } else {
            0.0
        };

        Confirmation {
            source,
            available: true,
            direction,
            confidence,
            agrees_with_htf: direction.agrees_with(htf),
            detail: format!(
                "forecast {:.2} vs {:.2} (ar {:.2}, holt {:.2}, mom {:.2})",
                forecast.blended, last, forecast.autoregressive, forecast.holt, forecast.momentum
            ),
        }
    }

    fn forecast_direction(&self, last: f64, forecast: f64) -> Direction {
        if last.abs() <= f64::EPSILON {
            return Direction::Neutral;
        }
        let change_pct = (forecast - last) / last * 100.0;
        if change_pct > self.config.ml_direction_threshold_pct {
            Direction::Bullish
        } else if change_pct < -self.config.ml_direction_threshold_pct {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }

    /// Pattern votes over the last bars of every LTF frame
    pub fn candlestick_confluence(&self, candles: &CandleSet, expected: Direction, htf: Direction) -> Confirmation {
        let source = ConfirmationSource::Candlestick;
        let frames: Vec<_> = Timeframe::LTF
            .iter()
            .filter_map(|tf| candles.get(tf).filter(|c| !c.is_empty()))
            .collect();
        if frames.is_empty() {
            return Confirmation::unavailable(source, "no LTF candles");
        }

        let (mut bullish, mut bearish) = (0usize, 0usize);
        for series in frames {
            for m in self.scanner.scan_recent(series, self.config.candlestick_bars) {
                match m.polarity() {
                    Some(Polarity::Bullish) => bullish += 1,
                    Some(Polarity::Bearish) => bearish += 1,
                    None => {}
                }
            }
        }

        let total = bullish + bearish;
        let net = bullish as f64 - bearish as f64;
        let direction = Direction::from_sign(net);
        // 0-100 agreement with the expected direction; own strength when none is expected
        let confidence = match expected {
            _ if total == 0 => 50.0,
            Direction::Bullish => 50.0 + 50.0 * net / total as f64,
            Direction::Bearish => 50.0 - 50.0 * net / total as f64,
            Direction::Neutral => 50.0 + 50.0 * net.abs() / total as f64,
        };

        Confirmation {
            source,
            available: true,
            direction,
            confidence,
            agrees_with_htf: direction.agrees_with(htf),
            detail: format!(
                "{} bullish / {} bearish patterns, {:.0} against {}",
                bullish, bearish, confidence, expected
            ),
        }
    }

    pub fn futures_basis(&self, spot: f64, futures_price: Option<f64>, htf: Direction) -> Confirmation {
        let source = ConfirmationSource::FuturesBasis;
        let Some(futures_price) = futures_price else {
            return Confirmation::unavailable(source, "no futures quote");
        };
        if spot <= f64::EPSILON {
            return Confirmation::unavailable(source, "no spot price");
        }

        let basis_pct = (futures_price - spot) / spot * 100.0;
        let (direction, distance) = if basis_pct > self.config.futures_bullish_pct {
            (Direction::Bullish, basis_pct - self.config.futures_bullish_pct)
        } else if basis_pct < self.config.futures_bearish_pct {
            (Direction::Bearish, self.config.futures_bearish_pct - basis_pct)
        } else {
            (Direction::Neutral, 0.0)
        };
        let confidence = if direction.is_directional() {
            (50.0 + 100.0 * distance).min(100.0)
        } else {
            0.0
        };

        Confirmation {
            source,
            available: true,
            direction,
            confidence,
            agrees_with_htf: direction.agrees_with(htf),
            detail: format!("basis {:+.3}%", basis_pct),
        }
    }
}

impl Default for ConfirmationStack {
    fn default() -> Self {
        Self::new(ConfirmationConfig::default())
    }
}

/// Longest close series available, preferring the finer LTF frames
fn forecast_series(candles: &CandleSet) -> Vec<f64> {
    [Timeframe::M15, Timeframe::M5, Timeframe::H1, Timeframe::M1, Timeframe::H4, Timeframe::Daily]
        .iter()
        .filter_map(|tf| candles.get(tf))
        .max_by_key(|c| c.len())
        .map(|c| crate::market::closes(c))
        .unwrap_or_default()
}

/// One-step AR(1) forecast on simple returns
fn ar1_forecast(closes: &[f64]) -> Option<f64> {
    let last = *closes.last()?;
    let r = indicators::returns(closes);
    let mu = indicators::mean(&r)?;
    let last_return = *r.last()?;

    let (num, den) = r.windows(2).fold((0.0, 0.0), |(num, den), w| {
        (num + (w[1] - mu) * (w[0] - mu), den + (w[0] - mu).powi(2))
    });
    let phi = if den > f64::EPSILON {
        (num / den).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    Some(last * (1.0 + mu + phi * (last_return - mu)))
}

/// Holt linear trend, one step ahead
fn holt_forecast(closes: &[f64], alpha: f64, beta: f64) -> Option<f64> {
    let (&first, rest) = closes.split_first()?;
    let mut level = first;
    let mut trend = rest.first().map(|x| x - first)?;
    for &x in rest {
        let prev = level;
        level = alpha * x + (1.0 - alpha) * (level + trend);
        trend = beta * (level - prev) + (1.0 - beta) * trend;
    }
    Some(level + trend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 5, 2, 4, 0, 0).unwrap();
        ohlc.iter()
            .enumerate()
            .map(|(i, &(o, h, l, c))| Candle::new(start + Duration::minutes(15 * i as i64), o, h, l, c, 100.0))
            .collect()
    }

    #[test]
    fn test_ml_needs_history() {
        let stack = ConfirmationStack::default();
        let closes: Vec<f64> = (0..49).map(|i| 100.0 + i as f64).collect();
        let vote = stack.ml_ensemble(&closes, Direction::Bullish);
        assert!(!vote.available);
        assert_eq!(vote.confidence, 0.0);
    }

    #[test]
    fn test_ml_rising_series_is_bullish() {
        let stack = ConfirmationStack::default();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let vote = stack.ml_ensemble(&closes, Direction::Bullish);
        assert!(vote.available);
        assert_eq!(vote.direction, Direction::Bullish);
        assert!((vote.confidence - 100.0).abs() < 1e-9);
        assert!(vote.agrees_with_htf);
    }

    #[test]
    fn test_ml_falling_and_flat() {
        let stack = ConfirmationStack::default();
        let falling: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let vote = stack.ml_ensemble(&falling, Direction::Bullish);
        assert_eq!(vote.direction, Direction::Bearish);
        assert!(!vote.agrees_with_htf);

        let flat = vec![100.0; 60];
        assert_eq!(stack.ml_ensemble(&flat, Direction::Bullish).direction, Direction::Neutral);
    }

    #[test]
    fn test_candlestick_confluence() {
        let stack = ConfirmationStack::default();
        let mut set = CandleSet::new();
        set.insert(
            Timeframe::M15,
            bars(&[
                (101.0, 101.2, 99.8, 100.0),
                (100.0, 100.1, 99.0, 99.2),
                (99.1, 100.6, 99.0, 100.5),
            ]),
        );
        let vote = stack.candlestick_confluence(&set, Direction::Bullish, Direction::Bullish);
        assert_eq!(vote.direction, Direction::Bullish);
        assert_eq!(vote.confidence, 100.0);
        assert!(vote.agrees_with_htf);

        let against = stack.candlestick_confluence(&set, Direction::Bearish, Direction::Bearish);
        assert_eq!(against.direction, Direction::Bullish);
        assert_eq!(against.confidence, 0.0);
        assert!(!against.agrees_with_htf);

        let unscored = stack.candlestick_confluence(&set, Direction::Neutral, Direction::Bearish);
        assert_eq!(unscored.confidence, 100.0);

        assert!(!stack.candlestick_confluence(&CandleSet::new(), Direction::Bullish, Direction::Bullish).available);
    }

    #[test]
    fn test_futures_basis_thresholds() {
        let stack = ConfirmationStack::default();
        let bullish = stack.futures_basis(25000.0, Some(25125.0), Direction::Bullish);
        assert_eq!(bullish.direction, Direction::Bullish);
        assert!((bullish.confidence - 70.0).abs() < 1e-6);

        let bearish = stack.futures_basis(25000.0, Some(24950.0), Direction::Bullish);
        assert_eq!(bearish.direction, Direction::Bearish);
        assert!((bearish.confidence - 60.0).abs() < 1e-6);
        assert!(!bearish.agrees_with_htf);

        let flat = stack.futures_basis(25000.0, Some(25025.0), Direction::Bullish);
        assert_eq!(flat.direction, Direction::Neutral);
        assert!(!stack.futures_basis(25000.0, None, Direction::Bullish).available);
    }
}
