//! Regime Classifier
//!
//! Different expected-move scaling for different market regimes.
//! Classifies the index into trend / range / high-volatility regimes from
//! ADX(14) and the ATR percentile over a rolling window.

use serde::{Deserialize, Serialize};

use super::types::MarketRegime;
use crate::market::{indicators, Candle};

/// Configuration for regime classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub adx_period: usize,
    pub atr_period: usize,
    /// ATR values ranked for the percentile
    pub atr_percentile_window: usize,
    pub strong_trend_adx: f64,
    pub weak_trend_adx: f64,
    /// ATR percentile above which volatility overrides trend
    pub high_volatility_percentile: f64,
    pub strong_trend_multiplier: f64,
    pub weak_trend_multiplier: f64,
    pub range_multiplier: f64,
    pub high_volatility_multiplier: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_period: 14,
            atr_period: 14,
            atr_percentile_window: 20,
            strong_trend_adx: 25.0,
            weak_trend_adx: 20.0,
            high_volatility_percentile: 90.0,
            strong_trend_multiplier: 1.3,
            weak_trend_multiplier: 1.0,
            range_multiplier: 0.8,
            high_volatility_multiplier: 1.2,
        }
    }
}

/// Regime classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeClassification {
    pub regime: MarketRegime,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub adx: Option<f64>,
    pub atr: Option<f64>,
    pub atr_percentile: Option<f64>,
    /// Expected-move scaling for this regime
    pub multiplier: f64,
}

/// Regime Classifier
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    /// Create a new regime classifier
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Expected-move multiplier of a regime
    pub fn multiplier(&self, regime: MarketRegime) -> f64 {
        match regime {
            MarketRegime::StrongTrendUp | MarketRegime::StrongTrendDown => {
                self.config.strong_trend_multiplier
            }
            MarketRegime::WeakTrendUp | MarketRegime::WeakTrendDown => {
                self.config.weak_trend_multiplier
            }
            MarketRegime::RangeBound => self.config.range_multiplier,
            MarketRegime::HighVolatility => self.config.high_volatility_multiplier,
        }
    }

    /// Classify the regime of a candle series
    pub fn classify(&self, candles: &[Candle]) -> RegimeClassification {
        let mut reasons = vec![];

        let atr_series = indicators::atr_series(candles, self.config.atr_period);
        let atr = atr_series.last().copied();
        let atr_percentile = atr.and_then(|current| {
            let start = atr_series.len().saturating_sub(self.config.atr_percentile_window);
            indicators::percentile_rank(&atr_series[start..], current)
        });

        // Check for High Volatility (overrides trend)
        if let Some(pct) = atr_percentile {
            if pct > self.config.high_volatility_percentile {
                reasons.push(format!("ATR percentile {:.0} above {:.0}", pct, self.config.high_volatility_percentile));
                let adx = indicators::adx(candles, self.config.adx_period).map(|a| a.adx);
                return self.result(MarketRegime::HighVolatility, pct / 100.0, reasons, adx, atr, atr_percentile);
            }
        }

        let Some(adx) = indicators::adx(candles, self.config.adx_period) else {
            reasons.push("Insufficient data for ADX".to_string());
            return self.result(MarketRegime::RangeBound, 0.0, reasons, None, atr, atr_percentile);
        };

        let up = adx.plus_di >= adx.minus_di;
        let regime = if adx.adx >= self.config.strong_trend_adx {
            reasons.push(format!("ADX {:.1} shows a strong trend", adx.adx));
            if up {
                MarketRegime::StrongTrendUp
            } else {
                MarketRegime::StrongTrendDown
            }
        } else if adx.adx >= self.config.weak_trend_adx {
            reasons.push(format!("ADX {:.1} shows a weak trend", adx.adx));
            if up {
                MarketRegime::WeakTrendUp
            } else {
                MarketRegime::WeakTrendDown
            }
        } else {
            reasons.push(format!("ADX {:.1} below trend threshold", adx.adx));
            MarketRegime::RangeBound
        };

        if regime.is_trending() {
            reasons.push(format!("+DI {:.1} / -DI {:.1}", adx.plus_di, adx.minus_di));
        }

        let confidence = (adx.adx / 50.0).clamp(0.0, 1.0);
        self.result(regime, confidence, reasons, Some(adx.adx), atr, atr_percentile)
    }

    fn result(
        &self,
        regime: MarketRegime,
        confidence: f64,
        reasons: Vec<String>,
        adx: Option<f64>,
        atr: Option<f64>,
        atr_percentile: Option<f64>,
    ) -> RegimeClassification {
        RegimeClassification {
            regime,
            confidence,
            reasons,
            adx,
            atr,
            atr_percentile,
            multiplier: self.multiplier(regime),
        }
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trending(n: usize, step: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        (0..n)
            .map(|i| {
                let base = 1000.0 + step * i as f64;
                Candle::new(start + Duration::days(i as i64), base, base + 6.0, base - 4.0, base + 5.0, 1.0e6)
            })
            .collect()
    }

    fn choppy(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        (0..n)
            .map(|i| {
                let base = if i % 2 == 0 { 1000.0 } else { 1003.0 };
                Candle::new(start + Duration::days(i as i64), base, base + 5.0, base - 5.0, base + 1.0, 1.0e6)
            })
            .collect()
    }

    #[test]
    fn test_strong_uptrend() {
        let result = RegimeClassifier::default().classify(&trending(60, 8.0));
        assert_eq!(result.regime, MarketRegime::StrongTrendUp);
        assert_eq!(result.multiplier, 1.3);
        assert!(!result.reasons.is_empty());
    }

    #[test]
    fn test_strong_downtrend() {
        let result = RegimeClassifier::default().classify(&trending(60, -8.0));
        assert_eq!(result.regime, MarketRegime::StrongTrendDown);
    }

    #[test]
    fn test_choppy_market_is_range_bound() {
        let result = RegimeClassifier::default().classify(&choppy(60));
        assert_eq!(result.regime, MarketRegime::RangeBound);
        assert_eq!(result.multiplier, 0.8);
    }

    #[test]
    fn test_volatility_spike_overrides_trend() {
        let mut candles = trending(60, 8.0);
        let last = *candles.last().unwrap();
        candles.push(Candle::new(
            last.timestamp + Duration::days(1),
            last.close,
            last.close + 120.0,
            last.close - 60.0,
            last.close + 100.0,
            2.0e6,
        ));
        let result = RegimeClassifier::default().classify(&candles);
        assert_eq!(result.regime, MarketRegime::HighVolatility);
        assert_eq!(result.multiplier, 1.2);
    }

    #[test]
    fn test_insufficient_data() {
        let result = RegimeClassifier::default().classify(&trending(5, 8.0));
        assert_eq!(result.regime, MarketRegime::RangeBound);
        assert!(result.adx.is_none());
    }
}
