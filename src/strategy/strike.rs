//! Strike and level selection
//!
//! Picks the option contract whose |delta| is nearest the target (ATM 0.50
//! for strong LTF-confirmed setups, 0.40 OTM otherwise) and derives premium
//! stop/targets plus underlying levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entry::EntryZone;
use super::types::{Direction, OptionType};
use crate::data::{GreeksCalculator, OptionChain, OptionQuote};

/// Configuration for strike and level selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrikeConfig {
    pub base_delta: f64,
    pub max_delta: f64,
    /// Confidence where the delta starts moving toward ATM
    pub delta_ramp_start: f64,
    /// Confidence span over which it reaches `max_delta`
    pub delta_ramp_span: f64,
    /// Premium stop/targets (percent) when LTF-confirmed
    pub confirmed_stop_pct: f64,
    pub confirmed_target_pcts: [f64; 2],
    /// Premium stop/targets (percent) otherwise
    pub unconfirmed_stop_pct: f64,
    pub unconfirmed_target_pcts: [f64; 2],
    /// Volatility used for greeks when a quote carries no IV
    pub default_volatility: f64,
    pub atr_stop_multiple: f64,
    pub atr_target_multiples: [f64; 2],
    /// Level distance (percent of spot) when ATR is unavailable
    pub fallback_distance_pct: f64,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            base_delta: 0.40,
            max_delta: 0.50,
            delta_ramp_start: 40.0,
            delta_ramp_span: 30.0,
            confirmed_stop_pct: 30.0,
            confirmed_target_pcts: [50.0, 100.0],
            unconfirmed_stop_pct: 40.0,
            unconfirmed_target_pcts: [40.0, 80.0],
            default_volatility: 0.15,
            atr_stop_multiple: 1.0,
            atr_target_multiples: [1.5, 3.0],
            fallback_distance_pct: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GreeksSource {
    Chain,
    Calculated,
}

/// Chosen contract with premium levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeSelection {
    pub strike: f64,
    pub option_type: OptionType,
    pub delta: f64,
    pub target_delta: f64,
    pub premium: f64,
    pub stop_loss_premium: f64,
    pub target_1_premium: f64,
    pub target_2_premium: f64,
    pub greeks_source: GreeksSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    EntryZone,
    Atr,
    SpotPercent,
}

/// Entry, stop and targets on the underlying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: f64,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub source: LevelSource,
}

pub struct StrikeSelector {
    config: StrikeConfig,
}

impl StrikeSelector {
    pub fn new(config: StrikeConfig) -> Self {
        Self { config }
    }

    pub fn target_delta(&self, confidence: f64, ltf_confirmed: bool) -> f64 {
        let c = &self.config;
        if !ltf_confirmed || c.delta_ramp_span <= 0.0 {
            return c.base_delta;
        }
        let ramp = ((confidence - c.delta_ramp_start) / c.delta_ramp_span).clamp(0.0, 1.0);
        c.base_delta + (c.max_delta - c.base_delta) * ramp
    }

    /// (stop, target 1, target 2) premiums
    pub fn premium_bands(&self, premium: f64, ltf_confirmed: bool) -> (f64, f64, f64) {
        let c = &self.config;
        let (stop, targets) = if ltf_confirmed {
            (c.confirmed_stop_pct, c.confirmed_target_pcts)
        } else {
            (c.unconfirmed_stop_pct, c.unconfirmed_target_pcts)
        };
        (
            premium * (1.0 - stop / 100.0),
            premium * (1.0 + targets[0] / 100.0),
            premium * (1.0 + targets[1] / 100.0),
        )
    }

    /// Contract nearest the target delta; None when no contract has a usable delta
    #[allow(clippy::too_many_arguments)]
    pub fn select(
        &self,
        chain: &OptionChain,
        option_type: OptionType,
        spot: f64,
        now: DateTime<Utc>,
        confidence: f64,
        ltf_confirmed: bool,
        greeks: Option<&dyn GreeksCalculator>,
    ) -> Option<StrikeSelection> {
        let target = self.target_delta(confidence, ltf_confirmed);

        let (quote, delta, source) = chain
            .of_type(option_type)
            .filter(|q| q.ltp > 0.0)
            .filter_map(|q| {
                self.delta_of(q, chain.expiry, spot, now, greeks)
                    .map(|(delta, source)| (q, delta, source))
            })
            .min_by(|a, b| {
                (a.1.abs() - target)
                    .abs()
                    .total_cmp(&(b.1.abs() - target).abs())
                    .then((a.0.strike - spot).abs().total_cmp(&(b.0.strike - spot).abs()))
            })?;

        let (stop, t1, t2) = self.premium_bands(quote.ltp, ltf_confirmed);
        Some(StrikeSelection {
            strike: quote.strike,
            option_type,
            delta,
            target_delta: target,
            premium: quote.ltp,
            stop_loss_premium: stop,
            target_1_premium: t1,
            target_2_premium: t2,
            greeks_source: source,
        })
    }

    fn delta_of(
        &self,
        quote: &OptionQuote,
        expiry: DateTime<Utc>,
        spot: f64,
        now: DateTime<Utc>,
        greeks: Option<&dyn GreeksCalculator>,
    ) -> Option<(f64, GreeksSource)> {
        if let Some(g) = quote.greeks {
            return Some((g.delta, GreeksSource::Chain));
        }
        let calculator = greeks?;
        // floor at one hour so expiry-day contracts still price
        let years = ((expiry - now).num_seconds() as f64 / (365.0 * 86_400.0)).max(1.0 / (365.0 * 24.0));
        let volatility = quote.iv.unwrap_or(self.config.default_volatility);
        calculator
            .calculate_greeks(spot, quote.strike, years, volatility, quote.option_type)
            .map(|g| (g.delta, GreeksSource::Calculated))
    }

    /// Underlying levels from the entry zone, else ATR multiples around spot
    pub fn underlying_levels(
        &self,
        direction: Direction,
        spot: f64,
        entry: Option<&EntryZone>,
        atr: Option<f64>,
    ) -> Option<TradeLevels> {
        if !direction.is_directional() {
            return None;
        }
        if let Some(zone) = entry.filter(|z| z.direction == direction) {
            return Some(TradeLevels {
                entry: zone.trigger_price,
                stop_loss: zone.stop_loss,
                target_1: zone.target_1,
                target_2: zone.target_2,
                source: LevelSource::EntryZone,
            });
        }

        let (distance, source) = match atr.filter(|a| a.is_finite() && *a > 0.0) {
            Some(atr) => (atr, LevelSource::Atr),
            None => (spot * self.config.fallback_distance_pct / 100.0, LevelSource::SpotPercent),
        };
        let sign = direction.sign();
        let c = &self.config;
        Some(TradeLevels {
            entry: spot,
            stop_loss: spot - sign * distance * c.atr_stop_multiple,
            target_1: spot + sign * distance * c.atr_target_multiples[0],
            target_2: spot + sign * distance * c.atr_target_multiples[1],
            source,
        })
    }
}

impl Default for StrikeSelector {
    fn default() -> Self {
        Self::new(StrikeConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::Greeks;
    use chrono::{Duration, TimeZone};

    /// Delta falls linearly by 0.1 per 50 points away from spot
    pub(crate) struct LinearGreeks;

    impl GreeksCalculator for LinearGreeks {
        fn calculate_greeks(
            &self,
            spot: f64,
            strike: f64,
            _time_to_expiry_years: f64,
            _volatility: f64,
            option_type: OptionType,
        ) -> Option<Greeks> {
            let moneyness = (spot - strike) / 50.0 * 0.1;
            let delta = match option_type {
                OptionType::Call => (0.5 + moneyness).clamp(0.0, 1.0),
                OptionType::Put => -(0.5 - moneyness).clamp(0.0, 1.0),
            };
            Some(Greeks {
                delta,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
                price: 0.0,
            })
        }
    }

    pub(crate) fn chain(now: DateTime<Utc>, with_greeks: bool) -> OptionChain {
        let quote = |strike: f64, option_type: OptionType, delta: f64, ltp: f64| OptionQuote {
            strike,
            option_type,
            ltp,
            oi: 1000,
            volume: 500,
            iv: Some(0.14),
            greeks: with_greeks.then_some(Greeks {
                delta,
                gamma: 0.0,
                theta: 0.0,
                vega: 0.0,
                price: ltp,
            }),
        };
        OptionChain {
            underlying: "NIFTY".to_string(),
            expiry: now + Duration::days(3),
            quotes: vec![
                quote(24900.0, OptionType::Call, 0.55, 150.0),
                quote(24950.0, OptionType::Call, 0.50, 120.0),
                quote(25000.0, OptionType::Call, 0.45, 95.0),
                quote(25050.0, OptionType::Call, 0.40, 75.0),
                quote(24900.0, OptionType::Put, -0.45, 90.0),
                quote(24850.0, OptionType::Put, -0.40, 70.0),
            ],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 5, 0, 0).unwrap()
    }

    #[test]
    fn test_target_delta_ramp() {
        let s = StrikeSelector::default();
        assert_eq!(s.target_delta(90.0, false), 0.40);
        assert_eq!(s.target_delta(30.0, true), 0.40);
        assert!((s.target_delta(55.0, true) - 0.45).abs() < 1e-12);
        assert_eq!(s.target_delta(85.0, true), 0.50);
    }

    #[test]
    fn test_select_nearest_delta() {
        let s = StrikeSelector::default();
        let chain = chain(now(), true);
        let atm = s
            .select(&chain, OptionType::Call, 24950.0, now(), 80.0, true, None)
            .unwrap();
        assert_eq!(atm.strike, 24950.0);
        assert_eq!(atm.greeks_source, GreeksSource::Chain);
        assert!((atm.stop_loss_premium - 84.0).abs() < 1e-9);
        assert!((atm.target_1_premium - 180.0).abs() < 1e-9);
        assert!((atm.target_2_premium - 240.0).abs() < 1e-9);

        let otm = s
            .select(&chain, OptionType::Put, 24950.0, now(), 80.0, false, None)
            .unwrap();
        assert_eq!(otm.strike, 24850.0);
        assert!((otm.stop_loss_premium - 42.0).abs() < 1e-9);
        assert!((otm.target_1_premium - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_uses_calculator_when_greeks_missing() {
        let s = StrikeSelector::default();
        let chain = chain(now(), false);
        assert!(s
            .select(&chain, OptionType::Call, 24950.0, now(), 80.0, true, None)
            .is_none());
        let pick = s
            .select(&chain, OptionType::Call, 24950.0, now(), 40.0, true, Some(&LinearGreeks))
            .unwrap();
        assert_eq!(pick.strike, 25000.0);
        assert_eq!(pick.greeks_source, GreeksSource::Calculated);
    }

    #[test]
    fn test_underlying_levels() {
        let s = StrikeSelector::default();
        let atr = s
            .underlying_levels(Direction::Bullish, 25000.0, None, Some(40.0))
            .unwrap();
        assert_eq!(atr.source, LevelSource::Atr);
        assert_eq!(atr.stop_loss, 24960.0);
        assert_eq!(atr.target_1, 25060.0);
        assert_eq!(atr.target_2, 25120.0);

        let pct = s
            .underlying_levels(Direction::Bearish, 25000.0, None, None)
            .unwrap();
        assert_eq!(pct.source, LevelSource::SpotPercent);
        assert!((pct.stop_loss - 25075.0).abs() < 1e-9);
        assert!(pct.target_1 < pct.entry);

        assert!(s.underlying_levels(Direction::Neutral, 25000.0, None, Some(40.0)).is_none());
    }
}
