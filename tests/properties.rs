//! Property tests for the detectors and the decision pass

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use topdown_signal::constituents::normalize_weights;
use topdown_signal::market::{Candle, CandleSet, Timeframe};
use topdown_signal::patterns::{fvg, find_swing_points, FvgStatus, PatternConfig, Polarity};
use topdown_signal::strategy::confidence::{
    CANDLESTICK_CEILING, CONSTITUENTS_CEILING, FUTURES_CEILING, HTF_CEILING, LTF_CEILING, ML_CEILING,
};
use topdown_signal::strategy::{
    Action, ComponentStrengths, ConfidenceBreakdown, Direction, EntryConfig, EntryZoneFinder, HtfBias, SignalComposer,
    SignalContext,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 3, 45, 0).unwrap()
}

/// Random walk of well-formed 5m candles starting at 100
fn candles(max_len: usize) -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((-1.0f64..1.0, 0.0f64..0.8, 0.0f64..0.8), 0..max_len).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (delta, up, down))| {
                let open = price;
                let close = open + delta;
                price = close;
                Candle::new(
                    t0() + Duration::minutes(5 * i as i64),
                    open,
                    open.max(close) + up,
                    open.min(close) - down,
                    close,
                    1000.0,
                )
            })
            .collect()
    })
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Bullish),
        Just(Direction::Bearish),
        Just(Direction::Neutral),
    ]
}

proptest! {
    #[test]
    fn fvg_bounds_and_status_are_consistent(bars in candles(60)) {
        for gap in fvg::scan(&bars, Timeframe::M5) {
            prop_assert!(gap.high > gap.low);
            prop_assert!(gap.low <= gap.midpoint && gap.midpoint <= gap.high);
            match gap.status {
                FvgStatus::Active => prop_assert_eq!(gap.test_count, 0),
                FvgStatus::TestedOnce => prop_assert!(gap.first_test_at.is_some()),
                FvgStatus::TestedTwice => {
                    prop_assert!(gap.test_count >= 2);
                    prop_assert!(gap.first_test_at <= gap.second_test_at);
                }
                FvgStatus::Filled => prop_assert!(gap.filled_at.is_some()),
            }
            if let Some(filled_at) = gap.filled_at {
                prop_assert!(filled_at > gap.created_at);
            }
            let c1 = &bars[gap.index - 2];
            let c3 = &bars[gap.index];
            match gap.fvg_type {
                Polarity::Bullish => prop_assert!(c3.low > c1.high),
                Polarity::Bearish => prop_assert!(c3.high < c1.low),
            }
        }
    }

    #[test]
    fn swing_points_respect_the_window(bars in candles(30), lookback in 1usize..5) {
        let points = find_swing_points(&bars, lookback);
        if bars.len() < 2 * lookback + 1 {
            prop_assert!(points.is_empty());
        }
        for p in &points {
            prop_assert!(p.index >= lookback && p.index + lookback < bars.len());
        }
    }

    #[test]
    fn normalized_weights_sum_to_one(weights in prop::collection::vec(0.01f64..100.0, 1..60)) {
        let normalized = normalize_weights(&weights);
        prop_assert_eq!(normalized.len(), weights.len());
        let total: f64 = normalized.iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(normalized.iter().all(|w| *w > 0.0));
    }

    #[test]
    fn confidence_never_exceeds_ceilings(
        htf in -0.5f64..1.5,
        ltf in -0.5f64..1.5,
        ml in -0.5f64..1.5,
        candlestick in -0.5f64..1.5,
        futures in -0.5f64..1.5,
        constituents in -0.5f64..1.5,
    ) {
        let c = ConfidenceBreakdown::from_strengths(&ComponentStrengths {
            htf,
            ltf,
            ml,
            candlestick,
            futures,
            constituents,
        });
        let within = |points: f64, ceiling: f64| (0.0..=ceiling).contains(&points);
        prop_assert!(within(c.htf, HTF_CEILING));
        prop_assert!(within(c.ltf, LTF_CEILING));
        prop_assert!(within(c.ml, ML_CEILING));
        prop_assert!(within(c.candlestick, CANDLESTICK_CEILING));
        prop_assert!(within(c.futures, FUTURES_CEILING));
        prop_assert!(within(c.constituents, CONSTITUENTS_CEILING));
        prop_assert!(c.total <= 100.0 + 1e-9);
    }

    #[test]
    fn entry_levels_are_ordered(bars in candles(80), htf_direction in direction()) {
        prop_assume!(!bars.is_empty());
        let price = bars[bars.len() - 1].close;
        let mut set = CandleSet::new();
        set.insert(Timeframe::M5, bars);
        let htf = HtfBias {
            overall_direction: htf_direction,
            bias_strength: 60.0,
            ..HtfBias::neutral(price)
        };

        let finder = EntryZoneFinder::new(EntryConfig::default(), &PatternConfig::default());
        for zone in finder.find(&set, price, &htf, None) {
            prop_assert!(zone.zone_low <= zone.trigger_price && zone.trigger_price <= zone.zone_high);
            match zone.direction {
                Direction::Bullish => {
                    prop_assert!(zone.stop_loss < zone.trigger_price);
                    prop_assert!(zone.trigger_price < zone.target_1 && zone.target_1 < zone.target_2);
                }
                Direction::Bearish => {
                    prop_assert!(zone.stop_loss > zone.trigger_price);
                    prop_assert!(zone.trigger_price > zone.target_1 && zone.target_1 > zone.target_2);
                }
                Direction::Neutral => prop_assert!(false, "entry zones always carry a direction"),
            }
        }
    }

    #[test]
    fn composing_is_deterministic(
        htf_direction in direction(),
        strength in 0.0f64..100.0,
        spot in 1000.0f64..50000.0,
    ) {
        let htf = HtfBias {
            overall_direction: htf_direction,
            bias_strength: strength,
            ..HtfBias::neutral(spot)
        };
        let ctx = SignalContext::new("NIFTY", spot, t0(), htf);
        let composer = SignalComposer::default();

        let first = composer.compose(&ctx, None);
        let second = composer.compose(&ctx, None);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.action, Action::from_direction(htf_direction));
        prop_assert!(first.confidence.total <= 100.0 + 1e-9);
    }
}
