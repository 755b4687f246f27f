//! End-to-end scenarios through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use topdown_signal::config::Config;
use topdown_signal::constituents::{combine, AggregatorConfig, Constituent, ScoredStock, StockScore};
use topdown_signal::data::{InMemoryEventStore, InstrumentSnapshot, MarketSnapshot, SnapshotProvider};
use topdown_signal::market::{Candle, CandleSet, Timeframe};
use topdown_signal::patterns::PatternConfig;
use topdown_signal::strategy::{
    Action, AmdConfig, AmdEngine, Direction, HtfBiasEngine, HtfConfig, ManipulationType, MarketRegime, MtfConfig,
    MtfEngine, OptionType, RangePosition, RegimeClassifier, RegimeConfig, SignalComposer, SignalContext, ZoneCandidate,
};
use topdown_signal::SignalEngine;

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Rising bars: each low clears the high two bars back
fn rising(t0: DateTime<Utc>, n: usize, start: f64, step: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let low = start + step * i as f64;
            let high = low + step * 0.6;
            Candle::new(t0 + Duration::days(i as i64), low + step * 0.1, high, low, high - step * 0.1, 1.0e6)
        })
        .collect()
}

fn falling(t0: DateTime<Utc>, n: usize, start: f64, step: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let high = start - step * i as f64;
            let low = high - step * 0.6;
            Candle::new(t0 + Duration::days(i as i64), high - step * 0.1, high, low, low + step * 0.1, 1.0e6)
        })
        .collect()
}

fn four_hour(t0: DateTime<Utc>, ranges: &[(f64, f64)]) -> Vec<Candle> {
    ranges
        .iter()
        .enumerate()
        .map(|(i, &(h, l))| {
            let mid = (h + l) / 2.0;
            Candle::new(t0 + Duration::hours(4 * i as i64), mid, h, l, mid, 1.0e5)
        })
        .collect()
}

fn fifteen_minute(t0: DateTime<Utc>, ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    ohlc.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle::new(t0 + Duration::minutes(15 * i as i64), o, h, l, c, 2.0e4))
        .collect()
}

/// Session open on 2024-06-03 (09:15 IST)
fn session_open() -> DateTime<Utc> {
    utc(2024, 6, 3, 3, 45)
}

/// Sell-side liquidity at 24900 (two equal swing lows) defended three times,
/// pierced to 24870, reclaimed at 24950 on the next candle
fn nifty_trap_bars() -> Vec<Candle> {
    fifteen_minute(
        session_open(),
        &[
            (24960.0, 24980.0, 24940.0, 24950.0),
            (24950.0, 24960.0, 24920.0, 24930.0),
            (24930.0, 24940.0, 24900.0, 24920.0),
            (24920.0, 24960.0, 24915.0, 24950.0),
            (24950.0, 24970.0, 24930.0, 24940.0),
            (24940.0, 24950.0, 24910.0, 24925.0),
            (24925.0, 24935.0, 24900.0, 24915.0),
            (24915.0, 24940.0, 24908.0, 24930.0),
            (24930.0, 24945.0, 24912.0, 24920.0),
            (24920.0, 24935.0, 24910.0, 24925.0),
            (24920.0, 24925.0, 24870.0, 24880.0),
            (24880.0, 24955.0, 24875.0, 24950.0),
        ],
    )
}

fn tight_breach() -> AmdConfig {
    AmdConfig {
        breach_pct: 0.1,
        ..Default::default()
    }
}

#[test]
fn test_rising_daily_structure_is_bullish() {
    let bars = rising(utc(2024, 1, 1, 3, 45), 10, 24000.0, 100.0);
    let price = bars[bars.len() - 1].close;
    let mut set = CandleSet::new();
    set.insert(Timeframe::Daily, bars);

    let bias = HtfBiasEngine::new(HtfConfig::default(), &PatternConfig::default()).analyze(&set, price);
    assert_eq!(bias.overall_direction, Direction::Bullish);
    assert!(bias.bias_strength > 50.0);
}

#[test]
fn test_price_near_range_low_sits_in_lower_third() {
    let mut set = CandleSet::new();
    set.insert(
        Timeframe::H4,
        four_hour(utc(2024, 5, 1, 3, 45), &[(25000.0, 24900.0), (25100.0, 24950.0), (25050.0, 24920.0)]),
    );
    let mtf = MtfEngine::new(MtfConfig::default(), &PatternConfig::default())
        .analyze(&set, 24920.0, utc(2024, 5, 2, 4, 30))
        .unwrap();
    assert_eq!((mtf.range_low, mtf.range_high), (24900.0, 25100.0));
    assert_eq!(mtf.position, RangePosition::Lower);
}

#[test]
fn test_support_break_and_reclaim_is_a_bear_trap() {
    let bars = nifty_trap_bars();
    let amd = AmdEngine::new(tight_breach(), &PatternConfig::default());

    // tracking starts after the last swing-low touch
    let candidate = ZoneCandidate {
        start_index: 6,
        ..ZoneCandidate::support(24900.0, Timeframe::M15)
    };
    let events = amd.detect_with(&bars, Timeframe::M15, &[candidate]);

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.manipulation_type, ManipulationType::BearTrap);
    assert_eq!(event.key_level, 24900.0);
    assert_eq!(event.trade_signal, Action::BuyCall);
    assert_eq!(event.breach_extreme, 24870.0);
    assert!(event.confidence >= 70.0);
    assert_eq!(event.detection_time, bars[11].timestamp + Duration::minutes(15));
}

#[test]
fn test_confident_trap_overrides_bearish_htf() {
    let t0 = utc(2024, 6, 3, 3, 45);
    let bars = fifteen_minute(
        t0,
        &[
            (100.3, 100.5, 100.1, 100.2),
            (100.2, 100.3, 99.85, 99.9),
            (99.9, 100.1, 99.82, 99.85),
            (99.85, 99.9, 99.5, 99.6),
            (99.6, 100.0, 99.55, 99.95),
            (99.95, 100.3, 99.9, 100.2),
        ],
    );
    let amd = AmdEngine::new(AmdConfig::default(), &PatternConfig::default());
    let events = amd.detect_with(&bars, Timeframe::M15, &[ZoneCandidate::support(100.0, Timeframe::M15)]);
    assert_eq!(events.len(), 1);
    assert!(events[0].confidence >= 70.0);

    let weekly_bars = falling(utc(2024, 1, 1, 3, 45), 10, 25000.0, 100.0);
    let weekly_close = weekly_bars[weekly_bars.len() - 1].close;
    let mut weekly = CandleSet::new();
    weekly.insert(Timeframe::Weekly, weekly_bars);
    let htf = HtfBiasEngine::new(HtfConfig::default(), &PatternConfig::default()).analyze(&weekly, weekly_close);
    assert_eq!(htf.overall_direction, Direction::Bearish);

    let mut ctx = SignalContext::new("NIFTY", 100.2, events[0].detection_time + Duration::minutes(5), htf);
    ctx.events = events;

    let signal = SignalComposer::default().compose(&ctx, None);
    assert_eq!(signal.direction, Direction::Bullish);
    assert_eq!(signal.action, Action::BuyCall);
    assert_eq!(signal.option_type, Some(OptionType::Call));
    assert!(signal.ltf.manipulation_override);
}

#[test]
fn test_majority_bullish_constituents_forecast_an_up_move() {
    let stock = |i: usize, bull: f64, bear: f64| {
        let symbol = format!("S{:02}", i);
        ScoredStock {
            constituent: Constituent::new(symbol.clone(), 1.0, "Other"),
            score: StockScore::new(symbol, bull, bear),
            correlation: None,
        }
    };
    let stocks: Vec<ScoredStock> = (0..50)
        .map(|i| match i {
            0..=29 => stock(i, 65.0, 35.0),
            30..=44 => stock(i, 40.0, 60.0),
            _ => stock(i, 50.0, 50.0),
        })
        .collect();

    let regimes = RegimeClassifier::new(RegimeConfig::default());
    let config = AggregatorConfig::default();

    let at = utc(2024, 6, 3, 4, 0);
    let ranging = combine(
        "NIFTY",
        at,
        &stocks,
        MarketRegime::RangeBound,
        regimes.multiplier(MarketRegime::RangeBound),
        &config,
    );
    assert_eq!(ranging.expected_direction, Direction::Bullish);
    assert!((ranging.expected_move_pct - 0.1152).abs() < 1e-9);
    assert!((ranging.prob_up - 0.6).abs() < 1e-9);
    assert!((ranging.prob_down - 0.3).abs() < 1e-9);

    let trending = combine(
        "NIFTY",
        at,
        &stocks,
        MarketRegime::StrongTrendUp,
        regimes.multiplier(MarketRegime::StrongTrendUp),
        &config,
    );
    assert!((trending.expected_move_pct - 0.1872).abs() < 1e-9);
    assert!(ranging.expected_move_pct < trending.expected_move_pct);
}

fn trap_session_snapshot() -> MarketSnapshot {
    let mut candles = CandleSet::new();
    candles.insert(Timeframe::Daily, rising(utc(2024, 5, 20, 3, 45), 10, 24000.0, 100.0));
    candles.insert(
        Timeframe::H4,
        four_hour(utc(2024, 5, 31, 3, 45), &[(25000.0, 24900.0), (25100.0, 24950.0), (25050.0, 24920.0)]),
    );
    candles.insert(Timeframe::M15, nifty_trap_bars());

    let mut instruments = HashMap::new();
    instruments.insert(
        "NIFTY".to_string(),
        InstrumentSnapshot {
            quote: Some(24950.0),
            candles,
            ..Default::default()
        },
    );
    MarketSnapshot {
        as_of: None,
        instruments,
        events: Vec::new(),
    }
}

fn trap_session_engine(store: Arc<InMemoryEventStore>) -> SignalEngine {
    let config = Config {
        amd: tight_breach(),
        ..Default::default()
    };
    SignalEngine::new(&config, Arc::new(SnapshotProvider::new(trap_session_snapshot())), store)
}

#[tokio::test]
async fn test_trap_session_gives_buy_call() {
    let store = Arc::new(InMemoryEventStore::new());
    let engine = trap_session_engine(store.clone());

    let signal = engine.analyze(utc(2024, 6, 3, 6, 50)).await.unwrap();

    assert_eq!(signal.htf.overall_direction, Direction::Bullish);
    assert_eq!(signal.mtf.as_ref().map(|m| m.position), Some(RangePosition::Lower));
    assert_eq!(signal.action, Action::BuyCall);
    assert_eq!(signal.action.to_string(), "BUY CALL");

    let trap = signal.ltf.manipulation.as_ref().unwrap();
    assert_eq!(trap.manipulation_type, ManipulationType::BearTrap);
    assert_eq!(trap.key_level, 24900.0);
    assert!(trap.confidence >= 70.0);
    assert!(!signal.ltf.manipulation_override);
    assert_eq!(store.event_count("NIFTY"), 1);
}

#[test]
fn test_repeated_runs_are_identical() {
    tokio_test::block_on(async {
        let store = Arc::new(InMemoryEventStore::new());
        let engine = trap_session_engine(store.clone());
        let at = utc(2024, 6, 3, 6, 50);

        let first = engine.analyze(at).await.unwrap();
        let second = engine.analyze(at).await.unwrap();
        assert_eq!(first, second);
        // the second run finds the trap already recorded
        assert_eq!(store.event_count("NIFTY"), 1);
    });
}
