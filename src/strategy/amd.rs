//! LTF AMD Engine
//!
//! Detects manipulation (false breakouts) on the lower timeframes. Every
//! support/resistance candidate runs through a small state machine:
//!
//! WATCHING -> BROKEN -> RECOVERING -> CONFIRMED_TRAP | INVALIDATED
//!
//! A confirmed bear trap (support broken, then reclaimed) calls for calls;
//! a bull trap for puts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{Action, Direction};
use crate::market::{Candle, CandleSet, Timeframe};
use crate::patterns::{
    LiquidityDetector, LiquiditySide, OrderBlockDetector, PatternConfig, Polarity,
};

/// Configuration for trap detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmdConfig {
    /// Minimum penetration beyond the level (%)
    pub breach_pct: f64,
    /// Defended closes required before a break counts
    pub prior_closes: usize,
    /// Candles allowed for the recovery after a break
    pub recovery_candles: usize,
    /// Minimum recovery from the extreme, % of level
    pub min_recovery_pct: f64,
    /// How long an event stays active
    pub freshness_minutes: i64,
    /// Other zones within this % of the level add confidence
    pub alignment_tolerance_pct: f64,
}

impl Default for AmdConfig {
    fn default() -> Self {
        Self {
            breach_pct: 0.2,
            prior_closes: 3,
            recovery_candles: 2,
            min_recovery_pct: 0.1,
            freshness_minutes: 30,
            alignment_tolerance_pct: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrapState {
    Watching,
    Broken,
    Recovering,
    ConfirmedTrap,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSide {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSource {
    OrderBlock,
    Liquidity,
    Manual,
}

/// A level the trap machine watches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneCandidate {
    pub level: f64,
    pub side: LevelSide,
    pub source: ZoneSource,
    /// Touches known before tracking starts
    pub base_tests: u32,
    pub timeframe: Timeframe,
    /// Tracking begins after this candle index
    pub start_index: usize,
}

impl ZoneCandidate {
    pub fn support(level: f64, timeframe: Timeframe) -> Self {
        Self {
            level,
            side: LevelSide::Support,
            source: ZoneSource::Manual,
            base_tests: 0,
            timeframe,
            start_index: 0,
        }
    }

    pub fn resistance(level: f64, timeframe: Timeframe) -> Self {
        Self {
            side: LevelSide::Resistance,
            ..Self::support(level, timeframe)
        }
    }

    pub fn with_tests(mut self, tests: u32) -> Self {
        self.base_tests = tests;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManipulationType {
    BearTrap,
    BullTrap,
}

/// Confirmed false breakout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulationEvent {
    pub manipulation_type: ManipulationType,
    pub key_level: f64,
    /// 0-100
    pub confidence: f64,
    pub trade_signal: Action,
    pub detection_time: DateTime<Utc>,
    pub recovery_points: f64,
    pub timeframe: Timeframe,
    /// Furthest price reached beyond the level
    pub breach_extreme: f64,
    pub prior_tests: u32,
}

impl ManipulationEvent {
    /// Direction of the trade the trap calls for
    pub fn direction(&self) -> Direction {
        match self.manipulation_type {
            ManipulationType::BearTrap => Direction::Bullish,
            ManipulationType::BullTrap => Direction::Bearish,
        }
    }

    /// Detected at or before `now` and no older than `freshness`
    pub fn is_active(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        self.detection_time <= now && now - self.detection_time <= freshness
    }
}

/// Outcome of one confirmed cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapConfirmation {
    pub index: usize,
    pub extreme: f64,
    pub recovery: f64,
    pub prior_tests: u32,
}

/// State machine for a single level
#[derive(Debug, Clone)]
pub struct TrapTracker {
    level: f64,
    side: LevelSide,
    breach: f64,
    min_recovery: f64,
    prior_closes: usize,
    recovery_candles: usize,
    state: TrapState,
    defended_run: usize,
    touches: u32,
    in_band: bool,
    extreme: f64,
    since_break: usize,
}

impl TrapTracker {
    pub fn new(candidate: &ZoneCandidate, config: &AmdConfig) -> Self {
        Self {
            level: candidate.level,
            side: candidate.side,
            breach: config.breach_pct / 100.0,
            min_recovery: candidate.level * config.min_recovery_pct / 100.0,
            prior_closes: config.prior_closes,
            recovery_candles: config.recovery_candles.max(1),
            state: TrapState::Watching,
            defended_run: 0,
            touches: candidate.base_tests,
            in_band: false,
            extreme: candidate.level,
            since_break: 0,
        }
    }

    pub fn state(&self) -> TrapState {
        self.state
    }

    pub fn prior_tests(&self) -> u32 {
        self.touches
    }

    /// Close on the defended side, within the breach tolerance
    fn defended(&self, close: f64) -> bool {
        match self.side {
            LevelSide::Support => close >= self.level * (1.0 - self.breach),
            LevelSide::Resistance => close <= self.level * (1.0 + self.breach),
        }
    }

    fn pierced(&self, candle: &Candle) -> bool {
        match self.side {
            LevelSide::Support => candle.low <= self.level * (1.0 - self.breach),
            LevelSide::Resistance => candle.high >= self.level * (1.0 + self.breach),
        }
    }

    /// Wick inside the band on the defended side of the level
    fn touched(&self, candle: &Candle) -> bool {
        match self.side {
            LevelSide::Support => candle.low <= self.level * (1.0 + self.breach),
            LevelSide::Resistance => candle.high >= self.level * (1.0 - self.breach),
        }
    }

    fn extreme_of(&self, candle: &Candle) -> f64 {
        match self.side {
            LevelSide::Support => candle.low,
            LevelSide::Resistance => candle.high,
        }
    }

    /// Feed one candle; returns the state after it
    pub fn step(&mut self, candle: &Candle) -> TrapState {
        match self.state {
            TrapState::ConfirmedTrap => {}
            TrapState::Watching | TrapState::Invalidated => {
                if self.state == TrapState::Invalidated {
                    self.state = TrapState::Watching;
                    self.defended_run = 0;
                    self.in_band = false;
                }
                if self.pierced(candle) && self.defended_run >= self.prior_closes {
                    self.state = TrapState::Broken;
                    self.extreme = self.extreme_of(candle);
                    self.since_break = 0;
                    return self.state;
                }
                let touched = self.touched(candle) && !self.pierced(candle);
                if touched && !self.in_band {
                    self.touches += 1;
                }
                self.in_band = touched;
                if self.defended(candle.close) {
                    self.defended_run += 1;
                } else {
                    self.defended_run = 0;
                }
            }
            TrapState::Broken | TrapState::Recovering => {
                self.since_break += 1;
                let extreme = self.extreme_of(candle);
                self.extreme = match self.side {
                    LevelSide::Support => self.extreme.min(extreme),
                    LevelSide::Resistance => self.extreme.max(extreme),
                };
                if self.defended(candle.close) {
                    self.state = TrapState::Recovering;
                    if self.recovery(candle.close) >= self.min_recovery {
                        self.state = TrapState::ConfirmedTrap;
                        return self.state;
                    }
                }
                if self.since_break >= self.recovery_candles {
                    self.state = TrapState::Invalidated;
                }
            }
        }
        self.state
    }

    /// Distance from the breach extreme back to `close`
    pub fn recovery(&self, close: f64) -> f64 {
        match self.side {
            LevelSide::Support => close - self.extreme,
            LevelSide::Resistance => self.extreme - close,
        }
    }

    pub fn extreme(&self) -> f64 {
        self.extreme
    }
}

/// LTF AMD Engine
pub struct AmdEngine {
    config: AmdConfig,
    ob: OrderBlockDetector,
    liquidity: LiquidityDetector,
}

impl AmdEngine {
    pub fn new(config: AmdConfig, patterns: &PatternConfig) -> Self {
        Self {
            config,
            ob: OrderBlockDetector::new(patterns),
            liquidity: LiquidityDetector::new(patterns),
        }
    }

    pub fn config(&self) -> &AmdConfig {
        &self.config
    }

    pub fn freshness(&self) -> Duration {
        Duration::minutes(self.config.freshness_minutes)
    }

    /// Support and resistance candidates of one frame
    pub fn candidates(&self, candles: &[Candle], timeframe: Timeframe) -> Vec<ZoneCandidate> {
        let blocks = self.ob.scan(candles, timeframe).into_iter().map(|b| ZoneCandidate {
            level: b.defended_level(),
            side: match b.ob_type {
                Polarity::Bullish => LevelSide::Support,
                Polarity::Bearish => LevelSide::Resistance,
            },
            source: ZoneSource::OrderBlock,
            base_tests: 0,
            timeframe,
            start_index: b.displacement_index,
        });
        let zones = self.liquidity.detect(candles, timeframe).into_iter().map(|z| ZoneCandidate {
            level: z.level,
            side: match z.zone_type {
                LiquiditySide::SellSide => LevelSide::Support,
                LiquiditySide::BuySide => LevelSide::Resistance,
            },
            source: ZoneSource::Liquidity,
            base_tests: z.strength,
            timeframe,
            start_index: z.last_touch_index,
        });
        blocks.chain(zones).collect()
    }

    /// Run one candidate through the machine; the first confirmed cycle wins
    pub fn track(&self, candles: &[Candle], candidate: &ZoneCandidate) -> Option<TrapConfirmation> {
        let mut tracker = TrapTracker::new(candidate, &self.config);
        for (i, candle) in candles.iter().enumerate().skip(candidate.start_index + 1) {
            if tracker.step(candle) == TrapState::ConfirmedTrap {
                return Some(TrapConfirmation {
                    index: i,
                    extreme: tracker.extreme(),
                    recovery: tracker.recovery(candle.close),
                    prior_tests: tracker.prior_tests(),
                });
            }
        }
        None
    }

    /// Confidence of a confirmed trap
    pub fn confidence(&self, level: f64, confirmation: &TrapConfirmation, aligned_zones: usize) -> f64 {
        let breach_points = level * self.config.breach_pct / 100.0;
        let recovery_score = if breach_points > 0.0 {
            (8.0 * confirmation.recovery / breach_points).min(24.0)
        } else {
            0.0
        };
        let score = 50.0
            + 6.0 * confirmation.prior_tests.min(3) as f64
            + recovery_score.max(0.0)
            + 4.0 * aligned_zones.min(2) as f64;
        score.min(100.0)
    }

    /// Evaluate explicit candidates against one frame
    pub fn detect_with(
        &self,
        candles: &[Candle],
        timeframe: Timeframe,
        candidates: &[ZoneCandidate],
    ) -> Vec<ManipulationEvent> {
        let tolerance = self.config.alignment_tolerance_pct / 100.0;
        let mut events: Vec<ManipulationEvent> = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            let Some(confirmation) = self.track(candles, candidate) else {
                continue;
            };
            let aligned = candidates
                .iter()
                .enumerate()
                .filter(|(j, other)| {
                    *j != i
                        && other.side == candidate.side
                        && (other.level - candidate.level).abs() <= candidate.level * tolerance
                })
                .count();

            let manipulation_type = match candidate.side {
                LevelSide::Support => ManipulationType::BearTrap,
                LevelSide::Resistance => ManipulationType::BullTrap,
            };
            let confirm_candle = &candles[confirmation.index];
            let event = ManipulationEvent {
                manipulation_type,
                key_level: candidate.level,
                confidence: self.confidence(candidate.level, &confirmation, aligned),
                trade_signal: match manipulation_type {
                    ManipulationType::BearTrap => Action::BuyCall,
                    ManipulationType::BullTrap => Action::BuyPut,
                },
                detection_time: confirm_candle.timestamp + timeframe.duration(),
                recovery_points: confirmation.recovery,
                timeframe,
                breach_extreme: confirmation.extreme,
                prior_tests: confirmation.prior_tests,
            };

            info!(
                timeframe = %timeframe,
                kind = ?event.manipulation_type,
                level = event.key_level,
                confidence = event.confidence,
                "Trap confirmed"
            );

            // overlapping zones confirm on the same candle; keep the strongest
            match events.iter_mut().find(|e| {
                e.manipulation_type == event.manipulation_type
                    && e.detection_time == event.detection_time
            }) {
                Some(existing) if existing.confidence >= event.confidence => {}
                Some(existing) => *existing = event,
                None => events.push(event),
            }
        }
        events
    }

    /// Confirmed traps across all LTF frames, newest first
    pub fn detect(&self, candles: &CandleSet) -> Vec<ManipulationEvent> {
        let mut events = Vec::new();
        for tf in Timeframe::LTF {
            let Some(series) = candles.get(&tf) else { continue };
            let candidates = self.candidates(series, tf);
            debug!(timeframe = %tf, candidates = candidates.len(), "Tracking trap candidates");
            events.extend(self.detect_with(series, tf, &candidates));
        }
        sort_events(&mut events);
        events
    }

    /// Events still inside the freshness window at `now`
    pub fn active<'a>(
        &self,
        events: &'a [ManipulationEvent],
        now: DateTime<Utc>,
    ) -> Vec<&'a ManipulationEvent> {
        let freshness = self.freshness();
        events.iter().filter(|e| e.is_active(now, freshness)).collect()
    }
}

/// Newest first, then by confidence
pub fn sort_events(events: &mut [ManipulationEvent]) {
    events.sort_by(|a, b| {
        b.detection_time
            .cmp(&a.detection_time)
            .then(b.confidence.total_cmp(&a.confidence))
    });
}
