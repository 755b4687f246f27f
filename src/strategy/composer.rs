//! Top-Down Signal Composer
//!
//! One deterministic pass per snapshot:
//! 1. direction from the HTF bias
//! 2. momentum override when HTF is neutral
//! 3. manipulation override from a fresh, confident trap
//! 4. reversal-play flag
//! 5. action and option type
//! 6. confidence breakdown
//! 7. strike and levels
//!
//! The composer keeps no state between calls.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::amd::{AmdConfig, ManipulationEvent};
use super::confidence::{ComponentStrengths, ConfidenceBreakdown};
use super::confirmation::ConfirmationSet;
use super::entry::{EntryTier, EntryZone};
use super::htf::HtfBias;
use super::mtf::MtfAnalysis;
use super::regime::RegimeClassification;
use super::strike::{StrikeConfig, StrikeSelection, StrikeSelector, TradeLevels};
use super::types::{Action, Direction, OptionType, PremiumDiscount};
use crate::constituents::IndexPrediction;
use crate::data::{GreeksCalculator, OptionChain};

/// Configuration for the composer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Alignment score that lets an LTF entry set a neutral direction
    pub momentum_alignment_min: f64,
    /// Trap confidence needed to override the HTF direction
    pub manipulation_min_confidence: f64,
    pub strike: StrikeConfig,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            momentum_alignment_min: 50.0,
            manipulation_min_confidence: 70.0,
            strike: StrikeConfig::default(),
        }
    }
}

/// Everything the composer looks at, owned so it can be built piecemeal
#[derive(Debug, Clone)]
pub struct SignalContext {
    pub symbol: String,
    pub spot: f64,
    pub at: DateTime<Utc>,
    pub htf: HtfBias,
    pub mtf: Option<MtfAnalysis>,
    /// Best first
    pub entries: Vec<EntryZone>,
    /// Trap history plus fresh detections
    pub events: Vec<ManipulationEvent>,
    pub confirmations: ConfirmationSet,
    pub regime: Option<RegimeClassification>,
    pub index_forecast: Option<IndexPrediction>,
    pub option_chain: Option<OptionChain>,
    pub atr: Option<f64>,
}

impl SignalContext {
    pub fn new(symbol: impl Into<String>, spot: f64, at: DateTime<Utc>, htf: HtfBias) -> Self {
        Self {
            symbol: symbol.into(),
            spot,
            at,
            htf,
            mtf: None,
            entries: Vec::new(),
            events: Vec::new(),
            confirmations: ConfirmationSet::unavailable("not evaluated"),
            regime: None,
            index_forecast: None,
            option_chain: None,
            atr: None,
        }
    }
}

/// Result of steps 1-3
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionDecision {
    pub direction: Direction,
    pub momentum_override: bool,
    pub manipulation_override: bool,
    /// Trap that qualified for the override step
    pub trigger_event: Option<ManipulationEvent>,
}

/// Lower-timeframe evidence behind the signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LtfSummary {
    /// Best entry zone in the final direction
    pub entry: Option<EntryZone>,
    /// Strongest active trap in the final direction
    pub manipulation: Option<ManipulationEvent>,
    pub momentum_override: bool,
    pub manipulation_override: bool,
    pub reversal_play: bool,
}

/// The composed recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub direction: Direction,
    pub option_type: Option<OptionType>,
    pub spot: f64,
    pub htf: HtfBias,
    pub mtf: Option<MtfAnalysis>,
    pub ltf: LtfSummary,
    pub confirmations: ConfirmationSet,
    pub confidence: ConfidenceBreakdown,
    pub levels: Option<TradeLevels>,
    pub strike: Option<StrikeSelection>,
    pub regime: Option<RegimeClassification>,
    pub index_forecast: Option<IndexPrediction>,
    pub reasons: Vec<String>,
}

pub struct SignalComposer {
    config: ComposerConfig,
    strikes: StrikeSelector,
    /// Trap window, shared with the AMD engine
    freshness: Duration,
}

impl SignalComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self {
            strikes: StrikeSelector::new(config.strike.clone()),
            config,
            freshness: Duration::minutes(AmdConfig::default().freshness_minutes),
        }
    }

    /// Use the AMD engine's event window
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Steps 1-3: HTF direction, momentum override, manipulation override
    pub fn resolve_direction(&self, ctx: &SignalContext) -> DirectionDecision {
        let mut decision = DirectionDecision {
            direction: ctx.htf.overall_direction,
            momentum_override: false,
            manipulation_override: false,
            trigger_event: None,
        };

        if !decision.direction.is_directional() {
            if let Some(zone) = ctx.entries.iter().find(|z| {
                z.direction.is_directional()
                    && (z.alignment_score >= self.config.momentum_alignment_min
                        || z.tier == EntryTier::Tier1)
            }) {
                decision.direction = zone.direction;
                decision.momentum_override = true;
            }
        }

        let freshness = self.freshness();
        let trigger = ctx
            .events
            .iter()
            .filter(|e| {
                e.is_active(ctx.at, freshness)
                    && e.confidence >= self.config.manipulation_min_confidence
            })
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.detection_time.cmp(&b.detection_time))
            });
        if let Some(event) = trigger {
            if event.direction() != decision.direction {
                decision.direction = event.direction();
                decision.manipulation_override = true;
            }
            decision.trigger_event = Some(event.clone());
        }

        decision
    }

    /// Compose the final signal from a snapshot context
    pub fn compose(&self, ctx: &SignalContext, greeks: Option<&dyn GreeksCalculator>) -> FinalSignal {
        let mut reasons = vec![format!(
            "HTF bias {} (strength {:.0})",
            ctx.htf.overall_direction, ctx.htf.bias_strength
        )];

        // 1-3. Direction
        let decision = self.resolve_direction(ctx);
        let direction = decision.direction;
        let entry = ctx.entries.iter().find(|z| z.direction.agrees_with(direction)).cloned();

        if decision.momentum_override {
            if let Some(zone) = &entry {
                reasons.push(format!(
                    "Momentum override: {:?} {:?} on {} (alignment {:.0})",
                    zone.tier, zone.entry_type, zone.timeframe, zone.alignment_score
                ));
            }
        }
        if let Some(event) = &decision.trigger_event {
            if decision.manipulation_override {
                info!(
                    symbol = %ctx.symbol,
                    kind = ?event.manipulation_type,
                    level = event.key_level,
                    confidence = event.confidence,
                    "Manipulation override applied"
                );
                reasons.push(format!(
                    "Manipulation override: {:?} at {:.2} (confidence {:.0})",
                    event.manipulation_type, event.key_level, event.confidence
                ));
            } else {
                reasons.push(format!(
                    "{:?} at {:.2} confirms {}",
                    event.manipulation_type, event.key_level, direction
                ));
            }
        }

        // 4. Reversal play
        let reversal_play = entry.as_ref().is_some_and(|z| z.entry_type.is_second_test())
            && matches!(
                (ctx.htf.premium_discount, direction),
                (PremiumDiscount::Premium, Direction::Bearish)
                    | (PremiumDiscount::Discount, Direction::Bullish)
            );
        if reversal_play {
            reasons.push("Reversal play: second test at premium/discount extreme".to_string());
        }

        // 5. Action
        let action = Action::from_direction(direction);
        let option_type = direction.option_type();

        // 6. Confidence
        let freshness = self.freshness();
        let manipulation = ctx
            .events
            .iter()
            .filter(|e| e.is_active(ctx.at, freshness) && e.direction().agrees_with(direction))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .cloned();
        let strengths = self.strengths(ctx, direction, entry.as_ref(), manipulation.as_ref());
        let confidence = ConfidenceBreakdown::from_strengths(&strengths);
        let ltf_confirmed = strengths.ltf > 0.0;

        if direction.is_directional() {
            let parts: Vec<String> = confidence
                .components()
                .iter()
                .filter(|(_, points, _)| *points > 0.0)
                .map(|(name, points, ceiling)| format!("{} {:.1}/{:.0}", name, points, ceiling))
                .collect();
            reasons.push(format!(
                "Confidence {:.1} ({:?}): {}",
                confidence.total,
                confidence.level,
                if parts.is_empty() { "no support".to_string() } else { parts.join(", ") }
            ));
        } else {
            reasons.push("No directional edge".to_string());
        }

        // 7. Strike and levels
        let levels = self
            .strikes
            .underlying_levels(direction, ctx.spot, entry.as_ref(), ctx.atr);
        let strike = match (option_type, ctx.option_chain.as_ref()) {
            (Some(option_type), Some(chain)) => self.strikes.select(
                chain,
                option_type,
                ctx.spot,
                ctx.at,
                confidence.total,
                ltf_confirmed,
                greeks,
            ),
            _ => None,
        };

        debug!(
            symbol = %ctx.symbol,
            action = %action,
            confidence = confidence.total,
            ltf_confirmed,
            "Signal composed"
        );

        FinalSignal {
            symbol: ctx.symbol.clone(),
            timestamp: ctx.at,
            action,
            direction,
            option_type,
            spot: ctx.spot,
            htf: ctx.htf.clone(),
            mtf: ctx.mtf.clone(),
            ltf: LtfSummary {
                entry,
                manipulation,
                momentum_override: decision.momentum_override,
                manipulation_override: decision.manipulation_override,
                reversal_play,
            },
            confirmations: ctx.confirmations.clone(),
            confidence,
            levels,
            strike,
            regime: ctx.regime.clone(),
            index_forecast: ctx.index_forecast.clone(),
            reasons,
        }
    }

    /// 0-1 strengths; components that do not agree with `direction` stay at 0
    fn strengths(
        &self,
        ctx: &SignalContext,
        direction: Direction,
        entry: Option<&EntryZone>,
        manipulation: Option<&ManipulationEvent>,
    ) -> ComponentStrengths {
        if !direction.is_directional() {
            return ComponentStrengths::default();
        }
        let confirmation = |c: &super::confirmation::Confirmation| {
            if c.supports(direction) {
                c.confidence / 100.0
            } else {
                0.0
            }
        };

        let htf = if ctx.htf.overall_direction.agrees_with(direction) {
            ctx.htf.bias_strength / 100.0
        } else {
            0.0
        };
        let ltf = entry
            .map(|z| z.confidence)
            .unwrap_or(0.0)
            .max(manipulation.map(|e| e.confidence).unwrap_or(0.0))
            / 100.0;
        let constituents = ctx
            .index_forecast
            .as_ref()
            .filter(|f| f.expected_direction.agrees_with(direction))
            .map(|f| f.probability_for(direction))
            .unwrap_or(0.0);

        ComponentStrengths {
            htf,
            ltf,
            ml: confirmation(&ctx.confirmations.ml),
            candlestick: confirmation(&ctx.confirmations.candlestick),
            futures: confirmation(&ctx.confirmations.futures),
            constituents,
        }
    }
}

impl Default for SignalComposer {
    fn default() -> Self {
        Self::new(ComposerConfig::default())
    }
}
