//! Top-Down Signal Strategy
//!
//! This module turns a multi-timeframe candle snapshot into one
//! directional recommendation:
//!
//! ## Structure
//! - `htf` - Monthly/Weekly bias from structure, FVG and OB votes
//! - `mtf` - Daily/4H range position, expansion and session phase
//!
//! ## Lower timeframes
//! - `amd` - trap (false breakout) state machine
//! - `entry` - tiered entry zones
//!
//! ## Evidence
//! - `regime` - ADX/ATR regime classification
//! - `confirmation` - ML ensemble, candlestick confluence, futures basis
//! - `confidence` - component ceilings and mapping
//!
//! ## Decision
//! - `composer` - the single deterministic pass to BUY CALL / BUY PUT / WAIT
//! - `strike` - strike, premium bands and underlying levels
//! - `engine` - async coordinator that gathers data and runs the pass

// Shared types
pub mod types;

// Structure
pub mod htf;
pub mod mtf;

// Lower timeframes
pub mod amd;
pub mod entry;

// Evidence
pub mod confidence;
pub mod confirmation;
pub mod regime;

// Decision
pub mod composer;
pub mod engine;
pub mod strike;

// Re-exports
pub use amd::{sort_events, AmdConfig, AmdEngine, ManipulationEvent, ManipulationType, TrapState, ZoneCandidate};
pub use composer::{ComposerConfig, FinalSignal, LtfSummary, SignalComposer, SignalContext};
pub use confidence::{ComponentStrengths, ConfidenceBreakdown};
pub use confirmation::{Confirmation, ConfirmationConfig, ConfirmationSet, ConfirmationSource, ConfirmationStack};
pub use engine::SignalEngine;
pub use entry::{EntryConfig, EntryTier, EntryType, EntryZone, EntryZoneFinder};
pub use htf::{HtfBias, HtfBiasEngine, HtfConfig, MarketStructure};
pub use mtf::{MtfAnalysis, MtfConfig, MtfEngine, RangePosition, SessionPhase};
pub use regime::{RegimeClassification, RegimeClassifier, RegimeConfig};
pub use strike::{StrikeConfig, StrikeSelection, StrikeSelector, TradeLevels};
pub use types::*;
