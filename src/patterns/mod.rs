//! Price-action pattern detectors
//!
//! Each detector works on one timeframe's ordered candle window and returns
//! plain result structs. Too little history yields an empty result.

pub mod candlestick;
pub mod fvg;
pub mod liquidity;
pub mod order_block;
pub mod swing;

use serde::{Deserialize, Serialize};

pub use candlestick::{CandlePattern, CandlestickScanner, PatternMatch};
pub use fvg::{FairValueGap, FvgDetector, FvgStatus};
pub use liquidity::{LiquidityDetector, LiquiditySide, LiquidityZone};
pub use order_block::{OrderBlock, OrderBlockDetector};
pub use swing::{find_swing_points, SwingKind, SwingPoint};

/// Directional polarity of a detected pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Bullish,
    Bearish,
}

impl Polarity {
    pub fn opposite(&self) -> Self {
        match self {
            Polarity::Bullish => Polarity::Bearish,
            Polarity::Bearish => Polarity::Bullish,
        }
    }
}

/// Pattern detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Swing window half-width N
    pub swing_lookback: usize,
    /// Keep gaps whose midpoint is within this % of price
    pub fvg_proximity_pct: f64,
    pub fvg_max_results: usize,
    /// Displacement must clear the block by this multiple of its body
    pub ob_displacement_multiplier: f64,
    /// How many candles before the displacement are searched for the block
    pub ob_lookback: usize,
    pub ob_max_results: usize,
    /// Cluster tolerance for liquidity levels (%)
    pub liquidity_tolerance_pct: f64,
    /// Candles allowed between trade-through and close back for a sweep
    pub sweep_reversal_candles: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            swing_lookback: 2,
            fvg_proximity_pct: 5.0,
            fvg_max_results: 10,
            ob_displacement_multiplier: 1.5,
            ob_lookback: 3,
            ob_max_results: 10,
            liquidity_tolerance_pct: 0.1,
            sweep_reversal_candles: 3,
        }
    }
}
