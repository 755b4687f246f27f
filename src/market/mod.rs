//! Market data primitives: candles, timeframes and indicators

pub mod candle;
pub mod indicators;

pub use candle::{closes, price_range, tail, Candle, Timeframe};
pub use indicators::{Adx, Macd};

use std::collections::BTreeMap;

/// Candle series per timeframe for one symbol, oldest bar first
pub type CandleSet = BTreeMap<Timeframe, Vec<Candle>>;
