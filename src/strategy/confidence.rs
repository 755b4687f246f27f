//! Confidence breakdown
//!
//! Six components, each mapped linearly from a 0-1 strength into its fixed
//! ceiling: HTF 40, LTF 25, ML 15, candlestick 10, futures 5, constituents 5.

use serde::{Deserialize, Serialize};

use super::types::ConfidenceLevel;

pub const HTF_CEILING: f64 = 40.0;
pub const LTF_CEILING: f64 = 25.0;
pub const ML_CEILING: f64 = 15.0;
pub const CANDLESTICK_CEILING: f64 = 10.0;
pub const FUTURES_CEILING: f64 = 5.0;
pub const CONSTITUENTS_CEILING: f64 = 5.0;

/// Raw 0-1 strengths before mapping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentStrengths {
    pub htf: f64,
    pub ltf: f64,
    pub ml: f64,
    pub candlestick: f64,
    pub futures: f64,
    pub constituents: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub htf: f64,
    pub ltf: f64,
    pub ml: f64,
    pub candlestick: f64,
    pub futures: f64,
    pub constituents: f64,
    pub total: f64,
    pub level: ConfidenceLevel,
}

impl ConfidenceBreakdown {
    pub fn from_strengths(s: &ComponentStrengths) -> Self {
        let htf = points(HTF_CEILING, s.htf);
        let ltf = points(LTF_CEILING, s.ltf);
        let ml = points(ML_CEILING, s.ml);
        let candlestick = points(CANDLESTICK_CEILING, s.candlestick);
        let futures = points(FUTURES_CEILING, s.futures);
        let constituents = points(CONSTITUENTS_CEILING, s.constituents);
        let total = htf + ltf + ml + candlestick + futures + constituents;

        Self {
            htf,
            ltf,
            ml,
            candlestick,
            futures,
            constituents,
            total,
            level: ConfidenceLevel::from_score(total),
        }
    }

    pub fn zero() -> Self {
        Self::from_strengths(&ComponentStrengths::default())
    }

    /// (name, points, ceiling) of each component
    pub fn components(&self) -> [(&'static str, f64, f64); 6] {
        [
            ("htf", self.htf, HTF_CEILING),
            ("ltf", self.ltf, LTF_CEILING),
            ("ml", self.ml, ML_CEILING),
            ("candlestick", self.candlestick, CANDLESTICK_CEILING),
            ("futures", self.futures, FUTURES_CEILING),
            ("constituents", self.constituents, CONSTITUENTS_CEILING),
        ]
    }
}

/// ceiling × clamp(strength, 0, 1); non-finite strengths score nothing
fn points(ceiling: f64, strength: f64) -> f64 {
    if strength.is_finite() {
        ceiling * strength.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
