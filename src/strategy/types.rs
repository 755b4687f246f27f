//! Shared types for the top-down signal strategy
//!
//! This module contains the enums shared across the strategy engines.

use serde::{Deserialize, Serialize};

use crate::patterns::Polarity;

/// Directional view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Neutral
    }
}

impl Direction {
    /// +1 bullish, -1 bearish, 0 neutral
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Direction::Bullish
        } else if value < 0.0 {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
            Direction::Neutral => Direction::Neutral,
        }
    }

    /// Both directional and equal
    pub fn agrees_with(&self, other: Direction) -> bool {
        self.is_directional() && *self == other
    }

    pub fn option_type(&self) -> Option<OptionType> {
        match self {
            Direction::Bullish => Some(OptionType::Call),
            Direction::Bearish => Some(OptionType::Put),
            Direction::Neutral => None,
        }
    }
}

impl From<Polarity> for Direction {
    fn from(p: Polarity) -> Self {
        match p {
            Polarity::Bullish => Direction::Bullish,
            Polarity::Bearish => Direction::Bearish,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "BULLISH"),
            Direction::Bearish => write!(f, "BEARISH"),
            Direction::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "CALL"),
            OptionType::Put => write!(f, "PUT"),
        }
    }
}

/// Terminal recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "BUY CALL")]
    BuyCall,
    #[serde(rename = "BUY PUT")]
    BuyPut,
    #[serde(rename = "WAIT")]
    Wait,
}

impl Action {
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Action::BuyCall,
            Direction::Bearish => Action::BuyPut,
            Direction::Neutral => Action::Wait,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::BuyCall => write!(f, "BUY CALL"),
            Action::BuyPut => write!(f, "BUY PUT"),
            Action::Wait => write!(f, "WAIT"),
        }
    }
}

/// Confidence bucket of the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            ConfidenceLevel::High
        } else if score >= 40.0 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Price relative to the midpoint of the active range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumDiscount {
    Premium,
    Discount,
}

/// Market regime of the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    StrongTrendUp,
    WeakTrendUp,
    RangeBound,
    WeakTrendDown,
    StrongTrendDown,
    HighVolatility,
}

impl Default for MarketRegime {
    fn default() -> Self {
        Self::RangeBound
    }
}

impl MarketRegime {
    pub fn is_trending(&self) -> bool {
        !matches!(self, MarketRegime::RangeBound | MarketRegime::HighVolatility)
    }

    pub fn trend_direction(&self) -> Direction {
        match self {
            MarketRegime::StrongTrendUp | MarketRegime::WeakTrendUp => Direction::Bullish,
            MarketRegime::StrongTrendDown | MarketRegime::WeakTrendDown => Direction::Bearish,
            MarketRegime::RangeBound | MarketRegime::HighVolatility => Direction::Neutral,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MarketRegime::StrongTrendUp => "STRONG_TREND_UP",
            MarketRegime::WeakTrendUp => "WEAK_TREND_UP",
            MarketRegime::RangeBound => "RANGE_BOUND",
            MarketRegime::WeakTrendDown => "WEAK_TREND_DOWN",
            MarketRegime::StrongTrendDown => "STRONG_TREND_DOWN",
            MarketRegime::HighVolatility => "HIGH_VOLATILITY",
        };
        write!(f, "{}", label)
    }
}
