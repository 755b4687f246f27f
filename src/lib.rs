//! Top-Down Signal Library
//!
//! Multi-timeframe index options signal engine: HTF bias, MTF range and
//! session context, LTF trap detection and entry tiers, constituent
//! aggregation and a confirmation stack, composed into one BUY CALL /
//! BUY PUT / WAIT recommendation.

pub mod cli;
pub mod config;
pub mod constituents;
pub mod data;
pub mod error;
pub mod market;
pub mod patterns;
pub mod strategy;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use strategy::{FinalSignal, SignalEngine};
