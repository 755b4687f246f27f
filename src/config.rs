//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::constituents::{AggregatorConfig, IndexDefinition};
pub use crate::data::{CacheConfig, DataConfig};
pub use crate::patterns::PatternConfig;
pub use crate::strategy::{
    AmdConfig, ComposerConfig, ConfirmationConfig, EntryConfig, HtfConfig, MtfConfig, RegimeConfig,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexDefinition,
    pub data: DataConfig,
    pub cache: CacheConfig,
    pub patterns: PatternConfig,
    pub htf: HtfConfig,
    pub mtf: MtfConfig,
    pub amd: AmdConfig,
    pub entry: EntryConfig,
    pub regime: RegimeConfig,
    pub aggregator: AggregatorConfig,
    pub confirmation: ConfirmationConfig,
    pub composer: ComposerConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("index.symbol", IndexDefinition::default().symbol)?
            .set_default("cache.ttl_secs", CacheConfig::default().ttl_secs as i64)?
            .set_default("data.timeout_ms", DataConfig::default().timeout_ms as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (SIGNAL__AMD__BREACH_PCT=0.3)
            .add_source(
                config::Environment::with_prefix("SIGNAL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Fail fast on settings no request could recover from
    pub fn validate(&self) -> Result<()> {
        if self.index.symbol.trim().is_empty() {
            anyhow::bail!("index.symbol must not be empty");
        }
        for constituent in &self.index.constituents {
            if !(constituent.weight.is_finite() && constituent.weight > 0.0) {
                anyhow::bail!(
                    "Constituent {} has non-positive weight {}",
                    constituent.symbol,
                    constituent.weight
                );
            }
        }

        if self.patterns.swing_lookback < 1 {
            anyhow::bail!("patterns.swing_lookback must be at least 1");
        }
        if self.amd.recovery_candles < 1 {
            anyhow::bail!("amd.recovery_candles must be at least 1");
        }

        let percentages = [
            ("patterns.fvg_proximity_pct", self.patterns.fvg_proximity_pct),
            ("patterns.liquidity_tolerance_pct", self.patterns.liquidity_tolerance_pct),
            ("patterns.ob_displacement_multiplier", self.patterns.ob_displacement_multiplier),
            ("amd.breach_pct", self.amd.breach_pct),
            ("amd.min_recovery_pct", self.amd.min_recovery_pct),
            ("amd.alignment_tolerance_pct", self.amd.alignment_tolerance_pct),
            ("entry.zone_proximity_pct", self.entry.zone_proximity_pct),
            ("entry.momentum_ema_proximity_pct", self.entry.momentum_ema_proximity_pct),
            ("entry.crossover_ema_proximity_pct", self.entry.crossover_ema_proximity_pct),
            ("entry.stop_buffer_pct", self.entry.stop_buffer_pct),
            ("mtf.expansion_multiplier", self.mtf.expansion_multiplier),
            ("composer.strike.fallback_distance_pct", self.composer.strike.fallback_distance_pct),
        ];
        for (name, value) in percentages {
            if !(value.is_finite() && value > 0.0) {
                anyhow::bail!("{} must be a positive number, got {}", name, value);
            }
        }

        if self.amd.freshness_minutes <= 0 {
            anyhow::bail!("amd.freshness_minutes must be positive, got {}", self.amd.freshness_minutes);
        }

        if self.aggregator.forecast_max_age_mins <= 0 {
            anyhow::bail!(
                "aggregator.forecast_max_age_mins must be positive, got {}",
                self.aggregator.forecast_max_age_mins
            );
        }

        let workers = self.aggregator.max_workers;
        if !(3..=10).contains(&workers) {
            anyhow::bail!("aggregator.max_workers must be between 3 and 10, got {}", workers);
        }

        let ttl = self.cache.ttl_secs;
        if !(60..=300).contains(&ttl) {
            anyhow::bail!("cache.ttl_secs must be between 60 and 300, got {}", ttl);
        }

        let score_total = self.aggregator.scoring.total_weight();
        if (score_total - 100.0).abs() > 1e-6 {
            anyhow::bail!("Stock score weights must sum to 100, got {}", score_total);
        }

        let c = &self.confirmation;
        let blend = c.ar_weight + c.holt_weight + c.momentum_weight;
        if (blend - 1.0).abs() > 1e-6 {
            anyhow::bail!("ML blend weights must sum to 1, got {}", blend);
        }
        if c.futures_bullish_pct <= c.futures_bearish_pct {
            anyhow::bail!(
                "confirmation.futures_bullish_pct ({}) must exceed futures_bearish_pct ({})",
                c.futures_bullish_pct,
                c.futures_bearish_pct
            );
        }

        let strike = &self.composer.strike;
        if !(strike.base_delta > 0.0 && strike.base_delta <= strike.max_delta && strike.max_delta <= 1.0) {
            anyhow::bail!(
                "Strike deltas must satisfy 0 < base_delta <= max_delta <= 1 (got {} / {})",
                strike.base_delta,
                strike.max_delta
            );
        }

        Ok(())
    }

    /// Display configuration
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Index:
    symbol: {}
    futures: {}
    constituents: {}
  Data:
    timeout: {}ms
    retry: {}ms..{}ms (max {}ms)
  Cache:
    ttl: {}s
    max_entries: {}
  Patterns:
    swing_lookback: {}
    fvg_proximity: {}%
    liquidity_tolerance: {}%
  AMD:
    breach: {}%
    prior_closes: {}
    recovery_candles: {}
    freshness: {}m
  Aggregator:
    workers: {}
    batch_delay: {}ms
    min_correlation: {}
  Confirmation:
    ml_weights: {}/{}/{}
    futures_thresholds: {}% / {}%
  Composer:
    momentum_alignment_min: {}
    manipulation_min_confidence: {}
    delta: {}..{}
"#,
            self.index.symbol,
            self.index.futures_symbol(),
            self.index.constituents.len(),
            self.data.timeout_ms,
            self.data.retry_initial_interval_ms,
            self.data.retry_max_interval_ms,
            self.data.retry_max_elapsed_ms,
            self.cache.ttl_secs,
            self.cache.max_entries,
            self.patterns.swing_lookback,
            self.patterns.fvg_proximity_pct,
            self.patterns.liquidity_tolerance_pct,
            self.amd.breach_pct,
            self.amd.prior_closes,
            self.amd.recovery_candles,
            self.amd.freshness_minutes,
            self.aggregator.max_workers,
            self.aggregator.batch_delay_ms,
            self.aggregator.min_correlation,
            self.confirmation.ar_weight,
            self.confirmation.holt_weight,
            self.confirmation.momentum_weight,
            self.confirmation.futures_bullish_pct,
            self.confirmation.futures_bearish_pct,
            self.composer.momentum_alignment_min,
            self.composer.manipulation_min_confidence,
            self.composer.strike.base_delta,
            self.composer.strike.max_delta,
        )
    }
}
