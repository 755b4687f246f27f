//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::constituents::IndexPrediction;
use crate::data::{InMemoryEventStore, ManipulationStore, SnapshotProvider};
use crate::strategy::{FinalSignal, SignalEngine};

/// Build an engine over a snapshot file, replaying its recorded traps
async fn snapshot_engine(config: &Config, snapshot: &Path) -> Result<(SignalEngine, Option<DateTime<Utc>>)> {
    let provider = SnapshotProvider::load(snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    let as_of = provider.snapshot().as_of;

    let store = Arc::new(InMemoryEventStore::new());
    for event in &provider.snapshot().events {
        store.record_event(&config.index.symbol, event.clone()).await?;
    }
    info!(
        snapshot = %snapshot.display(),
        instruments = provider.snapshot().instruments.len(),
        events = store.event_count(&config.index.symbol),
        "Snapshot loaded"
    );

    Ok((SignalEngine::new(config, Arc::new(provider), store), as_of))
}

fn decision_time(at: Option<DateTime<Utc>>, as_of: Option<DateTime<Utc>>) -> DateTime<Utc> {
    at.or(as_of).unwrap_or_else(|| {
        warn!("No decision time given or recorded, using now");
        Utc::now()
    })
}

/// Run the full top-down pass on a snapshot
pub async fn analyze(config: &Config, snapshot: &Path, at: Option<DateTime<Utc>>, json: bool) -> Result<()> {
    let (engine, as_of) = snapshot_engine(config, snapshot).await?;
    let at = decision_time(at, as_of);

    let signal = engine.analyze(at).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&signal)?);
    } else {
        print_signal(&signal);
    }
    Ok(())
}

/// Run only the constituent aggregator on a snapshot
pub async fn constituents(config: &Config, snapshot: &Path, at: Option<DateTime<Utc>>, json: bool) -> Result<()> {
    if config.index.constituents.is_empty() {
        anyhow::bail!("No constituents configured for {}", config.index.symbol);
    }
    let (engine, as_of) = snapshot_engine(config, snapshot).await?;
    let at = decision_time(at, as_of);

    let prediction = engine.predict_index(at).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        print_prediction(&prediction);
    }
    Ok(())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

fn print_signal(signal: &FinalSignal) {
    println!("\n=== {} @ {} ===\n", signal.symbol, signal.timestamp);
    println!("Action:     {}", signal.action);
    println!("Direction:  {}", signal.direction);
    println!("Spot:       {:.2}", signal.spot);
    println!(
        "Confidence: {:.1} ({:?})",
        signal.confidence.total, signal.confidence.level
    );
    for (name, points, ceiling) in signal.confidence.components() {
        println!("  {:<13} {:>5.1} / {:.0}", name, points, ceiling);
    }

    println!(
        "\nHTF: {} (strength {:.0}, {:?})",
        signal.htf.overall_direction, signal.htf.bias_strength, signal.htf.premium_discount
    );
    if let Some(mtf) = &signal.mtf {
        println!(
            "MTF: {:?} of [{:.2}, {:.2}], {:?}{}",
            mtf.position,
            mtf.range_low,
            mtf.range_high,
            mtf.session_phase,
            if mtf.expansion { ", expanding" } else { "" }
        );
    }
    if let Some(zone) = &signal.ltf.entry {
        println!(
            "LTF entry: {:?} {:?} on {} [{:.2}, {:.2}]",
            zone.tier, zone.entry_type, zone.timeframe, zone.zone_low, zone.zone_high
        );
    }
    if let Some(event) = &signal.ltf.manipulation {
        println!(
            "LTF trap: {:?} at {:.2} (confidence {:.0}, {})",
            event.manipulation_type, event.key_level, event.confidence, event.detection_time
        );
    }

    if let Some(levels) = &signal.levels {
        println!(
            "\nLevels ({:?}): entry {:.2}, stop {:.2}, targets {:.2} / {:.2}",
            levels.source, levels.entry, levels.stop_loss, levels.target_1, levels.target_2
        );
    }
    if let Some(strike) = &signal.strike {
        println!(
            "Strike: {} {} (delta {:.2}) premium {:.2}, stop {:.2}, targets {:.2} / {:.2}",
            strike.strike,
            strike.option_type,
            strike.delta,
            strike.premium,
            strike.stop_loss_premium,
            strike.target_1_premium,
            strike.target_2_premium
        );
    }

    println!("\nReasons:");
    for reason in &signal.reasons {
        println!("  - {}", reason);
    }
}

fn print_prediction(prediction: &IndexPrediction) {
    println!("\n=== {} CONSTITUENT FORECAST ===\n", prediction.index);
    println!("As of:         {}", prediction.generated_at);
    println!(
        "Expected move: {:+.3}% ({})",
        prediction.expected_move_pct, prediction.expected_direction
    );
    println!(
        "Regime:        {} (x{:.1})",
        prediction.regime, prediction.regime_multiplier
    );
    println!(
        "Breadth:       up {:.0}% / down {:.0}% / neutral {:.0}%",
        prediction.prob_up * 100.0,
        prediction.prob_down * 100.0,
        prediction.prob_neutral * 100.0
    );

    println!("\n=== SECTORS ===\n");
    for sector in &prediction.sectors {
        println!(
            "  {:<16} weight {:>5.1}%  p(up) {:.2}  contribution {:+.3}%",
            sector.sector,
            sector.weight * 100.0,
            sector.mean_probability,
            sector.contribution
        );
    }

    let mut stocks: Vec<_> = prediction.stocks.iter().collect();
    stocks.sort_by(|a, b| b.weighted_contribution.abs().total_cmp(&a.weighted_contribution.abs()));
    println!("\n=== TOP CONTRIBUTORS ===\n");
    for stock in stocks.iter().take(10) {
        println!(
            "  {:<12} {:<8} p(up) {:.2}  move {:.2}%  contribution {:+.4}%",
            stock.symbol,
            stock.direction.to_string(),
            stock.probability,
            stock.expected_move_pct,
            stock.weighted_contribution
        );
    }

    if !prediction.skipped.is_empty() {
        println!("\nSkipped: {}", prediction.skipped.join(", "));
    }
    if !prediction.filtered.is_empty() {
        println!("Low correlation: {}", prediction.filtered.join(", "));
    }
}
