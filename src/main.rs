mod evaluate;
mod klines;
mod plot;
mod report;
mod settings;
mod signal;
mod storage;

use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use klines::BinanceClient;
use settings::Settings;
use storage::ParquetStore;

const SETTINGS_PATH: &str = "settings.json";
const STORAGE_DIR: &str = "storage";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load(SETTINGS_PATH)?;
    let store = ParquetStore::new(STORAGE_DIR)?;
    let table_name = settings.market.parquet_name();

    // Step 1: Download candles, unless this range is already on disk
    println!("\n--- Step 1: Fetching Historical Klines ---");
    if store.path_for(&table_name).exists() {
        info!(table = %table_name, "candle table already present, skipping download");
    } else {
        let client = BinanceClient::new(&settings.binance)?;
        let candles = client.fetch_range(&settings.market).await?;
        store.save_candles(&table_name, &candles)?;
    }

    // Step 2: Crossover signals for the configured window pair
    println!("\n--- Step 2: Computing Crossover Signals ---");
    let prices = store.load_close_prices(&table_name)?;
    let frame = signal::calculate(
        &prices,
        settings.strategy.sma_short,
        settings.strategy.sma_long,
    )?;
    let metrics = evaluate::evaluate(&frame);
    info!(
        rows = frame.len(),
        buys = frame.buy_prices().len(),
        sells = frame.sell_prices().len(),
        overall = metrics.overall_profit_multiplier,
        "strategy windows evaluated"
    );

    // Step 3: Sweep the window grid
    println!("\n--- Step 3: Sweeping SMA Window Combinations ---");
    let results = evaluate::sweep(
        &prices,
        &settings.sweep.short_windows,
        &settings.sweep.long_windows,
    )?;
    report::print_sweep_table(&settings.market.symbol, &results);

    // Step 4: Render charts
    println!("\n--- Step 4: Rendering Charts ---");
    let charts_dir = Path::new(&settings.charts.output_dir);
    if !charts_dir.exists() {
        std::fs::create_dir_all(charts_dir)?;
    }

    if frame.is_empty() {
        warn!("signal table is empty after SMA warm-up, skipping the signal chart");
    } else {
        let signal_path = charts_dir.join(format!(
            "{}_sma_{}_{}.svg",
            settings.market.symbol, settings.strategy.sma_short, settings.strategy.sma_long
        ));
        plot::signal_chart(
            &frame,
            &settings.market.symbol,
            settings.strategy.sma_short,
            settings.strategy.sma_long,
            &signal_path,
        )?;
        info!(path = %signal_path.display(), "signal chart written");
    }

    if results.is_empty() {
        warn!("sweep produced no window combinations, skipping the heatmaps");
    } else {
        let heatmap_path = charts_dir.join(format!("{}_sma_sweep.svg", settings.market.symbol));
        plot::metric_heatmaps(&results, &settings.market.symbol, &heatmap_path)?;
        info!(path = %heatmap_path.display(), "metric heatmaps written");
    }

    Ok(())
}
