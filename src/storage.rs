use anyhow::{Context, Result, anyhow, bail};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::klines::Candle;

/// The time/close projection of a stored candle table. The sweep driver
/// loads this once and shares it read-only across every window combination.
#[derive(Debug, Clone)]
pub struct ClosePrices {
    /// Epoch milliseconds, ascending as delivered by the exchange.
    pub times: Vec<i64>,
    pub closes: Vec<f64>,
}

pub struct ParquetStore {
    pub base_dir: PathBuf,
}

impl ParquetStore {
    /// Creates the storage directory up front so later writes never have to
    /// check for it.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        if !base_dir.exists() {
            std::fs::create_dir_all(&base_dir).with_context(|| {
                format!("failed to create storage directory {}", base_dir.display())
            })?;
        }
        Ok(Self { base_dir })
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Writes the candle table as Brotli-compressed parquet. The bytes go to
    /// a .tmp file first and are renamed into place, so a crash mid-write
    /// leaves no half-written table behind.
    pub fn save_candles(&self, name: &str, candles: &[Candle]) -> Result<PathBuf> {
        let mut df = candles_to_frame(candles)?;
        let final_path = self.path_for(name);
        let tmp_path = self.base_dir.join(format!("{name}.tmp"));

        let file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Brotli(None))
            .finish(&mut df)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("failed to move {} into place", tmp_path.display()))?;

        info!(rows = df.height(), path = %final_path.display(), "candle table written");
        Ok(final_path)
    }

    pub fn load_frame(&self, name: &str) -> Result<DataFrame> {
        let path = self.path_for(name);
        let file = File::open(&path)
            .with_context(|| format!("failed to open candle table {}", path.display()))?;
        ParquetReader::new(file)
            .finish()
            .with_context(|| format!("failed to read candle table {}", path.display()))
    }

    /// Loads only the columns the signal calculator needs. Extra columns in
    /// the stored table are ignored.
    pub fn load_close_prices(&self, name: &str) -> Result<ClosePrices> {
        let df = self.load_frame(name)?;
        close_prices_from_frame(&df)
    }
}

/// Assembles normalized candles into a column-oriented table, with the two
/// millisecond time fields converted to calendar timestamps.
pub fn candles_to_frame(candles: &[Candle]) -> Result<DataFrame> {
    if candles.is_empty() {
        bail!("no candles to write");
    }

    let open_times: Vec<i64> = candles.iter().map(|c| c.open_time).collect();
    let close_times: Vec<i64> = candles.iter().map(|c| c.close_time).collect();
    let time = Series::new("time", &open_times)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
    let close_time = Series::new("close_time", &close_times)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;

    let df = DataFrame::new(vec![
        time,
        Series::new("open", &candles.iter().map(|c| c.open).collect::<Vec<f64>>()),
        Series::new("high", &candles.iter().map(|c| c.high).collect::<Vec<f64>>()),
        Series::new("low", &candles.iter().map(|c| c.low).collect::<Vec<f64>>()),
        Series::new("close", &candles.iter().map(|c| c.close).collect::<Vec<f64>>()),
        Series::new(
            "volume",
            &candles.iter().map(|c| c.volume).collect::<Vec<f64>>(),
        ),
        close_time,
        Series::new(
            "quote_asset_volume",
            &candles
                .iter()
                .map(|c| c.quote_asset_volume)
                .collect::<Vec<f64>>(),
        ),
        Series::new(
            "number_of_trades",
            &candles
                .iter()
                .map(|c| c.number_of_trades)
                .collect::<Vec<i64>>(),
        ),
        Series::new(
            "taker_buy_base_asset_volume",
            &candles
                .iter()
                .map(|c| c.taker_buy_base_asset_volume)
                .collect::<Vec<f64>>(),
        ),
        Series::new(
            "taker_buy_quote_asset_volume",
            &candles
                .iter()
                .map(|c| c.taker_buy_quote_asset_volume)
                .collect::<Vec<f64>>(),
        ),
    ])?;

    Ok(df)
}

/// Reduces a loaded table to the `time` and `close` columns, with the
/// timestamps brought back to epoch milliseconds for the analysis side.
pub fn close_prices_from_frame(df: &DataFrame) -> Result<ClosePrices> {
    let projected = df
        .select(["time", "close"])
        .context("candle table is missing the time/close columns")?;

    let times = projected
        .column("time")?
        .cast(&DataType::Int64)
        .context("time column cannot be read as epoch milliseconds")?;
    let times: Vec<i64> = times
        .i64()?
        .into_iter()
        .collect::<Option<Vec<i64>>>()
        .ok_or_else(|| anyhow!("time column holds null values"))?;

    let closes: Vec<f64> = projected
        .column("close")?
        .f64()
        .context("close column is not floating point")?
        .into_iter()
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| anyhow!("close column holds null values"))?;

    Ok(ClosePrices { times, closes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candles() -> Vec<Candle> {
        (0..3i64)
            .map(|i| {
                let base = 29_000.0 + i as f64 * 10.0;
                Candle {
                    open_time: 1_609_459_200_000 + i * 60_000,
                    open: base,
                    high: base + 5.25,
                    low: base - 4.5,
                    close: base + 1.0001,
                    volume: 1432.19 + i as f64,
                    close_time: 1_609_459_259_999 + i * 60_000,
                    quote_asset_volume: 41_491_171.55,
                    number_of_trades: 1134 + i,
                    taker_buy_base_asset_volume: 722.25,
                    taker_buy_quote_asset_volume: 20_925_354.44,
                }
            })
            .collect()
    }

    #[test]
    fn parquet_round_trip_preserves_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();
        let candles = sample_candles();

        store.save_candles("roundtrip.parquet", &candles).unwrap();
        let df = store.load_frame("roundtrip.parquet").unwrap();

        assert_eq!(df.height(), candles.len());
        assert_eq!(
            df.get_column_names(),
            vec![
                "time",
                "open",
                "high",
                "low",
                "close",
                "volume",
                "close_time",
                "quote_asset_volume",
                "number_of_trades",
                "taker_buy_base_asset_volume",
                "taker_buy_quote_asset_volume",
            ]
        );

        let prices = store.load_close_prices("roundtrip.parquet").unwrap();
        let expected_times: Vec<i64> = candles.iter().map(|c| c.open_time).collect();
        let expected_closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        assert_eq!(prices.times, expected_times);
        assert_eq!(prices.closes, expected_closes);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::new(dir.path()).unwrap();

        let path = store.save_candles("atomic.parquet", &sample_candles()).unwrap();
        assert!(path.exists());
        assert!(!store.path_for("atomic.parquet.tmp").exists());
    }

    #[test]
    fn empty_candle_set_is_rejected() {
        let err = candles_to_frame(&[]).unwrap_err();
        assert!(err.to_string().contains("no candles"));
    }

    #[test]
    fn missing_close_column_is_a_clear_error() {
        let df = DataFrame::new(vec![Series::new("time", &[1i64, 2, 3])]).unwrap();
        let err = close_prices_from_frame(&df).unwrap_err();
        assert!(err.to_string().contains("time/close"));
    }
}
