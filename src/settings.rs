use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::path::Path;

// CONFIGURATION STRUCTS
// Everything the pipeline needs comes from settings.json, read once at
// startup and validated before any network or file I/O happens.

#[derive(Deserialize, Debug)]
pub struct BinanceKeys {
    pub api_key: String,
    pub secret_key: String,
}

#[derive(Deserialize, Debug)]
pub struct MarketConfig {
    pub symbol: String,     // e.g., "BTCUSDT"
    pub interval: String,   // e.g., "1m", "15m", "4h"
    pub start_date: String, // inclusive, YYYY-MM-DD
    pub end_date: String,   // inclusive, YYYY-MM-DD
}

#[derive(Deserialize, Debug)]
pub struct StrategyConfig {
    pub sma_short: usize,
    pub sma_long: usize,
}

#[derive(Deserialize, Debug)]
pub struct SweepConfig {
    pub short_windows: Vec<usize>,
    pub long_windows: Vec<usize>,
}

#[derive(Deserialize, Debug)]
pub struct ChartConfig {
    pub output_dir: String,
}

#[derive(Deserialize, Debug)]
pub struct Settings {
    pub binance: BinanceKeys,
    pub market: MarketConfig,
    pub strategy: StrategyConfig,
    pub sweep: SweepConfig,
    pub charts: ChartConfig,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("settings file not found: {}", path.display());
        }

        let content = std::fs::read(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.binance.api_key.is_empty() || self.binance.secret_key.is_empty() {
            bail!("binance.api_key and binance.secret_key must both be set");
        }
        if self.strategy.sma_short == 0 || self.strategy.sma_long == 0 {
            bail!("SMA window lengths must be positive");
        }
        if self.strategy.sma_short >= self.strategy.sma_long {
            bail!(
                "strategy.sma_short ({}) must be smaller than strategy.sma_long ({})",
                self.strategy.sma_short,
                self.strategy.sma_long
            );
        }
        if self.sweep.short_windows.contains(&0) || self.sweep.long_windows.contains(&0) {
            bail!("sweep window lengths must be positive");
        }
        // Surfaces bad dates before the network phase starts.
        self.market.range_ms()?;
        Ok(())
    }
}

impl MarketConfig {
    /// Resolves the inclusive calendar range into epoch-millisecond bounds:
    /// midnight of the start date through the last millisecond of the end date.
    pub fn range_ms(&self) -> Result<(i64, i64)> {
        let start = parse_date(&self.start_date)?;
        let end = parse_date(&self.end_date)?;
        let start_ms = start.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        let end_ms = end.and_time(NaiveTime::MIN).and_utc().timestamp_millis() + 86_400_000 - 1;
        if end_ms < start_ms {
            bail!(
                "end_date {} is before start_date {}",
                self.end_date,
                self.start_date
            );
        }
        Ok((start_ms, end_ms))
    }

    /// Deterministic output file name for this market selection.
    pub fn parquet_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.parquet",
            self.symbol, self.interval, self.start_date, self.end_date
        )
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}', expected YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(start: &str, end: &str) -> MarketConfig {
        MarketConfig {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
        }
    }

    #[test]
    fn missing_settings_file_fails_fast() {
        let err = Settings::load("does/not/exist/settings.json").unwrap_err();
        assert!(err.to_string().contains("settings file not found"));
    }

    #[test]
    fn date_range_is_inclusive_on_both_ends() {
        let (start_ms, end_ms) = market("2021-01-01", "2021-01-02").range_ms().unwrap();
        assert_eq!(start_ms, 1_609_459_200_000);
        // Two full days minus the final millisecond.
        assert_eq!(end_ms, start_ms + 2 * 86_400_000 - 1);
    }

    #[test]
    fn reversed_date_range_is_rejected() {
        let err = market("2021-02-01", "2021-01-01").range_ms().unwrap_err();
        assert!(err.to_string().contains("before start_date"));
    }

    #[test]
    fn malformed_date_is_rejected() {
        let err = market("1 Jan 2021", "2021-01-02").range_ms().unwrap_err();
        assert!(err.to_string().contains("expected YYYY-MM-DD"));
    }

    #[test]
    fn parquet_name_is_built_from_the_market_selection() {
        let name = market("2021-01-01", "2023-03-27").parquet_name();
        assert_eq!(name, "BTCUSDT_1m_2021-01-01_2023-03-27.parquet");
    }
}
