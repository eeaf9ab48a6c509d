use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::settings::{BinanceKeys, MarketConfig};

const KLINES_URL: &str = "https://api.binance.com/api/v3/klines";
/// Binance serves at most 1000 klines per request.
const PAGE_LIMIT: usize = 1000;

/// One normalized kline. The two time fields stay integer milliseconds at
/// this boundary; they become calendar timestamps when the table is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
    pub quote_asset_volume: f64,
    pub number_of_trades: i64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

impl Candle {
    /// Maps one raw kline array (position -> field) into a typed record.
    /// The exchange sends 12 positions; the trailing "ignore" field is dropped.
    pub fn from_raw(raw: &[Value]) -> Result<Self> {
        if raw.len() < 11 {
            bail!("kline record has {} fields, expected at least 11", raw.len());
        }

        let candle = Self {
            open_time: int_at(raw, 0)?,
            open: decimal_at(raw, 1)?,
            high: decimal_at(raw, 2)?,
            low: decimal_at(raw, 3)?,
            close: decimal_at(raw, 4)?,
            volume: decimal_at(raw, 5)?,
            close_time: int_at(raw, 6)?,
            quote_asset_volume: decimal_at(raw, 7)?,
            number_of_trades: int_at(raw, 8)?,
            taker_buy_base_asset_volume: decimal_at(raw, 9)?,
            taker_buy_quote_asset_volume: decimal_at(raw, 10)?,
        };

        if candle.close_time < candle.open_time {
            bail!(
                "kline closes at {} before it opens at {}",
                candle.close_time,
                candle.open_time
            );
        }

        Ok(candle)
    }
}

fn int_at(raw: &[Value], index: usize) -> Result<i64> {
    raw[index]
        .as_i64()
        .ok_or_else(|| anyhow!("kline field {index} is not an integer: {}", raw[index]))
}

/// Prices and volumes arrive as decimal strings.
fn decimal_at(raw: &[Value], index: usize) -> Result<f64> {
    let text = raw[index]
        .as_str()
        .ok_or_else(|| anyhow!("kline field {index} is not a string: {}", raw[index]))?;
    text.parse::<f64>()
        .with_context(|| format!("kline field {index} is not a number: '{text}'"))
}

/// The exchange answers 418/429 with a -1003 payload naming when the IP ban
/// lifts; surface that timestamp instead of the raw body.
fn rate_limit_message(body: &str) -> String {
    if body.contains("-1003") {
        let re = Regex::new(r"until\s+(\d+)").unwrap();
        if let Some(ts) = re.captures(body).and_then(|caps| caps.get(1)) {
            return format!(
                "rate limited by the exchange, banned until {} ms",
                ts.as_str()
            );
        }
    }
    format!("rate limited by the exchange: {body}")
}

pub struct BinanceClient {
    client: Client,
    api_key: String,
}

impl BinanceClient {
    pub fn new(keys: &BinanceKeys) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key: keys.api_key.clone(),
        })
    }

    /// Drains the full historical series for the configured symbol, interval
    /// and inclusive date range. The exchange pages at PAGE_LIMIT candles, so
    /// the cursor advances past the last received open time until the range
    /// is exhausted.
    pub async fn fetch_range(&self, market: &MarketConfig) -> Result<Vec<Candle>> {
        let (start_ms, end_ms) = market.range_ms()?;
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = start_ms;
        let mut pages = 0u32;

        while cursor <= end_ms {
            let batch = self.fetch_page(market, cursor, end_ms).await?;
            if batch.is_empty() {
                break;
            }

            pages += 1;
            let batch_len = batch.len();
            cursor = batch[batch_len - 1].open_time + 1;
            candles.extend(batch);
            debug!(pages, total = candles.len(), "kline page received");

            if batch_len < PAGE_LIMIT {
                // A short page means the exchange ran out of data for the range.
                break;
            }
        }

        info!(
            symbol = %market.symbol,
            interval = %market.interval,
            candles = candles.len(),
            pages,
            "historical klines fetched"
        );
        Ok(candles)
    }

    async fn fetch_page(
        &self,
        market: &MarketConfig,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>> {
        let query = [
            ("symbol", market.symbol.clone()),
            ("interval", market.interval.clone()),
            ("startTime", start_ms.to_string()),
            ("endTime", end_ms.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];

        let response = self
            .client
            .get(KLINES_URL)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&query)
            .send()
            .await
            .context("klines request failed")?;

        let status = response.status();
        if status == 418 || status == 429 {
            let body = response.text().await.unwrap_or_default();
            bail!("{}", rate_limit_message(&body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("klines request failed with status {status}: {body}");
        }

        let raw: Vec<Vec<Value>> = response
            .json()
            .await
            .context("klines response is not an array of kline records")?;
        raw.iter().map(|record| Candle::from_raw(record)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_kline() -> Vec<Value> {
        json!([
            1609459200000i64,
            "28923.6300",
            "29031.3400",
            "28913.1200",
            "29000.0001",
            "1432.1900",
            1609459259999i64,
            "41491171.5500",
            1134,
            "722.2500",
            "20925354.4400",
            "0"
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn raw_record_is_normalized_with_explicit_types() {
        let candle = Candle::from_raw(&raw_kline()).unwrap();
        assert_eq!(candle.open_time, 1_609_459_200_000);
        assert_eq!(candle.close_time, 1_609_459_259_999);
        assert_eq!(candle.open, 28923.63);
        assert_eq!(candle.close, 29000.0001);
        assert_eq!(candle.number_of_trades, 1134);
        assert_eq!(candle.taker_buy_base_asset_volume, 722.25);
    }

    #[test]
    fn every_accepted_candle_closes_at_or_after_it_opens() {
        let mut raw = raw_kline();
        raw[6] = json!(1609459100000i64);
        let err = Candle::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("before it opens"));

        // Equal open and close time is still a valid record.
        let mut raw = raw_kline();
        raw[6] = raw[0].clone();
        assert!(Candle::from_raw(&raw).is_ok());
    }

    #[test]
    fn malformed_price_field_is_fatal() {
        let mut raw = raw_kline();
        raw[4] = json!("not-a-price");
        let err = Candle::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("field 4"));
    }

    #[test]
    fn truncated_record_is_fatal() {
        let raw = raw_kline()[..9].to_vec();
        let err = Candle::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("expected at least 11"));
    }

    #[test]
    fn ban_expiry_is_extracted_from_rate_limit_payload() {
        let body = r#"{"code":-1003,"msg":"Way too much request weight used; IP banned until 1681234567890."}"#;
        let message = rate_limit_message(body);
        assert!(message.contains("banned until 1681234567890"));
    }
}
