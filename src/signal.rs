use anyhow::{Result, anyhow, ensure};
use ta::Next;
use ta::indicators::SimpleMovingAverage;

use crate::storage::ClosePrices;

/// Close prices augmented with both moving averages and the sparse crossover
/// event series. Rows where either average is still warming up are dropped,
/// so every vector here has the same length and stays aligned by row.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFrame {
    pub times: Vec<i64>,
    pub closes: Vec<f64>,
    pub sma_short: Vec<f64>,
    pub sma_long: Vec<f64>,
    pub signals_buy: Vec<Option<f64>>,
    pub signals_sell: Vec<Option<f64>>,
}

impl SignalFrame {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Defined buy prices, in row order.
    pub fn buy_prices(&self) -> Vec<f64> {
        self.signals_buy.iter().flatten().copied().collect()
    }

    /// Defined sell prices, in row order.
    pub fn sell_prices(&self) -> Vec<f64> {
        self.signals_sell.iter().flatten().copied().collect()
    }
}

/// Trailing mean over `window` samples, undefined for the first `window - 1`
/// rows. The ta indicator emits partial averages while its buffer fills, so
/// those warm-up rows are masked out here.
fn rolling_sma(values: &[f64], window: usize) -> Result<Vec<Option<f64>>> {
    let mut sma = SimpleMovingAverage::new(window)
        .map_err(|_| anyhow!("SMA window must be a positive integer, got {window}"))?;

    let mut out = Vec::with_capacity(values.len());
    for (i, &value) in values.iter().enumerate() {
        let mean = sma.next(value);
        out.push(if i + 1 >= window { Some(mean) } else { None });
    }
    Ok(out)
}

/// Computes both moving averages over the closing price and derives the
/// buy/sell crossover events.
///
/// A buy fires on the row where the short average moves from strictly below
/// the long average to at-or-above it; a sell fires on the opposite
/// transition. The comparison directions matter on exact ties: at-or-above
/// counts as "above" for both transitions. Event rows carry the closing
/// price; every other row carries no value.
pub fn calculate(prices: &ClosePrices, sma_short: usize, sma_long: usize) -> Result<SignalFrame> {
    ensure!(
        prices.times.len() == prices.closes.len(),
        "time and close columns differ in length ({} vs {})",
        prices.times.len(),
        prices.closes.len()
    );

    let short = rolling_sma(&prices.closes, sma_short)?;
    let long = rolling_sma(&prices.closes, sma_long)?;

    // Keep only rows where both averages are defined, preserving row order.
    let mut times = Vec::new();
    let mut closes = Vec::new();
    let mut shorts = Vec::new();
    let mut longs = Vec::new();
    for i in 0..prices.closes.len() {
        if let (Some(s), Some(l)) = (short[i], long[i]) {
            times.push(prices.times[i]);
            closes.push(prices.closes[i]);
            shorts.push(s);
            longs.push(l);
        }
    }

    let rows = closes.len();
    let mut signals_buy: Vec<Option<f64>> = vec![None; rows];
    let mut signals_sell: Vec<Option<f64>> = vec![None; rows];
    for i in 1..rows {
        let above_now = shorts[i] >= longs[i];
        let above_before = shorts[i - 1] >= longs[i - 1];
        if above_now && !above_before {
            signals_buy[i] = Some(closes[i]);
        } else if !above_now && above_before {
            signals_sell[i] = Some(closes[i]);
        }
    }

    Ok(SignalFrame {
        times,
        closes,
        sma_short: shorts,
        sma_long: longs,
        signals_buy,
        signals_sell,
    })
}
