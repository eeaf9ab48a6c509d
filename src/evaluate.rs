use anyhow::Result;
use tracing::debug;

use crate::signal::{self, SignalFrame};
use crate::storage::ClosePrices;

/// Profitability metrics for one signal table.
#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    /// mean(sell prices) / mean(buy prices).
    pub average_profit_multiplier: f64,
    /// (buy events + sell events) / 2; fractional when an event dangles.
    pub trade_pair_count: f64,
    /// Compounded return over all positionally paired trades.
    pub overall_profit_multiplier: f64,
}

/// One sweep entry: the window pair and its metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub sma_short: usize,
    pub sma_long: usize,
    pub metrics: Metrics,
}

/// Reduces a signal table to its profitability metrics.
///
/// Buy and sell events are paired positionally: the i-th recorded buy exits
/// at the i-th recorded sell. A crossover signal alternates events by
/// construction, so this matches chronological pairing except for a dangling
/// final event, which the pairing ignores. With zero events on either side
/// both multipliers are a neutral 1.0 rather than a division by zero.
pub fn evaluate(frame: &SignalFrame) -> Metrics {
    let buys = frame.buy_prices();
    let sells = frame.sell_prices();
    let trade_pair_count = (buys.len() + sells.len()) as f64 / 2.0;

    if buys.is_empty() || sells.is_empty() {
        return Metrics {
            average_profit_multiplier: 1.0,
            trade_pair_count,
            overall_profit_multiplier: 1.0,
        };
    }

    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
    let overall = sells
        .iter()
        .zip(&buys)
        .map(|(sell, buy)| sell / buy)
        .product::<f64>();

    Metrics {
        average_profit_multiplier: mean(&sells) / mean(&buys),
        trade_pair_count,
        overall_profit_multiplier: overall,
    }
}

/// Runs the signal calculator and the evaluator for every (short, long)
/// window combination, reusing one loaded price table across the whole grid.
/// Combinations where the short window is not shorter are skipped.
pub fn sweep(prices: &ClosePrices, shorts: &[usize], longs: &[usize]) -> Result<Vec<Evaluation>> {
    let mut results = Vec::new();

    for &sma_long in longs {
        for &sma_short in shorts {
            if sma_short >= sma_long {
                continue;
            }
            let frame = signal::calculate(prices, sma_short, sma_long)?;
            let metrics = evaluate(&frame);
            debug!(
                sma_short,
                sma_long,
                overall = metrics.overall_profit_multiplier,
                "window combination evaluated"
            );
            results.push(Evaluation {
                sma_short,
                sma_long,
                metrics,
            });
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A signal table with the given sparse event rows; everything else in
    /// the frame is irrelevant to the evaluator.
    fn frame_with_events(buys: &[Option<f64>], sells: &[Option<f64>]) -> SignalFrame {
        let rows = buys.len();
        assert_eq!(rows, sells.len());
        SignalFrame {
            times: (0..rows as i64).collect(),
            closes: vec![0.0; rows],
            sma_short: vec![0.0; rows],
            sma_long: vec![0.0; rows],
            signals_buy: buys.to_vec(),
            signals_sell: sells.to_vec(),
        }
    }

    #[test]
    fn paired_trades_compound_and_average() {
        let frame = frame_with_events(
            &[Some(100.0), None, Some(200.0), None],
            &[None, Some(150.0), None, Some(250.0)],
        );
        let metrics = evaluate(&frame);

        // (150/100) * (250/200) and mean([150, 250]) / mean([100, 200]).
        assert_eq!(metrics.overall_profit_multiplier, 1.875);
        assert!((metrics.average_profit_multiplier - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.trade_pair_count, 2.0);
    }

    #[test]
    fn no_trades_is_a_defined_result() {
        let metrics = evaluate(&frame_with_events(&[None; 5], &[None; 5]));
        assert_eq!(metrics.overall_profit_multiplier, 1.0);
        assert_eq!(metrics.average_profit_multiplier, 1.0);
        assert_eq!(metrics.trade_pair_count, 0.0);
    }

    #[test]
    fn dangling_buy_is_left_unpaired_but_counted() {
        let frame = frame_with_events(
            &[Some(100.0), None, Some(200.0)],
            &[None, Some(150.0), None],
        );
        let metrics = evaluate(&frame);

        assert_eq!(metrics.overall_profit_multiplier, 1.5);
        assert_eq!(metrics.trade_pair_count, 1.5);
        // The dangling buy still drags the average entry price up.
        assert_eq!(metrics.average_profit_multiplier, 1.0);
    }

    #[test]
    fn one_sided_events_fall_back_to_the_neutral_multiplier() {
        let metrics = evaluate(&frame_with_events(
            &[Some(100.0), None],
            &[None, None],
        ));
        assert_eq!(metrics.overall_profit_multiplier, 1.0);
        assert_eq!(metrics.average_profit_multiplier, 1.0);
        assert_eq!(metrics.trade_pair_count, 0.5);
    }

    #[test]
    fn sweep_covers_the_grid_and_skips_degenerate_pairs() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.35).sin() * 8.0)
            .collect();
        let prices = ClosePrices {
            times: (0..closes.len() as i64).map(|i| i * 60_000).collect(),
            closes,
        };

        let results = sweep(&prices, &[5, 10, 20], &[10, 20]).unwrap();
        let pairs: Vec<(usize, usize)> = results
            .iter()
            .map(|r| (r.sma_short, r.sma_long))
            .collect();
        // 10/10, 20/10 and 20/20 are skipped.
        assert_eq!(pairs, vec![(5, 10), (5, 20), (10, 20)]);
    }
}
