use anyhow::{Result, anyhow, bail};
use chrono::DateTime;
use plotters::prelude::*;
use plotters::style::colors::colormaps::{ColorMap, ViridisRGB};
use plotters::style::full_palette::{BLACK, BLUE, GREEN, GREY_800, ORANGE, RED, WHITE};
use std::path::Path;

use crate::evaluate::Evaluation;
use crate::signal::SignalFrame;

fn format_time(ts_ms: i64) -> String {
    match DateTime::from_timestamp_millis(ts_ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => "?".to_string(),
    }
}

/// Renders the closing price, both moving averages and the buy/sell markers
/// to an SVG file. Pure sink: nothing downstream consumes the chart.
pub fn signal_chart(
    frame: &SignalFrame,
    symbol: &str,
    sma_short: usize,
    sma_long: usize,
    path: &Path,
) -> Result<()> {
    if frame.is_empty() {
        bail!("signal table is empty, nothing to plot");
    }

    let root = SVGBackend::new(path, (2048, 1024)).into_drawing_area();
    root.fill(&BLACK)?;

    let min = frame.closes.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = frame
        .closes
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };

    let times = &frame.times;
    let title = format!("{symbol} close with SMA{sma_short}/SMA{sma_long} crossovers");

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24).into_font().color(&WHITE))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0..frame.len() as i32, (min - pad)..(max + pad))?;

    chart
        .configure_mesh()
        .label_style(&WHITE)
        .bold_line_style(GREY_800)
        .x_label_formatter(&|idx| {
            times
                .get(*idx as usize)
                .map(|ts| format_time(*ts))
                .unwrap_or_default()
        })
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            frame.closes.iter().enumerate().map(|(i, v)| (i as i32, *v)),
            &ORANGE.mix(0.9),
        ))?
        .label("close")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], ORANGE));

    chart
        .draw_series(LineSeries::new(
            frame
                .sma_short
                .iter()
                .enumerate()
                .map(|(i, v)| (i as i32, *v)),
            &BLUE,
        ))?
        .label(format!("SMA{sma_short}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .draw_series(LineSeries::new(
            frame
                .sma_long
                .iter()
                .enumerate()
                .map(|(i, v)| (i as i32, *v)),
            &WHITE.mix(0.7),
        ))?
        .label(format!("SMA{sma_long}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], WHITE));

    chart
        .draw_series(
            frame
                .signals_buy
                .iter()
                .enumerate()
                .filter_map(|(i, signal)| {
                    signal.map(|price| TriangleMarker::new((i as i32, price), 7, GREEN.filled()))
                }),
        )?
        .label("buy")
        .legend(|(x, y)| TriangleMarker::new((x + 10, y), 7, GREEN.filled()));

    chart
        .draw_series(
            frame
                .signals_sell
                .iter()
                .enumerate()
                .filter_map(|(i, signal)| {
                    signal.map(|price| Cross::new((i as i32, price), 7, RED.filled()))
                }),
        )?
        .label("sell")
        .legend(|(x, y)| Cross::new((x + 10, y), 7, RED.filled()));

    chart
        .configure_series_labels()
        .background_style(BLACK.mix(0.6))
        .border_style(GREY_800)
        .label_font(("sans-serif", 16).into_font().color(&WHITE))
        .draw()?;

    root.present().map_err(|_| {
        anyhow!(
            "unable to write chart to {}, please make sure the output dir exists",
            path.display()
        )
    })
}

/// Renders one heatmap per evaluation metric: short window on the x axis,
/// long window on the y axis (increasing upward), viridis-colored cells.
pub fn metric_heatmaps(results: &[Evaluation], symbol: &str, path: &Path) -> Result<()> {
    if results.is_empty() {
        bail!("no sweep results to plot");
    }

    let mut shorts: Vec<usize> = results.iter().map(|r| r.sma_short).collect();
    shorts.sort_unstable();
    shorts.dedup();
    let mut longs: Vec<usize> = results.iter().map(|r| r.sma_long).collect();
    longs.sort_unstable();
    longs.dedup();

    let metrics: [(&str, fn(&Evaluation) -> f64); 3] = [
        ("average_profit_multiplier", |r| {
            r.metrics.average_profit_multiplier
        }),
        ("buy_sell_trade_pair_count", |r| r.metrics.trade_pair_count),
        ("overall_profit_multiplier", |r| {
            r.metrics.overall_profit_multiplier
        }),
    ];

    let root = SVGBackend::new(path, (2048, 640)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(symbol, ("sans-serif", 28))?;

    let panels = root.split_evenly((1, 3));
    for ((name, value_of), panel) in metrics.iter().zip(panels.iter()) {
        draw_heatmap(panel, name, *value_of, results, &shorts, &longs)?;
    }

    root.present().map_err(|_| {
        anyhow!(
            "unable to write heatmaps to {}, please make sure the output dir exists",
            path.display()
        )
    })
}

fn draw_heatmap(
    area: &DrawingArea<SVGBackend<'_>, plotters::coord::Shift>,
    title: &str,
    value_of: fn(&Evaluation) -> f64,
    results: &[Evaluation],
    shorts: &[usize],
    longs: &[usize],
) -> Result<()> {
    let values: Vec<f64> = results.iter().map(value_of).collect();
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // A flat metric still needs a non-empty color range.
    let (min, max) = if max > min {
        (min, max)
    } else {
        (min - 0.5, max + 0.5)
    };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..shorts.len() as i32, 0..longs.len() as i32)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(shorts.len())
        .y_labels(longs.len())
        .x_label_formatter(&|idx| window_label(shorts, *idx))
        .y_label_formatter(&|idx| window_label(longs, *idx))
        .x_desc("SMA short")
        .y_desc("SMA long")
        .draw()?;

    chart.draw_series(results.iter().map(|result| {
        let x = grid_index(shorts, result.sma_short);
        let y = grid_index(longs, result.sma_long);
        let color =
            ViridisRGB.get_color_normalized(value_of(result) as f32, min as f32, max as f32);
        Rectangle::new([(x, y), (x + 1, y + 1)], color.filled())
    }))?;

    Ok(())
}

fn grid_index(windows: &[usize], window: usize) -> i32 {
    windows
        .iter()
        .position(|w| *w == window)
        .map(|i| i as i32)
        .unwrap_or(0)
}

fn window_label(windows: &[usize], index: i32) -> String {
    windows
        .get(index as usize)
        .map(|w| w.to_string())
        .unwrap_or_default()
}
