use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table,
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_BORDERS_ONLY,
};

use crate::evaluate::Evaluation;

/// Prints the sweep results as a terminal table, ranked by overall profit
/// multiplier.
pub fn print_sweep_table(symbol: &str, results: &[Evaluation]) {
    if results.is_empty() {
        println!("No sweep combinations evaluated.");
        return;
    }

    let mut ranked: Vec<&Evaluation> = results.iter().collect();
    ranked.sort_unstable_by(|a, b| {
        b.metrics
            .overall_profit_multiplier
            .partial_cmp(&a.metrics.overall_profit_multiplier)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Rank").add_attribute(Attribute::Bold),
            Cell::new("SMA short").add_attribute(Attribute::Bold),
            Cell::new("SMA long").add_attribute(Attribute::Bold),
            Cell::new("Avg multiplier")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Pairs")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
            Cell::new("Overall multiplier")
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);

    for (rank, result) in ranked.iter().enumerate() {
        let overall = result.metrics.overall_profit_multiplier;
        let overall_color = if overall >= 1.0 {
            Color::Green
        } else {
            Color::Red
        };

        table.add_row(vec![
            Cell::new(rank + 1).fg(Color::DarkGrey),
            Cell::new(result.sma_short),
            Cell::new(result.sma_long),
            Cell::new(format!("{:.4}", result.metrics.average_profit_multiplier))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}", result.metrics.trade_pair_count))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{overall:.4}"))
                .fg(overall_color)
                .set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\nSMA sweep for {symbol}\n{table}");
}
