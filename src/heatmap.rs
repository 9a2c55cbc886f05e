// src/heatmap.rs
use crate::types::*;
use std::collections::BTreeMap;

#[derive(Default)]
struct LineTotals {
    cost: u64,
    by_category: BTreeMap<GasCategory, u64>,
    by_operation: BTreeMap<String, u32>,
}

/// Projects per-line cost totals onto a `[0, 1]` intensity scale.
///
/// Every line with an entry gets a point, zero-cost lines at intensity 0.
/// An input with no costed line produces an empty projection.
pub fn project(estimates: &[CostEntry]) -> Vec<HeatmapPoint> {
    let mut lines: BTreeMap<usize, LineTotals> = BTreeMap::new();
    for entry in estimates {
        let totals = lines.entry(entry.construct.line).or_default();
        totals.cost = totals.cost.saturating_add(entry.total_cost);
        let category = totals.by_category.entry(entry.category).or_insert(0);
        *category = category.saturating_add(entry.total_cost);
        *totals.by_operation.entry(entry.operation_name.clone()).or_insert(0) += 1;
    }

    let max_line_cost = lines.values().map(|t| t.cost).max().unwrap_or(0);
    if max_line_cost == 0 {
        return Vec::new();
    }

    lines
        .into_iter()
        .map(|(line, totals)| {
            // Dominant category; the category enum order breaks ties
            let category = totals
                .by_category
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(c, _)| c.as_str())
                .unwrap_or("computation");
            let operations = totals
                .by_operation
                .iter()
                .map(|(op, count)| if *count > 1 { format!("{} x{}", op, count) } else { op.clone() })
                .collect::<Vec<_>>()
                .join(", ");

            HeatmapPoint {
                line,
                gas_cost: totals.cost,
                intensity: (totals.cost as f64 / max_line_cost as f64).clamp(0.0, 1.0),
                category: category.to_string(),
                description: format!("{} (~{} gas)", operations, totals.cost),
            }
        })
        .collect()
}
