// src/aggregator.rs
use crate::config::AnalyzerConfig;
use crate::types::*;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub estimates: Vec<CostEntry>,
    pub total_gas_cost: u64,
    pub function_breakdown: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
struct FunctionRange {
    name: String,
    start_line: usize,
    end_line: usize,
}

#[derive(Debug, Clone)]
struct OpenLoop {
    end_line: usize,
    iterations: u64,
}

/// Estimated trip count of a loop: its literal bound when there is one,
/// otherwise the configured proxy. Never below 1 or above the multiplier ceiling.
pub fn estimated_iterations(construct: &DetectedConstruct, config: &AnalyzerConfig) -> u64 {
    construct
        .attr("literal_iterations")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(config.default_loop_iterations)
        .clamp(1, config.max_loop_multiplier.max(1))
}

pub struct CostAggregator<'a> {
    config: &'a AnalyzerConfig,
    functions: Vec<FunctionRange>, // sorted by start line
}

impl<'a> CostAggregator<'a> {
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        Self {
            config,
            functions: Vec::new(),
        }
    }

    pub fn aggregate(&mut self, constructs: &[DetectedConstruct]) -> Aggregation {
        self.functions = Self::function_ranges(constructs);

        let mut estimates = Vec::with_capacity(constructs.len());
        let mut function_breakdown: BTreeMap<String, u64> = BTreeMap::new();
        let mut open_loops: Vec<OpenLoop> = Vec::new();
        let mut total_gas_cost = 0u64;

        for construct in constructs {
            // Loops whose body ended above this line no longer apply
            open_loops.retain(|l| l.end_line >= construct.line);

            let multiplier = self.loop_multiplier(&open_loops);
            let cost = self.config.cost_model.cost_of(construct.kind, &construct.attributes);
            let total_cost = cost.unit_cost.saturating_mul(multiplier);

            if let Some(function) = self.enclosing_function(construct.line) {
                let slot = function_breakdown.entry(function.name.clone()).or_insert(0);
                *slot = slot.saturating_add(total_cost);
            }
            total_gas_cost = total_gas_cost.saturating_add(total_cost);

            if construct.kind == ConstructKind::Loop {
                open_loops.push(OpenLoop {
                    end_line: construct.attr_usize("end_line").unwrap_or(construct.line),
                    iterations: estimated_iterations(construct, self.config),
                });
            }

            estimates.push(CostEntry {
                construct: construct.clone(),
                operation_name: cost.operation_name,
                category: cost.category,
                unit_cost: cost.unit_cost,
                total_cost,
            });
        }

        debug!(
            estimates = estimates.len(),
            total_gas_cost,
            functions = function_breakdown.len(),
            "aggregated costs"
        );

        Aggregation {
            estimates,
            total_gas_cost,
            function_breakdown,
        }
    }

    fn loop_multiplier(&self, open_loops: &[OpenLoop]) -> u64 {
        let ceiling = self.config.max_loop_multiplier.max(1);
        open_loops
            .iter()
            .fold(1u64, |acc, l| acc.saturating_mul(l.iterations).min(ceiling))
    }

    fn function_ranges(constructs: &[DetectedConstruct]) -> Vec<FunctionRange> {
        let mut functions: Vec<FunctionRange> = constructs
            .iter()
            .filter(|c| c.kind == ConstructKind::FunctionDecl)
            .map(|c| FunctionRange {
                name: c.attr("name").unwrap_or("<anonymous>").to_string(),
                start_line: c.line,
                end_line: c.attr_usize("end_line").unwrap_or(c.line).max(c.line),
            })
            .collect();
        functions.sort_by_key(|f| f.start_line);
        functions
    }

    fn enclosing_function(&self, line: usize) -> Option<&FunctionRange> {
        let idx = self.functions.partition_point(|f| f.start_line <= line);
        let candidate = self.functions.get(idx.checked_sub(1)?)?;
        (candidate.end_line >= line).then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn construct(kind: ConstructKind, line: usize, attrs: &[(&str, &str)]) -> DetectedConstruct {
        DetectedConstruct {
            kind,
            line,
            column: 5,
            length: 3,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_empty_input() {
        let config = AnalyzerConfig::default();
        let result = CostAggregator::new(&config).aggregate(&[]);
        assert!(result.estimates.is_empty());
        assert_eq!(result.total_gas_cost, 0);
        assert!(result.function_breakdown.is_empty());
    }

    #[test]
    fn test_state_initializer_counts_only_in_total() {
        let config = AnalyzerConfig::default();
        let constructs = vec![
            construct(ConstructKind::StorageWrite, 2, &[("access", "init")]),
            construct(ConstructKind::FunctionDecl, 4, &[("name", "get"), ("end_line", "6")]),
            construct(ConstructKind::StorageRead, 5, &[]),
        ];
        let result = CostAggregator::new(&config).aggregate(&constructs);
        assert_eq!(result.total_gas_cost, 20000 + 2100);
        assert_eq!(result.function_breakdown.get("get"), Some(&2100));
        assert!(result.function_breakdown.values().sum::<u64>() <= result.total_gas_cost);
    }

    #[test]
    fn test_loop_body_is_multiplied() {
        let config = AnalyzerConfig::default();
        let constructs = vec![
            construct(ConstructKind::FunctionDecl, 1, &[("name", "run"), ("end_line", "9")]),
            construct(ConstructKind::Loop, 2, &[("end_line", "4")]),
            construct(ConstructKind::StorageRead, 3, &[]),
            construct(ConstructKind::StorageRead, 5, &[]),
        ];
        let result = CostAggregator::new(&config).aggregate(&constructs);
        assert_eq!(result.estimates[1].total_cost, 200);
        assert_eq!(result.estimates[2].total_cost, 2100 * 10);
        assert_eq!(result.estimates[3].total_cost, 2100);
        assert_eq!(result.function_breakdown["run"], 200 + 21000 + 2100);
    }

    #[test]
    fn test_literal_bound_and_nesting_cap() {
        let mut config = AnalyzerConfig::default();
        config.max_loop_multiplier = 50;
        let constructs = vec![
            construct(ConstructKind::Loop, 1, &[("end_line", "10"), ("literal_iterations", "4")]),
            construct(ConstructKind::StorageRead, 2, &[]),
            construct(ConstructKind::Loop, 3, &[("end_line", "9")]),
            construct(ConstructKind::StorageRead, 4, &[]),
        ];
        let result = CostAggregator::new(&config).aggregate(&constructs);
        assert_eq!(result.estimates[1].total_cost, 2100 * 4);
        // nested loop overhead runs once per outer iteration
        assert_eq!(result.estimates[2].total_cost, 200 * 4);
        // 4 * 10 = 40 stays under the ceiling of 50
        assert_eq!(result.estimates[3].total_cost, 2100 * 40);

        config.max_loop_multiplier = 16;
        let capped = CostAggregator::new(&config).aggregate(&constructs);
        assert_eq!(capped.estimates[3].total_cost, 2100 * 16);
    }

    #[test]
    fn test_enclosing_function_binary_search() {
        let config = AnalyzerConfig::default();
        let constructs = vec![
            construct(ConstructKind::FunctionDecl, 1, &[("name", "a"), ("end_line", "3")]),
            construct(ConstructKind::StorageRead, 2, &[]),
            construct(ConstructKind::StorageRead, 4, &[]),
            construct(ConstructKind::FunctionDecl, 5, &[("name", "b"), ("end_line", "8")]),
            construct(ConstructKind::ExternalCall, 7, &[]),
        ];
        let result = CostAggregator::new(&config).aggregate(&constructs);
        assert_eq!(result.function_breakdown["a"], 2100);
        assert_eq!(result.function_breakdown["b"], 700);
        assert_eq!(result.total_gas_cost, 2100 * 2 + 700);
    }
}
