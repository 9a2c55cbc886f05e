// src/types.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shown next to every cost figure handed to a user.
pub const HEURISTIC_DISCLAIMER: &str =
    "Gas figures are heuristic estimates from source patterns, not protocol-exact metering.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructKind {
    StorageRead,
    StorageWrite,
    Loop,
    ExternalCall,
    FunctionDecl,
    MemoryAlloc,
}

/// A construct recognized by the scanner. Lines and columns are 1-based,
/// columns and `length` are counted in bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedConstruct {
    pub kind: ConstructKind,
    pub line: usize,
    pub column: usize,
    pub length: usize,
    pub attributes: BTreeMap<String, String>,
}

impl DetectedConstruct {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Numeric attribute such as `end_line`; absent or malformed values read as `None`.
    pub fn attr_usize(&self, key: &str) -> Option<usize> {
        self.attr(key).and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GasCategory {
    Storage,
    Computation,
    Memory,
    Call,
    Deployment,
}

impl GasCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GasCategory::Storage => "storage",
            GasCategory::Computation => "computation",
            GasCategory::Memory => "memory",
            GasCategory::Call => "call",
            GasCategory::Deployment => "deployment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostEntry {
    pub construct: DetectedConstruct,
    pub operation_name: String,
    pub category: GasCategory,
    pub unit_cost: u64,
    pub total_cost: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

/// Half-open span of source text: the end column points one byte past the last byte.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceRange {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizationSuggestion {
    pub id: String,
    pub title: String,
    pub category: GasCategory,
    pub difficulty: Difficulty,
    pub impact: Impact,
    pub before_code: String,
    pub after_code: String,
    pub range: SourceRange,
    pub savings: u64,
    pub auto_fix_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeatmapPoint {
    pub line: usize,
    pub gas_cost: u64,
    pub intensity: f64,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub estimates: Vec<CostEntry>,
    pub optimizations: Vec<OptimizationSuggestion>,
    pub total_gas_cost: u64,
    pub total_savings: u64,
    pub optimized_gas_cost: u64,
    pub function_breakdown: BTreeMap<String, u64>,
    pub heatmap_data: Vec<HeatmapPoint>,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self {
            estimates: Vec::new(),
            optimizations: Vec::new(),
            total_gas_cost: 0,
            total_savings: 0,
            optimized_gas_cost: 0,
            function_breakdown: BTreeMap::new(),
            heatmap_data: Vec::new(),
        }
    }

    pub fn suggestion(&self, id: &str) -> Option<&OptimizationSuggestion> {
        self.optimizations.iter().find(|s| s.id == id)
    }

    /// Sum of estimate costs whose line falls inside `[start_line, end_line]`.
    pub fn cost_in_lines(&self, start_line: usize, end_line: usize) -> u64 {
        self.estimates
            .iter()
            .filter(|e| e.construct.line >= start_line && e.construct.line <= end_line)
            .map(|e| e.total_cost)
            .fold(0u64, u64::saturating_add)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSummary {
    pub total_gas_cost: u64,
    pub optimized_gas_cost: u64,
    pub total_savings: u64,
    pub estimate_count: usize,
    pub suggestion_count: usize,
    pub auto_fixable_count: usize,
    pub function_count: usize,
    pub hottest_line: Option<usize>,
    pub most_expensive_function: Option<(String, u64)>,
    pub disclaimer: String,
}

impl From<&AnalysisResult> for AnalysisSummary {
    fn from(result: &AnalysisResult) -> Self {
        let hottest_line = result
            .heatmap_data
            .iter()
            .max_by(|a, b| a.gas_cost.cmp(&b.gas_cost).then(b.line.cmp(&a.line)))
            .map(|p| p.line);

        // Ties go to the alphabetically first name so the summary stays deterministic.
        let most_expensive_function = result
            .function_breakdown
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(name, cost)| (name.clone(), *cost));

        Self {
            total_gas_cost: result.total_gas_cost,
            optimized_gas_cost: result.optimized_gas_cost,
            total_savings: result.total_savings,
            estimate_count: result.estimates.len(),
            suggestion_count: result.optimizations.len(),
            auto_fixable_count: result
                .optimizations
                .iter()
                .filter(|s| s.auto_fix_available)
                .count(),
            function_count: result.function_breakdown.len(),
            hottest_line,
            most_expensive_function,
            disclaimer: HEURISTIC_DISCLAIMER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: usize, cost: u64) -> CostEntry {
        CostEntry {
            construct: DetectedConstruct {
                kind: ConstructKind::StorageRead,
                line,
                column: 1,
                length: 1,
                attributes: BTreeMap::new(),
            },
            operation_name: "SLOAD".to_string(),
            category: GasCategory::Storage,
            unit_cost: cost,
            total_cost: cost,
        }
    }

    #[test]
    fn test_cost_in_lines_is_inclusive() {
        let mut result = AnalysisResult::empty();
        result.estimates = vec![entry(1, 10), entry(2, 20), entry(3, 40)];
        assert_eq!(result.cost_in_lines(2, 3), 60);
        assert_eq!(result.cost_in_lines(4, 9), 0);
    }

    #[test]
    fn test_summary_picks_most_expensive_function() {
        let mut result = AnalysisResult::empty();
        result.function_breakdown.insert("mint".to_string(), 7100);
        result.function_breakdown.insert("burn".to_string(), 7100);
        result.function_breakdown.insert("view".to_string(), 2100);
        let summary = AnalysisSummary::from(&result);
        assert_eq!(summary.function_count, 3);
        assert_eq!(summary.most_expensive_function, Some(("burn".to_string(), 7100)));
        assert_eq!(summary.hottest_line, None);
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&GasCategory::Deployment).unwrap();
        assert_eq!(json, "\"deployment\"");
        assert_eq!(GasCategory::Call.as_str(), "call");
    }
}
