// src/lib.rs

/// Lazily compiled regex behind a function, for fixed patterns.
macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static regex::Regex {
            static CELL: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
            CELL.get_or_init(|| regex::Regex::new($pattern).expect("static pattern compiles"))
        }
    };
}

pub mod aggregator;
pub mod analyzer;
pub mod applicator;
pub mod cache;
pub mod config;
pub mod cost;
pub mod heatmap;
pub mod optimizer;
pub mod scanner;
pub mod types;

pub use analyzer::*;
pub use applicator::{apply, ApplyError};
pub use cache::{CacheStats, ResultCache};
pub use config::AnalyzerConfig;
pub use cost::CostModel;
pub use optimizer::{OptimizationEngine, OptimizationRule, RuleContext};
pub use scanner::{ConstructScanner, PatternScanner};
pub use types::*;

use wasm_bindgen::prelude::*;

/// One uncached analysis pass with the default scanner, rules and costs.
pub fn analyze_source(source: &str) -> AnalysisResult {
    analyze_source_with(source, &AnalyzerConfig::default())
}

pub fn analyze_source_with(source: &str, config: &AnalyzerConfig) -> AnalysisResult {
    let engine = OptimizationEngine::with_default_rules();
    SourceAnalyzer::new(source, &PatternScanner, &engine, config).analyze()
}

/// Quick summary analysis for CLI/API responses
pub fn quick_analyze(source: &str) -> AnalysisSummary {
    AnalysisSummary::from(&analyze_source(source))
}

#[wasm_bindgen]
pub fn analyze_source_for_web(source: &str) -> Result<String, JsValue> {
    // Use a panic hook for better error messages in the browser console
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    serde_json::to_string(&analyze_source(source))
        .map_err(|e| JsValue::from_str(&format!("JSON serialization error: {}", e)))
}
