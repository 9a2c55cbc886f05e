// src/analyzer.rs
use crate::aggregator::CostAggregator;
use crate::applicator::{self, ApplyError};
use crate::cache::{self, CacheStats, ResultCache};
use crate::config::AnalyzerConfig;
use crate::heatmap;
use crate::optimizer::OptimizationEngine;
use crate::scanner::{ConstructScanner, PatternScanner};
use crate::types::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One synchronous analysis pass over a source text.
pub struct SourceAnalyzer<'a> {
    source: &'a str,
    scanner: &'a dyn ConstructScanner,
    engine: &'a OptimizationEngine,
    config: &'a AnalyzerConfig,
}

impl<'a> SourceAnalyzer<'a> {
    pub fn new(
        source: &'a str,
        scanner: &'a dyn ConstructScanner,
        engine: &'a OptimizationEngine,
        config: &'a AnalyzerConfig,
    ) -> Self {
        Self {
            source,
            scanner,
            engine,
            config,
        }
    }

    pub fn analyze(&self) -> AnalysisResult {
        if self.source.trim().is_empty() {
            return AnalysisResult::empty();
        }

        let constructs = self.scanner.scan(self.source);
        let aggregation = CostAggregator::new(self.config).aggregate(&constructs);
        let optimizations = self.engine.detect(&constructs, self.source, self.config);
        let heatmap_data = heatmap::project(&aggregation.estimates);

        let total_savings = optimizations
            .iter()
            .map(|s| s.savings)
            .fold(0u64, u64::saturating_add);
        let optimized_gas_cost = aggregation.total_gas_cost.saturating_sub(total_savings);

        info!(
            constructs = constructs.len(),
            total_gas_cost = aggregation.total_gas_cost,
            suggestions = optimizations.len(),
            total_savings,
            "analysis complete"
        );

        AnalysisResult {
            estimates: aggregation.estimates,
            optimizations,
            total_gas_cost: aggregation.total_gas_cost,
            total_savings,
            optimized_gas_cost,
            function_breakdown: aggregation.function_breakdown,
            heatmap_data,
        }
    }
}

/// Long-lived entry point for an editor integration: analysis with a
/// document-keyed result cache, suggestion application and invalidation.
pub struct GasAnalyzer {
    scanner: Box<dyn ConstructScanner>,
    engine: OptimizationEngine,
    config: AnalyzerConfig,
    cache: ResultCache,
    /// Cache key currently held for each document.
    current_keys: Mutex<HashMap<String, String>>,
}

impl Default for GasAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl GasAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self::with_scanner(config, Box::new(PatternScanner))
    }

    pub fn with_scanner(config: AnalyzerConfig, scanner: Box<dyn ConstructScanner>) -> Self {
        Self {
            scanner,
            engine: OptimizationEngine::with_default_rules(),
            config: config.normalized(),
            cache: ResultCache::new(),
            current_keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_engine(mut self, engine: OptimizationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyzes `source` for the document identified by `cache_key`.
    ///
    /// The entry is keyed by the document and a fingerprint of the text, so any
    /// edit misses the cache. Concurrent calls for the same text share one pass.
    pub fn analyze(&self, source: &str, cache_key: &str) -> Arc<AnalysisResult> {
        let key = format!("{}#{}", cache_key, cache::fingerprint(source));

        let superseded = {
            let mut keys = self.current_keys.lock();
            keys.insert(cache_key.to_string(), key.clone())
                .filter(|previous| *previous != key)
        };
        if let Some(previous) = superseded {
            debug!(document = cache_key, "source changed, dropping superseded result");
            self.cache.invalidate(&previous);
        }

        let result = self.cache.get_or_compute(&key, self.config.cache_ttl(), || {
            SourceAnalyzer::new(source, self.scanner.as_ref(), &self.engine, &self.config).analyze()
        });

        // A newer text for this document may have arrived while this one was in flight
        let still_current = self.current_keys.lock().get(cache_key) == Some(&key);
        if !still_current {
            debug!(document = cache_key, "analysis superseded while in flight, not keeping it");
            self.cache.invalidate(&key);
        }
        result
    }

    /// Rewrites `source` with one suggestion. Does not re-analyze.
    pub fn apply_optimization(
        &self,
        suggestion: &OptimizationSuggestion,
        source: &str,
    ) -> Result<String, ApplyError> {
        applicator::apply(suggestion, source)
    }

    /// Drops the current cached result for a document.
    pub fn invalidate(&self, cache_key: &str) {
        if let Some(key) = self.current_keys.lock().remove(cache_key) {
            self.cache.invalidate(&key);
        }
    }

    pub fn clear_cache(&self) {
        self.current_keys.lock().clear();
        self.cache.clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
