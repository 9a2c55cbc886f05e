// src/config.rs
use crate::cost::CostModel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub cost_model: CostModel,
    /// Iteration proxy for loops whose bound is not a literal.
    pub default_loop_iterations: u64,
    /// Ceiling on the product of nested loop multipliers.
    pub max_loop_multiplier: u64,
    pub cache_ttl_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            cost_model: CostModel::default(),
            default_loop_iterations: 10,
            max_loop_multiplier: 1000,
            cache_ttl_secs: 300,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: AnalyzerConfig =
            serde_json::from_str(text).context("Failed to parse analyzer configuration")?;
        Ok(config.normalized())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_json(&text)
    }

    /// Clamps degenerate values instead of rejecting them.
    pub fn normalized(mut self) -> Self {
        self.default_loop_iterations = self.default_loop_iterations.max(1);
        self.max_loop_multiplier = self.max_loop_multiplier.max(1);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
