// src/cost.rs
use crate::types::{ConstructKind, GasCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static lookup table from construct kind to base cost.
///
/// The figures are engineering constants loosely modeled on EVM opcode
/// pricing. They are meant to rank code by relative cost and to size
/// suggested savings, never to predict on-chain metering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CostModel {
    pub version: String,
    pub sload: u64,
    pub sstore: u64,
    /// Writes that allocate a fresh slot (initializers, array push).
    pub sstore_set: u64,
    pub loop_overhead: u64,
    pub external_call: u64,
    pub memory_alloc: u64,
    pub function_decl: u64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            version: "heuristic-v1".to_string(),
            sload: 2100,
            sstore: 5000,
            sstore_set: 20000,
            loop_overhead: 200,
            external_call: 700,
            memory_alloc: 96,
            function_decl: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationCost {
    pub operation_name: String,
    pub category: GasCategory,
    pub unit_cost: u64,
}

impl CostModel {
    pub fn cost_of(&self, kind: ConstructKind, attributes: &BTreeMap<String, String>) -> OperationCost {
        let access = attributes.get("access").map(String::as_str);

        let (operation_name, category, unit_cost) = match kind {
            ConstructKind::StorageRead => ("SLOAD", GasCategory::Storage, self.sload),
            ConstructKind::StorageWrite => match access {
                // State variable initializers run once, inside the constructor
                Some("init") => ("SSTORE_SET", GasCategory::Deployment, self.sstore_set),
                Some("push") => ("SSTORE_SET", GasCategory::Storage, self.sstore_set),
                _ => ("SSTORE", GasCategory::Storage, self.sstore),
            },
            ConstructKind::Loop => ("LOOP", GasCategory::Computation, self.loop_overhead),
            ConstructKind::ExternalCall => {
                let name = match attributes.get("method").map(String::as_str) {
                    Some("delegatecall") => "DELEGATECALL",
                    Some("staticcall") => "STATICCALL",
                    _ => "CALL",
                };
                (name, GasCategory::Call, self.external_call)
            }
            ConstructKind::FunctionDecl => ("FUNCTION", GasCategory::Computation, self.function_decl),
            ConstructKind::MemoryAlloc => ("MEMORY_ALLOC", GasCategory::Memory, self.memory_alloc),
        };

        OperationCost {
            operation_name: operation_name.to_string(),
            category,
            unit_cost,
        }
    }
}
