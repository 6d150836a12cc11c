//! Deterministic weighted operation sampling — §4.C. Each VU owns a fresh
//! RNG seeded from `vu_id` + the run seed so a replayed run with the same
//! seed draws the same operation sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::config::{OperationMixEntry, ToolTemplate};

#[derive(Debug, Clone)]
pub struct SampledOperation {
    pub operation: String,
    pub tool_name: Option<String>,
    pub arguments: Option<serde_json::Value>,
}

/// Precomputes cumulative weights over the operation mix so each draw is a
/// single comparison pass, the same reservoir technique used for weighted
/// tool template selection.
pub struct OperationSampler {
    entries: Vec<OperationMixEntry>,
    cumulative: Vec<f64>,
    total_weight: f64,
    tool_templates: Vec<ToolTemplate>,
    tool_cumulative: Vec<f64>,
    tool_total_weight: f64,
    rng: StdRng,
}

fn seed_from(vu_id: &str, run_seed: u64) -> u64 {
    // FNV-1a style fold of the vu_id string mixed with the run seed, giving
    // each VU an independent but reproducible stream.
    let mut hash: u64 = 0xcbf29ce484222325 ^ run_seed;
    for byte in vu_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl OperationSampler {
    pub fn new(
        operation_mix: Vec<OperationMixEntry>,
        tool_templates: Vec<ToolTemplate>,
        vu_id: &str,
        run_seed: u64,
    ) -> Self {
        let mut cumulative = Vec::with_capacity(operation_mix.len());
        let mut running = 0.0;
        for entry in &operation_mix {
            running += entry.weight.max(0.0);
            cumulative.push(running);
        }

        let mut tool_cumulative = Vec::with_capacity(tool_templates.len());
        let mut tool_running = 0.0;
        for template in &tool_templates {
            tool_running += template.weight.max(0.0);
            tool_cumulative.push(tool_running);
        }

        OperationSampler {
            entries: operation_mix,
            cumulative,
            total_weight: running,
            tool_templates,
            tool_cumulative,
            tool_total_weight: tool_running,
            rng: StdRng::seed_from_u64(seed_from(vu_id, run_seed)),
        }
    }

    /// Draws `r ∈ [0, total_weight)` and returns the first entry whose
    /// cumulative weight exceeds `r`.
    pub fn sample(&mut self) -> Option<SampledOperation> {
        if self.entries.is_empty() || self.total_weight <= 0.0 {
            return None;
        }
        let r = self.rng.gen_range(0.0..self.total_weight);
        let idx = self
            .cumulative
            .iter()
            .position(|&cum| r < cum)
            .unwrap_or(self.entries.len() - 1);
        let entry_operation = self.entries[idx].operation.clone();
        let entry_tool_name = self.entries[idx].tool_name.clone();

        let (tool_name, arguments) = if entry_operation == "tools/call" {
            match self.sample_tool() {
                Some(template) => (Some(template.0), Some(template.1)),
                None => (entry_tool_name, None),
            }
        } else {
            (entry_tool_name, None)
        };

        Some(SampledOperation {
            operation: entry_operation,
            tool_name,
            arguments,
        })
    }

    fn sample_tool(&mut self) -> Option<(String, serde_json::Value)> {
        if self.tool_templates.is_empty() || self.tool_total_weight <= 0.0 {
            return None;
        }
        let r = self.rng.gen_range(0.0..self.tool_total_weight);
        let idx = self
            .tool_cumulative
            .iter()
            .position(|&cum| r < cum)
            .unwrap_or(self.tool_templates.len() - 1);
        let template = &self.tool_templates[idx];
        Some((template.name.clone(), template.arguments.clone()))
    }
}
