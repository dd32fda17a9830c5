//! Token pricing and usage accounting for model calls.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrice {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_mtok
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

/// Prices matched by model-id substring. The longest matching pattern wins,
/// so `gpt-4o-mini` is not billed as `gpt-4o`.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    rows: BTreeMap<String, ModelPrice>,
    default: ModelPrice,
}

impl Default for PricingTable {
    fn default() -> Self {
        let rows = [
            ("sonnet", ModelPrice::new(3.0, 15.0)),
            ("opus", ModelPrice::new(15.0, 75.0)),
            ("haiku", ModelPrice::new(1.0, 5.0)),
            ("gpt-4o-mini", ModelPrice::new(0.15, 0.6)),
            ("gpt-4o", ModelPrice::new(2.5, 10.0)),
            ("gpt-4.1-mini", ModelPrice::new(0.4, 1.6)),
            ("gpt-4.1", ModelPrice::new(2.0, 8.0)),
        ]
        .into_iter()
        .map(|(pattern, price)| (pattern.to_string(), price))
        .collect();

        Self {
            rows,
            default: ModelPrice::new(3.0, 15.0),
        }
    }
}

impl PricingTable {
    /// Table with a single default row and no patterns.
    pub fn flat(default: ModelPrice) -> Self {
        Self {
            rows: BTreeMap::new(),
            default,
        }
    }

    /// Add or replace rows.
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ModelPrice>) -> Self {
        for (pattern, price) in overrides {
            self.rows.insert(pattern.clone(), *price);
        }
        self
    }

    pub fn price(&self, model: &str) -> ModelPrice {
        self.rows
            .iter()
            .filter(|(pattern, _)| model.contains(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, price)| *price)
            .unwrap_or(self.default)
    }

    pub fn cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.price(model).cost(input_tokens, output_tokens)
    }
}

/// Running totals for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl ModelUsage {
    fn add(&mut self, success: bool, input_tokens: u32, output_tokens: u32, cost_usd: f64) {
        self.calls += 1;
        if !success {
            self.failed_calls += 1;
        }
        self.input_tokens += input_tokens as u64;
        self.output_tokens += output_tokens as u64;
        self.cost_usd += cost_usd;
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Usage across all models plus a per-model breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total: ModelUsage,
    pub by_model: BTreeMap<String, ModelUsage>,
}

/// Thread-safe usage accumulator shared by every call through a client.
#[derive(Debug, Default)]
pub struct UsageLedger {
    usage: RwLock<UsageSummary>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        model: &str,
        success: bool,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
    ) {
        let mut usage = self.usage.write();
        usage
            .total
            .add(success, input_tokens, output_tokens, cost_usd);
        usage
            .by_model
            .entry(model.to_string())
            .or_default()
            .add(success, input_tokens, output_tokens, cost_usd);
    }

    pub fn snapshot(&self) -> UsageSummary {
        self.usage.read().clone()
    }

    pub fn reset(&self) {
        *self.usage.write() = UsageSummary::default();
    }
}
