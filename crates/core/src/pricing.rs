use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-1K-token rates for one model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

/// Optional per-model pricing. Cost accounting is best-effort by design:
/// an unknown model prices to `None` and the run carries on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PricingTable {
    rates: HashMap<String, ModelRates>,
}

impl PricingTable {
    pub fn new(rates: HashMap<String, ModelRates>) -> Self {
        Self { rates }
    }

    pub fn insert(&mut self, model: impl Into<String>, rates: ModelRates) {
        self.rates.insert(model.into(), rates);
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// `(prompt/1000)*input_rate + (completion/1000)*output_rate`, or `None`
    /// when the model has no configured rates.
    pub fn try_cost(
        &self,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> Option<Decimal> {
        let rates = self.rates.get(model)?;
        let per_k = Decimal::from(1000u32);
        let prompt_cost = Decimal::from(prompt_tokens) / per_k * rates.input_per_1k;
        let completion_cost = Decimal::from(completion_tokens) / per_k * rates.output_per_1k;
        Some(prompt_cost + completion_cost)
    }
}

/// Deterministic token approximation used when a model adapter reports zero
/// usage, so accounting is never silently zero: roughly one token per four
/// characters, never less than one.
pub fn fallback_token_estimate(text: &str) -> u64 {
    ((text.chars().count() as u64) / 4).max(1)
}
