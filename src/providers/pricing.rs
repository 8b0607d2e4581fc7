//! Static per-model price table and token estimation.
//!
//! Costs are computed from token counts against published USD prices per
//! 1,000 tokens. Unknown models fall back to a conservative default row so
//! cost rollups never silently read zero for a priced call.

use crate::trace::TokenUsage;

/// USD per 1,000 input/output tokens, matched by model-name prefix.
/// Longest prefix wins, so `gpt-4o-mini` is checked before `gpt-4o`.
const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("gpt-4.1-mini", 0.000_4, 0.001_6),
    ("gpt-4.1", 0.002, 0.008),
    ("gpt-3.5-turbo", 0.000_5, 0.001_5),
    ("text-embedding-3-small", 0.000_02, 0.0),
    ("text-embedding-3-large", 0.000_13, 0.0),
];

/// Fallback row for models missing from the table.
const DEFAULT_PRICE: (f64, f64) = (0.001, 0.002);

/// Cost in USD for `usage` tokens against `model`'s price row.
pub fn cost_for(model: &str, usage: &TokenUsage) -> f64 {
    let (input_per_1k, output_per_1k) = PRICE_TABLE
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_PRICE);

    (usage.input as f64 / 1000.0) * input_per_1k + (usage.output as f64 / 1000.0) * output_per_1k
}

/// Rough token estimate at 4 characters per token, used when a provider
/// does not report usage. Never returns zero for non-empty text.
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_from_chars(text.chars().count())
}

pub(crate) fn estimate_tokens_from_chars(chars: usize) -> u64 {
    (chars as u64).div_ceil(4)
}
