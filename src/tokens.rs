//! Token estimation and per-provider cost/fit reporting.
//!
//! The estimate is the usual four-bytes-per-token heuristic. It is cheap
//! enough to run on byte counts alone, which is what lets `tokens.estimate`
//! answer from the cache without touching the filesystem.

use serde::Serialize;

/// Bytes per token used by the heuristic.
const BYTES_PER_TOKEN: u64 = 4;

/// One model's limits and price.
#[derive(Debug, Clone, Copy)]
pub struct Provider {
    pub provider: &'static str,
    pub model: &'static str,
    pub context_window: u64,
    /// USD per million input tokens.
    pub input_cost_per_million: f64,
}

/// Reference table; prices are indicative only.
pub const PROVIDERS: &[Provider] = &[
    Provider {
        provider: "anthropic",
        model: "claude-sonnet",
        context_window: 200_000,
        input_cost_per_million: 3.0,
    },
    Provider {
        provider: "anthropic",
        model: "claude-haiku",
        context_window: 200_000,
        input_cost_per_million: 0.8,
    },
    Provider {
        provider: "openai",
        model: "gpt-4o",
        context_window: 128_000,
        input_cost_per_million: 2.5,
    },
    Provider {
        provider: "openai",
        model: "gpt-4o-mini",
        context_window: 128_000,
        input_cost_per_million: 0.15,
    },
    Provider {
        provider: "google",
        model: "gemini-1.5-pro",
        context_window: 2_000_000,
        input_cost_per_million: 1.25,
    },
];

/// Cost and fit of one estimate against one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEstimate {
    pub provider: &'static str,
    pub model: &'static str,
    pub context_window: u64,
    pub input_cost_per_million: f64,
    pub estimated_cost: f64,
    pub fits: bool,
}

/// Estimate tokens for a piece of text.
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_from_bytes(text.len() as u64)
}

/// Estimate tokens from a byte count, rounding up.
pub fn estimate_tokens_from_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_TOKEN)
}

/// Evaluate an estimate against every known provider.
pub fn provider_estimates(tokens: u64) -> Vec<ProviderEstimate> {
    PROVIDERS
        .iter()
        .map(|p| ProviderEstimate {
            provider: p.provider,
            model: p.model,
            context_window: p.context_window,
            input_cost_per_million: p.input_cost_per_million,
            estimated_cost: (tokens as f64 / 1_000_000.0 * p.input_cost_per_million * 10_000.0)
                .round()
                / 10_000.0,
            fits: tokens <= p.context_window,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens_from_bytes(4_000), 1_000);
    }

    #[test]
    fn test_fit_flags_follow_context_window() {
        let estimates = provider_estimates(150_000);
        let sonnet = estimates.iter().find(|e| e.model == "claude-sonnet").unwrap();
        let gpt = estimates.iter().find(|e| e.model == "gpt-4o").unwrap();
        assert!(sonnet.fits);
        assert!(!gpt.fits);
        assert_eq!(sonnet.estimated_cost, 0.45);
    }
}
