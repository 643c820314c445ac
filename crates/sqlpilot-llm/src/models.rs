use sqlpilot_core::tokens::TokenUsage;

/// USD per million tokens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        per_million(input_tokens, self.input) + per_million(output_tokens, self.output)
    }

    pub fn usage_cost(&self, usage: &TokenUsage) -> f64 {
        self.cost(u64::from(usage.input_tokens), u64::from(usage.output_tokens))
            + per_million(u64::from(usage.cache_read_tokens), self.cache_read)
            + per_million(u64::from(usage.cache_creation_tokens), self.cache_write)
    }
}

fn per_million(tokens: u64, rate: f64) -> f64 {
    tokens as f64 * rate / 1_000_000.0
}

#[derive(Clone, Copy, Debug)]
pub struct ModelInfo {
    pub id: &'static str,
    /// Undated name accepted in settings.
    pub alias: &'static str,
    pub max_output: u32,
    pub pricing: Pricing,
}

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

static CATALOG: [ModelInfo; 3] = [
    ModelInfo {
        id: "claude-sonnet-4-5-20250929",
        alias: "claude-sonnet-4-5",
        max_output: 64_000,
        pricing: Pricing { input: 3.0, output: 15.0, cache_read: 0.3, cache_write: 3.75 },
    },
    ModelInfo {
        id: "claude-haiku-4-5-20251001",
        alias: "claude-haiku-4-5",
        max_output: 64_000,
        pricing: Pricing { input: 1.0, output: 5.0, cache_read: 0.1, cache_write: 1.25 },
    },
    ModelInfo {
        id: "claude-opus-4-1-20250805",
        alias: "claude-opus-4-1",
        max_output: 32_000,
        pricing: Pricing { input: 15.0, output: 75.0, cache_read: 1.5, cache_write: 18.75 },
    },
];

/// Look a model up by id or alias. Bedrock-style ids such as
/// `anthropic.claude-haiku-4-5-20251001-v1:0` resolve to the same entry.
pub fn find_model(name: &str) -> Option<&'static ModelInfo> {
    let bare = name.strip_prefix("anthropic.").unwrap_or(name);
    let bare = bare.split_once("-v").map_or(bare, |(head, _)| head);
    CATALOG.iter().find(|m| m.id == bare || m.alias == bare)
}

pub fn default_model() -> &'static ModelInfo {
    &CATALOG[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_alias_and_bedrock_id() {
        assert_eq!(find_model("claude-haiku-4-5-20251001").unwrap().alias, "claude-haiku-4-5");
        assert_eq!(find_model("claude-opus-4-1").unwrap().id, "claude-opus-4-1-20250805");
        assert_eq!(
            find_model("anthropic.claude-haiku-4-5-20251001-v1:0").unwrap().id,
            "claude-haiku-4-5-20251001"
        );
        assert!(find_model("gpt-4").is_none());
        assert_eq!(default_model().id, DEFAULT_MODEL);
    }

    #[test]
    fn turn_cost() {
        let sonnet = find_model(DEFAULT_MODEL).unwrap().pricing;
        let cost = sonnet.cost(1_000_000, 500_000);
        assert!((cost - 10.5).abs() < 1e-9, "got {cost}");
    }

    #[test]
    fn usage_cost_includes_cache() {
        let usage = TokenUsage {
            input_tokens: 2_000,
            output_tokens: 500,
            cache_read_tokens: 10_000,
            cache_creation_tokens: 0,
        };
        let cost = find_model("claude-haiku-4-5").unwrap().pricing.usage_cost(&usage);
        assert!((cost - (0.002 + 0.0025 + 0.001)).abs() < 1e-9, "got {cost}");
    }
}
