use serde::{Deserialize, Serialize};

/// Token usage reported by the provider for one gateway call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }
}

/// Running input/output totals for every gateway call in one turn.
///
/// Additive only. `finalize` consumes the ledger, so totals are computed
/// exactly once at the end of the turn.
#[derive(Clone, Debug, Default)]
pub struct TokenLedger {
    input_tokens: u64,
    output_tokens: u64,
    calls: u32,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: &TokenUsage) {
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        self.calls += 1;
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn finalize(self) -> TokenTotals {
        TokenTotals {
            total_input_tokens: self.input_tokens,
            total_output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            gateway_calls: self.calls,
        }
    }
}

/// Finalized per-turn token totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub gateway_calls: u32,
}

/// Totals accumulated across the turns of one conversation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationTokens {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub last_turn: TokenTotals,
    pub turn_count: u32,
}

impl ConversationTokens {
    pub fn accumulate(&mut self, turn: &TokenTotals) {
        self.total_input_tokens += turn.total_input_tokens;
        self.total_output_tokens += turn.total_output_tokens;
        self.total_tokens += turn.total_tokens;
        self.last_turn = *turn;
        self.turn_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_sums_every_call() {
        let mut ledger = TokenLedger::new();
        ledger.record(&TokenUsage::new(120, 30));
        ledger.record(&TokenUsage::new(450, 80));
        ledger.record(&TokenUsage::new(0, 0));

        assert_eq!(ledger.calls(), 3);
        let totals = ledger.finalize();
        assert_eq!(totals.total_input_tokens, 570);
        assert_eq!(totals.total_output_tokens, 110);
        assert_eq!(totals.total_tokens, 680);
        assert_eq!(totals.gateway_calls, 3);
    }

    #[test]
    fn cache_tokens_do_not_count_toward_totals() {
        let mut ledger = TokenLedger::new();
        ledger.record(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_tokens: 1000,
            cache_creation_tokens: 2000,
        });
        assert_eq!(ledger.finalize().total_tokens, 15);
    }

    #[test]
    fn totals_serialize_with_ledger_names() {
        let totals = TokenLedger::new().finalize();
        let json = serde_json::to_value(totals).unwrap();
        assert_eq!(json["total_input_tokens"], 0);
        assert_eq!(json["total_output_tokens"], 0);
        assert_eq!(json["total_tokens"], 0);
    }

    #[test]
    fn conversation_accumulates_turns() {
        let mut conv = ConversationTokens::default();
        let mut first = TokenLedger::new();
        first.record(&TokenUsage::new(100, 50));
        conv.accumulate(&first.finalize());

        let mut second = TokenLedger::new();
        second.record(&TokenUsage::new(200, 25));
        let second = second.finalize();
        conv.accumulate(&second);

        assert_eq!(conv.total_input_tokens, 300);
        assert_eq!(conv.total_output_tokens, 75);
        assert_eq!(conv.total_tokens, 375);
        assert_eq!(conv.last_turn, second);
        assert_eq!(conv.turn_count, 2);
    }
}
