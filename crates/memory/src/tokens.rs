//! Token counting and the context budget.
//!
//! Counting is a cheap chars/4 approximation — not bit-exact to any
//! vendor tokenizer, but monotone (concatenation never decreases the
//! count) and stable within a process, which is all the budget math
//! needs. Callers re-estimate after every memory mutation.

use strand_domain::message::Message;

use crate::kernel::CachedToolResult;

/// Fixed per-message overhead for role tags and formatting.
const MESSAGE_OVERHEAD: u32 = 4;

/// ~4 characters per token.
pub fn count_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut tokens = count_tokens(&message.content) + MESSAGE_OVERHEAD;
    if !message.tool_calls.is_empty() {
        if let Ok(serialized) = serde_json::to_string(&message.tool_calls) {
            tokens += count_tokens(&serialized);
        }
    }
    if let Some(result) = &message.tool_result {
        if let Ok(serialized) = serde_json::to_string(result) {
            tokens += count_tokens(&serialized);
        }
    }
    tokens
}

pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

pub fn estimate_tool_result_tokens(results: &[CachedToolResult]) -> u32 {
    results
        .iter()
        .map(|r| {
            let args = r.args.to_string();
            let result = r.result.to_string();
            count_tokens(&args) + count_tokens(&result) + count_tokens(&r.tool_name)
        })
        .sum()
}

/// Tracks `(used, total)` against the configured window, where
/// `total = max_context_tokens − reserved_output_tokens`.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    used: u32,
    total: u32,
}

impl TokenBudget {
    pub fn new(max_context_tokens: u32, reserved_output_tokens: u32) -> Self {
        Self {
            used: 0,
            total: max_context_tokens.saturating_sub(reserved_output_tokens),
        }
    }

    /// Additive, never clamped: usage above 100% is visible to callers.
    pub fn use_tokens(&mut self, n: u32) {
        self.used += n;
    }

    pub fn set_used(&mut self, n: u32) {
        self.used = n;
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn available(&self) -> u32 {
        self.total.saturating_sub(self.used)
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        f64::from(self.used) / f64::from(self.total) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_is_monotone_under_concatenation() {
        let a = "hello world";
        let b = " and some more text";
        let combined = format!("{a}{b}");
        assert!(count_tokens(&combined) >= count_tokens(a));
        assert!(count_tokens(&combined) >= count_tokens(b));
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
    }

    #[test]
    fn message_estimate_includes_tool_payloads() {
        let plain = Message::assistant("hello");
        let with_tools = Message::assistant_with_tools(
            "hello",
            vec![strand_domain::message::ToolCall {
                id: "c1".into(),
                name: "search".into(),
                input: serde_json::json!({"query": "a long query with many words"}),
            }],
        );
        assert!(estimate_message_tokens(&with_tools) > estimate_message_tokens(&plain));
    }

    #[test]
    fn budget_math() {
        let mut budget = TokenBudget::new(10_000, 2_000);
        assert_eq!(budget.total(), 8_000);
        budget.use_tokens(4_000);
        assert_eq!(budget.available(), 4_000);
        assert!((budget.usage_percentage() - 50.0).abs() < f64::EPSILON);

        // Never clamped: overuse pushes past 100%.
        budget.use_tokens(6_000);
        assert!(budget.usage_percentage() > 100.0);
        assert_eq!(budget.available(), 0);

        budget.reset();
        assert_eq!(budget.used(), 0);
    }
}
