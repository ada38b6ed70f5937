//! Accumulation of streaming fragments into final call totals.

use crate::proxy::client::UpstreamUsage;
use rust_decimal::Decimal;

/// Final (or partial) totals for one streamed call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTotals {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub cost: Decimal,
    pub fragments: u64,
    pub content: String,
}

/// Collects fragments as they arrive so that the call can be recorded with
/// real usage once the upstream signals completion, or with a best-effort
/// estimate if the stream dies first.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    fragments: u64,
    content: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &str) {
        self.fragments += 1;
        self.content.push_str(delta);
    }

    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    /// Rough completion-token estimate for streams that never reported
    /// usage: about one token per four bytes of accumulated content.
    fn estimated_completion_tokens(&self) -> i32 {
        (self.content.len() / 4) as i32
    }

    /// Totals for a stream the upstream completed. Reported usage wins;
    /// without it, the accumulated content is the only signal left.
    pub fn finish(self, usage: Option<UpstreamUsage>, cost_estimate: Decimal) -> CallTotals {
        let usage = usage.unwrap_or(UpstreamUsage {
            prompt_tokens: 0,
            completion_tokens: self.estimated_completion_tokens(),
            total_tokens: self.estimated_completion_tokens(),
        });
        CallTotals {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            cost: cost_estimate,
            fragments: self.fragments,
            content: self.content,
        }
    }

    /// Partial totals for a stream that failed or was cancelled mid-way.
    /// No cost is attributed: the upstream never reported any.
    pub fn abort(self) -> CallTotals {
        let estimate = self.estimated_completion_tokens();
        CallTotals {
            prompt_tokens: 0,
            completion_tokens: estimate,
            total_tokens: estimate,
            cost: Decimal::ZERO,
            fragments: self.fragments,
            content: self.content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_usage_takes_precedence() {
        let mut acc = StreamAccumulator::new();
        acc.push("Hello, ");
        acc.push("world");

        let totals = acc.finish(
            Some(UpstreamUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
            }),
            Decimal::new(5, 3),
        );

        assert_eq!(totals.prompt_tokens, 7);
        assert_eq!(totals.completion_tokens, 3);
        assert_eq!(totals.total_tokens, 10);
        assert_eq!(totals.cost, Decimal::new(5, 3));
        assert_eq!(totals.fragments, 2);
        assert_eq!(totals.content, "Hello, world");
    }

    #[test]
    fn missing_usage_falls_back_to_content_estimate() {
        let mut acc = StreamAccumulator::new();
        acc.push("abcdefgh"); // 8 bytes -> ~2 tokens

        let totals = acc.finish(None, Decimal::ZERO);
        assert_eq!(totals.completion_tokens, 2);
        assert_eq!(totals.total_tokens, 2);
    }

    #[test]
    fn aborted_streams_keep_partial_estimates_and_no_cost() {
        let mut acc = StreamAccumulator::new();
        acc.push("partial answer so far");

        let totals = acc.abort();
        assert_eq!(totals.fragments, 1);
        assert_eq!(totals.completion_tokens, 21 / 4);
        assert_eq!(totals.cost, Decimal::ZERO);
        assert_eq!(totals.content, "partial answer so far");
    }

    #[test]
    fn empty_stream_aborts_to_zeroes() {
        let totals = StreamAccumulator::new().abort();
        assert_eq!(totals.fragments, 0);
        assert_eq!(totals.total_tokens, 0);
    }
}
