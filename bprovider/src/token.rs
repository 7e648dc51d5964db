//! Token counting seam shared by the generative clients.
//!
//! Backends with a real tokenizer inject an exact [`TokenCounter`];
//! everything else uses [`HeuristicTokenCounter`], whose constants are
//! load-bearing: request budgeting elsewhere assumes this exact estimate.

/// One token per 75 characters of English text, per the upstream tokenizer
/// documentation.
pub const TOKEN_RATIO: f64 = 100.0 / 75.0;

/// Safety margin applied to every count, exact or estimated.
pub const TOKEN_SAFE_RATIO: f64 = 1.1;

/// Applies the safety margin and rounds up.
pub fn token_safe(count: f64) -> u32 {
    (count * TOKEN_SAFE_RATIO).ceil() as u32
}

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> u32;
}

/// Estimates a token count by splitting on non-alphanumeric characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str) -> u32 {
        let segments = text.split(|c: char| !c.is_ascii_alphanumeric()).count();
        token_safe(segments as f64 * TOKEN_RATIO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_count_applies_ratio_and_safety_margin() {
        let counter = HeuristicTokenCounter;

        // Two segments: 2 * (100/75) * 1.1 = 2.93.., rounded up.
        assert_eq!(counter.count_tokens("hello world"), 3);

        // Six segments across mixed separators.
        assert_eq!(
            counter.count_tokens("one two,three-four five.six"),
            token_safe(6.0 * TOKEN_RATIO)
        );
    }

    #[test]
    fn token_safe_rounds_up() {
        assert_eq!(token_safe(10.0), 11);
        assert_eq!(token_safe(0.0), 0);
        assert_eq!(token_safe(1.0), 2);
    }
}
